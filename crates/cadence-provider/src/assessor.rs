use async_trait::async_trait;
use cadence_core::{Assessment, AssessmentInput, CadenceError, CadenceResult, Trend};
use std::time::Duration;
use tracing::debug;

/// Produces a structured quality assessment for a completed round.
#[async_trait]
pub trait Assessor: Send + Sync {
    /// Produce a structured assessment of one round.
    async fn assess(&self, input: &AssessmentInput) -> CadenceResult<Assessment>;
}

/// Settings for [`LlmAssessor`].
#[derive(Debug, Clone)]
pub struct AssessorConfig {
    /// Messages API base URL.
    pub api_base_url: String,
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Model to request.
    pub model_id: String,
    /// Output token limit per request.
    pub max_tokens: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

const SYSTEM_PROMPT: &str = "You assess email campaign rounds. \
Reply with a single JSON object and nothing else, with the fields: \
quality_score (integer 0-100), health_status (\"healthy\" | \"warning\" | \"critical\"), \
trend (\"improving\" | \"stable\" | \"declining\" | \"unknown\"), executive_summary (string), \
insights (array of strings), recommendations (array of strings), \
predictions ({next_round_open_rate, next_round_click_rate, notes}). \
When previous_stats is null the trend must be \"unknown\"; never invent a baseline.";

/// Assessor backed by an Anthropic-style messages API.
pub struct LlmAssessor {
    config: AssessorConfig,
    http: reqwest::Client,
}

impl LlmAssessor {
    /// Assessor with its own HTTP client.
    pub fn new(config: AssessorConfig) -> CadenceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CadenceError::Assessment(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Assessor for LlmAssessor {
    async fn assess(&self, input: &AssessmentInput) -> CadenceResult<Assessment> {
        let url = format!(
            "{}/v1/messages",
            self.config.api_base_url.trim_end_matches('/')
        );
        let user = format!(
            "Assess this round.\n{}",
            serde_json::to_string_pretty(input)?
        );
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": user}],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CadenceError::Assessment(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CadenceError::Assessment(e.to_string()))?;

        if !status.is_success() {
            return Err(CadenceError::Assessment(format!(
                "Assessment API error {status}: {resp_body}"
            )));
        }

        let text = response_text(&resp_body)?;
        debug!(chars = text.len(), "Assessment response received");
        parse_assessment(&text, input.previous_stats.is_some())
    }
}

/// Concatenate the text blocks of a messages-API response.
fn response_text(body: &serde_json::Value) -> CadenceResult<String> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| CadenceError::Assessment("Response has no content".into()))?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    if text.trim().is_empty() {
        return Err(CadenceError::Assessment("Response has no text".into()));
    }
    Ok(text)
}

/// Extract the JSON object from model output and validate it.
///
/// Models sometimes wrap the object in prose or a code fence, so the
/// outermost `{ ... }` is taken.
fn parse_assessment(text: &str, has_previous: bool) -> CadenceResult<Assessment> {
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return Err(CadenceError::Assessment(
                "No JSON object in assessment response".into(),
            ))
        }
    };
    let mut value: serde_json::Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| CadenceError::Assessment(format!("Malformed assessment JSON: {e}")))?;

    // Scores outside 0-100 are clamped rather than rejected.
    if let Some(score) = value["quality_score"].as_f64() {
        value["quality_score"] = serde_json::json!(score.clamp(0.0, 100.0).round() as u8);
    }

    let mut assessment: Assessment = serde_json::from_value(value)
        .map_err(|e| CadenceError::Assessment(format!("Assessment missing fields: {e}")))?;
    if !has_previous {
        assessment.trend = Trend::Unknown;
    }
    Ok(assessment)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cadence_core::HealthStatus;

    const OBJECT: &str = r#"{"quality_score": 81, "health_status": "healthy",
        "trend": "improving", "executive_summary": "Solid round",
        "insights": ["opens up"], "recommendations": []}"#;

    #[test]
    fn test_parse_plain_object() {
        let a = parse_assessment(OBJECT, true).unwrap();
        assert_eq!(a.quality_score, 81);
        assert_eq!(a.health_status, HealthStatus::Healthy);
        assert_eq!(a.trend, Trend::Improving);
        assert!(a.predictions.notes.is_empty());
    }

    #[test]
    fn test_parse_fenced_object() {
        let text = format!("Here you go:\n```json\n{OBJECT}\n```");
        assert!(parse_assessment(&text, true).is_ok());
    }

    #[test]
    fn test_trend_forced_unknown_without_baseline() {
        let a = parse_assessment(OBJECT, false).unwrap();
        assert_eq!(a.trend, Trend::Unknown);
    }

    #[test]
    fn test_score_is_clamped() {
        let text = OBJECT.replace("81", "140");
        assert_eq!(parse_assessment(&text, true).unwrap().quality_score, 100);
    }

    #[test]
    fn test_missing_object_is_error() {
        let err = parse_assessment("I cannot help with that.", true).unwrap_err();
        assert_eq!(err.kind(), "assessment");
    }

    #[test]
    fn test_response_text_joins_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "{\"a\":"},
                {"type": "text", "text": "1}"}
            ]
        });
        assert_eq!(response_text(&body).unwrap(), "{\"a\":1}");
    }
}
