use crate::email::{EmailProvider, SendReceipt, SendRequest};
use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult, CampaignStats};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for [`HttpEmailProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider API base URL.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// JSON-over-HTTP email provider client.
///
/// Endpoints, relative to `base_url`:
///
/// | call | request | success body |
/// |---|---|---|
/// | audience size | `GET /lists/{ref}` | `{"count": n}` |
/// | draft exists | `GET /drafts/{ref}` | any 2xx (404 means absent) |
/// | sender verified | `GET /senders/{email}` | `{"verified": bool}` (404 means unverified) |
/// | send | `POST /campaigns` | `{"id": "..."}` |
/// | statistics | `GET /campaigns/{id}/stats` | [`CampaignStats`] |
pub struct HttpEmailProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct CampaignResponse {
    id: String,
}

fn provider_err(context: &str, e: impl std::fmt::Display) -> CadenceError {
    CadenceError::Provider(format!("{context}: {e}"))
}

impl HttpEmailProvider {
    /// Provider client with its own HTTP client.
    pub fn new(config: ProviderConfig) -> CadenceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| provider_err("Failed to build HTTP client", e))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> CadenceResult<reqwest::Response> {
        self.http
            .get(self.url(path))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| provider_err(&format!("GET {path}"), e))
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> CadenceResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CadenceError::Provider(format!(
                "{path} returned {status}: {body}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| provider_err(&format!("Invalid response from {path}"), e))
    }
}

fn segment(value: &str) -> String {
    // Only the characters that would break the path.
    value.replace('%', "%25").replace('/', "%2F").replace('?', "%3F").replace('#', "%23")
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn audience_size(&self, list_ref: &str) -> CadenceResult<u64> {
        let path = format!("/lists/{}", segment(list_ref));
        let resp = self.get(&path).await?;
        let list: ListResponse = Self::decode(&path, resp).await?;
        debug!(list_ref, count = list.count, "Audience size fetched");
        Ok(list.count)
    }

    async fn draft_exists(&self, draft_ref: &str) -> CadenceResult<bool> {
        let path = format!("/drafts/{}", segment(draft_ref));
        let resp = self.get(&path).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(CadenceError::Provider(format!("{path} returned {s}"))),
        }
    }

    async fn sender_verified(&self, sender_email: &str) -> CadenceResult<bool> {
        let path = format!("/senders/{}", segment(sender_email));
        let resp = self.get(&path).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let sender: SenderResponse = Self::decode(&path, resp).await?;
        Ok(sender.verified)
    }

    async fn send(&self, request: SendRequest) -> CadenceResult<SendReceipt> {
        let path = "/campaigns";
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", request.schedule_id.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| provider_err("POST /campaigns", e))?;
        let created: CampaignResponse = Self::decode(path, resp).await?;
        info!(
            schedule_id = %request.schedule_id,
            provider_ref = %created.id,
            recipients = request.recipient_count,
            "Provider accepted send"
        );
        Ok(SendReceipt {
            provider_ref: created.id,
        })
    }

    async fn campaign_stats(&self, provider_ref: &str) -> CadenceResult<CampaignStats> {
        let path = format!("/campaigns/{}/stats", segment(provider_ref));
        let resp = self.get(&path).await?;
        Self::decode(&path, resp).await
    }
}
