use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use cadence_core::{CadenceError, LifecycleJob};
use cadence_orchestrator::{CreateCampaignRequest, RescheduleRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

type ApiResult<T> = Result<T, ApiError>;

/// Deserialize a JSON body; an empty body yields `T::default()` when `T`
/// allows it, so callers decide whether a body is optional.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw)
        .map_err(|e| ApiError(CadenceError::Validation(format!("invalid request body: {e}"))))
}

fn parse_schedule_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError(CadenceError::Validation(format!(
            "'{raw}' is not a schedule id"
        )))
    })
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "cadence" }))
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req: CreateCampaignRequest = parse_body(&body)?;
    let result = state.planner.create_campaign(req).await?;
    info!(
        campaign = %result.campaign_name,
        unscheduled = result.unscheduled.len(),
        "Campaign created via API"
    );
    Ok((StatusCode::CREATED, Json(result)))
}

/// `GET /campaigns/{key}` with a campaign name.
pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(campaign_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.status.get_campaign_status(&campaign_name).await?))
}

/// `POST /campaigns/{key}/preflight`
pub async fn pre_flight(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    Ok(Json(state.orchestrator.run_pre_flight(id).await?))
}

/// Optional body of a launch request.
#[derive(Debug, Default, Deserialize)]
pub struct LaunchBody {
    /// Launch without a passed pre-flight; recorded as an override.
    #[serde(default)]
    pub skip_pre_flight: bool,
}

/// `POST /campaigns/{key}/launch`
pub async fn launch(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    let LaunchBody { skip_pre_flight } = parse_body(&body)?;
    Ok(Json(state.orchestrator.launch_campaign(id, skip_pre_flight).await?))
}

/// `POST /campaigns/{key}/wrapup`
pub async fn wrap_up(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    Ok(Json(state.orchestrator.run_wrap_up(id).await?))
}

/// Body of a cancel request.
#[derive(Debug, Deserialize)]
pub struct CancelBody {
    /// Required, non-blank.
    #[serde(default)]
    pub reason: String,
}

/// `DELETE /campaigns/{key}`
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    let CancelBody { reason } = parse_body(&body)?;
    Ok(Json(state.orchestrator.cancel_campaign(id, &reason).await?))
}

/// Jobs of one round.
#[derive(Debug, Serialize)]
pub struct JobsView {
    /// The round.
    pub schedule_id: Uuid,
    /// Every stage has a live job.
    pub jobs_scheduled: bool,
    /// Jobs in stage order.
    pub jobs: Vec<LifecycleJob>,
}

/// `GET /campaigns/{key}/jobs`
pub async fn jobs(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    state.orchestrator.load(id).await?;
    let scheduler = state.orchestrator.scheduler();
    let jobs = scheduler.get_job_status(id).await?;
    Ok(Json(JobsView {
        schedule_id: id,
        jobs_scheduled: cadence_orchestrator::scheduler::jobs_cover_all_stages(&jobs),
        jobs,
    }))
}

/// `POST /campaigns/{key}/jobs` re-materializes the round's jobs.
pub async fn schedule_jobs(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    Ok(Json(state.planner.schedule_round(id).await?))
}

/// `PUT /campaigns/{key}/reschedule`
pub async fn reschedule(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = parse_schedule_id(&key)?;
    let req: RescheduleRequest = parse_body(&body)?;
    Ok(Json(state.orchestrator.reschedule(id, req).await?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_defaults() {
        let body: LaunchBody = parse_body(&Bytes::new()).unwrap();
        assert!(!body.skip_pre_flight);
        let raw = Bytes::from_static(b"{\"skip_pre_flight\":true}");
        let body: LaunchBody = parse_body(&raw).unwrap();
        assert!(body.skip_pre_flight);
    }

    #[test]
    fn test_bad_body_is_validation() {
        let err = parse_body::<LaunchBody>(&Bytes::from_static(b"not json")).unwrap_err();
        assert_eq!(err.0.kind(), "validation");
        let err = parse_body::<RescheduleRequest>(&Bytes::new()).unwrap_err();
        assert_eq!(err.0.kind(), "validation");
    }

    #[test]
    fn test_schedule_id_parse() {
        assert!(parse_schedule_id("Spring Launch").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_schedule_id(&id.to_string()).unwrap(), id);
    }
}
