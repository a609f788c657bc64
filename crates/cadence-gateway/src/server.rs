use crate::middleware::{auth_middleware, rate_limit_middleware, AuthConfig, MiddlewareState};
use crate::routes;
use axum::{
    middleware as axum_mw,
    routing::{get, post, put},
    Router,
};
use cadence_orchestrator::{Orchestrator, RoundPlanner, StatusAggregator};
use cadence_security::RateLimiter;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    /// Campaign creation.
    pub planner: Arc<RoundPlanner>,
    /// Per-round lifecycle operations.
    pub orchestrator: Arc<Orchestrator>,
    /// Read-only campaign views.
    pub status: Arc<StatusAggregator>,
}

/// Builds the REST router.
pub struct GatewayServer;

impl GatewayServer {
    /// Router without auth or rate limiting.
    pub fn build(state: Arc<AppState>) -> Router {
        Self::build_with_middleware(state, None, AuthConfig::default())
    }

    /// Router with optional rate limiting and API-key auth.
    ///
    /// Rate limiting keys on the peer address, so serve the router with
    /// `into_make_service_with_connect_info::<SocketAddr>()`. Without it,
    /// callers lacking an accepted key share one bucket.
    ///
    /// `/campaigns/{key}` is a campaign name for `GET` and a schedule id
    /// everywhere else.
    pub fn build_with_middleware(
        state: Arc<AppState>,
        rate_limiter: Option<Arc<RateLimiter>>,
        auth_config: AuthConfig,
    ) -> Router {
        let app = Router::new()
            .route("/health", get(routes::health))
            .route("/campaigns", post(routes::create_campaign))
            .route(
                "/campaigns/{key}",
                get(routes::campaign_status).delete(routes::cancel),
            )
            .route("/campaigns/{key}/preflight", post(routes::pre_flight))
            .route("/campaigns/{key}/launch", post(routes::launch))
            .route("/campaigns/{key}/wrapup", post(routes::wrap_up))
            .route(
                "/campaigns/{key}/jobs",
                get(routes::jobs).post(routes::schedule_jobs),
            )
            .route("/campaigns/{key}/reschedule", put(routes::reschedule))
            .with_state(state);

        if rate_limiter.is_none() && !auth_config.is_enabled() {
            return app;
        }
        let mw_state = Arc::new(MiddlewareState {
            rate_limiter,
            auth: auth_config,
        });
        // Rate limiting is the outer layer and runs before auth.
        app.layer(axum_mw::from_fn_with_state(mw_state.clone(), auth_middleware))
            .layer(axum_mw::from_fn_with_state(
                mw_state,
                rate_limit_middleware,
            ))
    }
}
