use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use tally_agent::runtime::Orchestrator;

#[derive(Clone)]
pub struct HealthState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub entries: usize,
    pub hits: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: CacheHealth,
    pub tracked_threads: usize,
    pub checked_at: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { orchestrator })
}

/// Liveness plus a glance at in-memory state. The pipeline holds no
/// persistent connections, so a responding process is a ready process.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.orchestrator.cache_stats();

    let payload = HealthResponse {
        status: "ready",
        cache: CacheHealth { entries: stats.entries, hits: stats.hits },
        tracked_threads: state.orchestrator.tracked_threads(),
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::router;

    #[tokio::test]
    async fn health_reports_ready_with_empty_stores() {
        let state = crate::webhook::tests::state();
        let request =
            Request::builder().uri("/health").body(Body::empty()).expect("request builds");

        let response =
            router(state.orchestrator).oneshot(request).await.expect("handler runs");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 4_096).await.expect("body reads");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["cache"]["entries"], 0);
        assert_eq!(payload["tracked_threads"], 0);
    }
}
