use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::json;
use tracing::{info, warn};

use tally_agent::runtime::Orchestrator;
use tally_slack::events::{parse_payload, WebhookDispatch};
use tally_slack::signature;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub signing_secret: SecretString,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/slack/events", post(receive)).with_state(state)
}

/// Events API entry point. Slack retries any delivery not acknowledged
/// within three seconds, so the pipeline runs on a detached task and the
/// acknowledgment goes out immediately.
async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let timestamp = header_str(&headers, TIMESTAMP_HEADER);
    let provided = header_str(&headers, SIGNATURE_HEADER);

    if let Err(error) =
        signature::verify(&state.signing_secret, timestamp, &body, provided, Utc::now())
    {
        warn!(error = %error, "rejected unauthenticated webhook request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match parse_payload(&body) {
        Ok(WebhookDispatch::Challenge(challenge)) => {
            info!("answered url verification challenge");
            Json(json!({ "challenge": challenge })).into_response()
        }
        Ok(WebhookDispatch::Event(event)) => {
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                let outcome = orchestrator.handle(&event).await;
                info!(outcome = ?outcome, "pipeline run finished");
            });
            StatusCode::OK.into_response()
        }
        Ok(WebhookDispatch::Ignored) => StatusCode::OK.into_response(),
        Err(error) => {
            warn!(error = %error, "webhook payload was not parseable");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> &'h str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or("")
}
