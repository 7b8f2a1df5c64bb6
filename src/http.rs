use crate::aggregator::Aggregator;
use crate::config::AgentConfig;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub aggregator: Arc<Aggregator>,
    pub agent: Arc<AgentConfig>,
}

pub fn build_router(aggregator: Arc<Aggregator>, agent: Arc<AgentConfig>) -> Router {
    Router::new()
        .route("/", get(snapshot_handler))
        .route("/config", get(config_handler))
        .with_state(HttpAppState { aggregator, agent })
}

/// Fresh snapshot per request; the probe is re-sampled every time, no
/// server-side caching.
async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    match state.aggregator.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            error!(error = %err, "snapshot failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("snapshot failed: {err}"),
            )
                .into_response()
        }
    }
}

async fn config_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.agent.as_ref().clone())
}
