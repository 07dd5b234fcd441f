use axum::{extract::State, http::StatusCode, response::IntoResponse};
use log::{debug, error};
use std::sync::Arc;

use crate::startup::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = state.league.ping().await {
        error!("health check failed: {}", e);
        return (StatusCode::SERVICE_UNAVAILABLE, String::from("database unavailable"));
    }

    for (thread_name, thread) in state.background_threads.iter() {
        if thread.is_finished() {
            error!("background task {} has stopped, the service needs a restart", thread_name);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("{} stopped", thread_name),
            );
        }
    }

    debug!("service, background tasks, and db are up");
    (StatusCode::OK, String::from("OK"))
}
