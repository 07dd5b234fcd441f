use axum::{extract::State, response::ErrorResponse, Json};
use log::{debug, error};
use std::sync::Arc;

use crate::{
    api::extractors::CurrentUser,
    domain::{ProfileUpdate, UserProfile},
    startup::AppState,
};

pub async fn get_profile(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<UserProfile>, ErrorResponse> {
    state
        .league
        .get_profile(session.email())
        .await
        .map(Json)
        .map_err(|e| {
            debug!("no profile for {}: {:?}", session.email(), e);
            e.into()
        })
}

pub async fn update_profile(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, ErrorResponse> {
    state
        .league
        .update_profile(&session, body)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error updating profile for {}: {:?}", session.email(), e);
            e.into()
        })
}
