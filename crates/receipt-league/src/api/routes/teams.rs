use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{ErrorResponse, IntoResponse},
    Json,
};
use log::error;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{api::extractors::CurrentUser, domain::Team, startup::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateTeam {
    pub name: String,
}

pub async fn create_team(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
    Path(competition_id): Path<Uuid>,
    Json(body): Json<CreateTeam>,
) -> Result<impl IntoResponse, ErrorResponse> {
    state
        .league
        .create_team(&session, competition_id, body.name)
        .await
        .map(|team| (StatusCode::CREATED, Json(team)))
        .map_err(|e| {
            error!("error creating team in {}: {:?}", competition_id, e);
            e.into()
        })
}

pub async fn join_team(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<Uuid>,
) -> Result<Json<Team>, ErrorResponse> {
    state
        .league
        .join_team(&session, team_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error joining team {}: {:?}", team_id, e);
            e.into()
        })
}
