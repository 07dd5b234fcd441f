use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{ErrorResponse, IntoResponse},
    Json,
};
use log::error;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::extractors::CurrentUser,
    domain::{Competition, CreateCompetition, Team, WinnerNotice, WinnerResult},
    startup::AppState,
};

pub async fn create_competition(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCompetition>,
) -> Result<impl IntoResponse, ErrorResponse> {
    state
        .league
        .create_competition(&session, body)
        .await
        .map(|competition| (StatusCode::CREATED, Json(competition)))
        .map_err(|e| {
            error!("error creating competition: {:?}", e);
            e.into()
        })
}

pub async fn get_competition(
    State(state): State<Arc<AppState>>,
    Path(competition_id): Path<Uuid>,
) -> Result<Json<Competition>, ErrorResponse> {
    state
        .league
        .get_competition(competition_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error getting competition {}: {:?}", competition_id, e);
            e.into()
        })
}

pub async fn get_competition_teams(
    State(state): State<Arc<AppState>>,
    Path(competition_id): Path<Uuid>,
) -> Result<Json<Vec<Team>>, ErrorResponse> {
    state
        .league
        .get_teams(competition_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error getting teams for {}: {:?}", competition_id, e);
            e.into()
        })
}

pub async fn decide_competition(
    State(state): State<Arc<AppState>>,
    Path(competition_id): Path<Uuid>,
) -> Result<Json<WinnerResult>, ErrorResponse> {
    state
        .league
        .decide(competition_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error deciding competition {}: {:?}", competition_id, e);
            e.into()
        })
}

pub async fn get_winner_message(
    State(state): State<Arc<AppState>>,
    Path((competition_id, team_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Option<WinnerNotice>>, ErrorResponse> {
    state
        .league
        .winner_message(competition_id, team_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!(
                "error getting winner message for team {} in {}: {:?}",
                team_id, competition_id, e
            );
            e.into()
        })
}
