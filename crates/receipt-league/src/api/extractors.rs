use axum::{extract::FromRequestParts, http::request::Parts};
use log::debug;
use receipt_league_core::validate_email;
use std::sync::Arc;

use crate::{
    domain::{Error, Session},
    startup::AppState,
};

/// Header the fronting auth proxy sets to the signed in member's email
pub const USER_HEADER: &str = "x-league-user";

/// The caller, resolved to their stored profile
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session: Session,
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Unauthorized(format!("missing {} header", USER_HEADER)))?;

        validate_email(email)
            .map_err(|_| Error::Unauthorized(format!("invalid {} header", USER_HEADER)))?;

        let session = state.league.load_session(email).await?;
        debug!("request from {}", session.email());
        Ok(CurrentUser { session })
    }
}
