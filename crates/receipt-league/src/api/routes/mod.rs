mod competitions;
mod profile;
mod receipts;
mod system;
mod teams;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;

pub use competitions::*;
pub use profile::*;
pub use receipts::*;
pub use system::*;
pub use teams::*;

use crate::domain::Error;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Duplicate { .. } | Error::CompetitionClosed(_) | Error::AlreadyOnTeam(_) => {
                StatusCode::CONFLICT
            }
            Error::NotTeamMember => StatusCode::FORBIDDEN,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::DbError(_) | Error::ImageStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!("internal error: {}", self);
            String::from("internal server error")
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
