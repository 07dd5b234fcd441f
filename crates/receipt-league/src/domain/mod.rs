mod competitions;
mod league;
mod receipts;
mod users;

pub use competitions::*;
pub use league::*;
pub use receipts::*;
use receipt_league_core::CoreError;
use thiserror::Error;
pub use users::*;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Extraction(String),
    #[error("This receipt was already submitted by {original_submitter}")]
    Duplicate { original_submitter: String },
    #[error("problem querying db: {0}")]
    DbError(#[from] sqlx::Error),
    #[error("competition {0} has already finished, no more receipts can be submitted")]
    CompetitionClosed(Uuid),
    #[error("you must be a member of this team to submit receipts")]
    NotTeamMember,
    #[error("you are already on team {0} in this competition")]
    AlreadyOnTeam(String),
    #[error("failed to store receipt image: {0}")]
    ImageStorage(String),
    #[error("{0}")]
    Unauthorized(String),
}

impl From<CoreError> for Error {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::Validation(msg) => Error::Validation(msg),
            other => Error::Validation(other.to_string()),
        }
    }
}
