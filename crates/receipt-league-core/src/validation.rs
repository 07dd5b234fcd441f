//! Validation utilities shared between server and client

use time::OffsetDateTime;

use crate::{CompetitionMode, CoreError};

/// Largest receipt photo accepted, 10MB
pub const MAX_RECEIPT_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Validate an uploaded receipt photo before anything is stored or sent to the vision model
pub fn validate_receipt_image(
    content_type: &str,
    size: usize,
    max_bytes: usize,
) -> Result<(), CoreError> {
    if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(CoreError::Validation("File must be an image".into()));
    }
    if size == 0 {
        return Err(CoreError::Validation("Image file is empty".into()));
    }
    if size > max_bytes {
        return Err(image_too_large(max_bytes));
    }
    Ok(())
}

/// Also returned when an upload is cut off by the request body limit
pub fn image_too_large(max_bytes: usize) -> CoreError {
    CoreError::Validation(format!(
        "Image file too large. Maximum size is {}MB",
        max_bytes / (1024 * 1024)
    ))
}

/// Validate a new competition definition
pub fn validate_competition(
    name: &str,
    mode: &CompetitionMode,
    end_date: Option<OffsetDateTime>,
) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "competition name cannot be empty".into(),
        ));
    }

    match mode {
        CompetitionMode::Goal { threshold } => {
            if *threshold == 0 {
                return Err(CoreError::Validation(
                    "goal must be greater than zero points".into(),
                ));
            }
        }
        CompetitionMode::NoGoal => {
            if end_date.is_none() {
                return Err(CoreError::Validation(
                    "competitions without a goal need an end date".into(),
                ));
            }
        }
    }

    Ok(())
}

pub fn validate_team_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("team name cannot be empty".into()));
    }
    if trimmed.chars().count() > 80 {
        return Err(CoreError::Validation(
            "team name cannot be longer than 80 characters".into(),
        ));
    }
    Ok(())
}

/// Minimal shape check, identity itself is verified upstream
pub fn validate_email(email: &str) -> Result<(), CoreError> {
    let valid = match email.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(CoreError::Validation(format!(
            "'{}' is not a valid email",
            email
        )));
    }
    Ok(())
}
