use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::{ErrorResponse, IntoResponse},
    Json,
};
use log::{debug, error};
use receipt_league_core::{image_too_large, Amount};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::extractors::CurrentUser,
    domain::{Error, ImageUpload, Receipt, ReceiptSubmission},
    startup::AppState,
};

pub async fn submit_receipt(
    CurrentUser { session }: CurrentUser,
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ErrorResponse> {
    let submission = read_submission(team_id, multipart, state.max_image_bytes).await?;
    debug!(
        "receipt upload from {} for team {}: {} ({} bytes)",
        session.email(),
        team_id,
        submission.image.file_name,
        submission.image.bytes.len()
    );

    state
        .league
        .submit_receipt(&session, submission)
        .await
        .map(|result| (StatusCode::CREATED, Json(result)))
        .map_err(|e| {
            error!("error submitting receipt for team {}: {:?}", team_id, e);
            e.into()
        })
}

pub async fn get_team_receipts(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<Uuid>,
) -> Result<Json<Vec<Receipt>>, ErrorResponse> {
    state
        .league
        .get_team_receipts(team_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error getting receipts for team {}: {:?}", team_id, e);
            e.into()
        })
}

async fn read_submission(
    team_id: Uuid,
    mut multipart: Multipart,
    max_image_bytes: usize,
) -> Result<ReceiptSubmission, Error> {
    let mut image = None;
    let mut manual_amount = None;
    let mut description = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, "invalid upload", max_image_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .map(String::from)
                    .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| upload_error(e, "invalid image upload", max_image_bytes))?;
                image = Some(ImageUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "manual_amount" => {
                if let Some(raw) = text_value(field).await? {
                    let amount = raw.parse::<Amount>().map_err(|_| {
                        Error::Validation(format!("manual amount {:?} is not a valid total", raw))
                    })?;
                    manual_amount = Some(amount);
                }
            }
            "description" => description = text_value(field).await?,
            other => debug!("ignoring upload field {:?}", other),
        }
    }

    let image = image.ok_or_else(|| Error::BadRequest(String::from("receipt image is required")))?;
    Ok(ReceiptSubmission {
        team_id,
        image,
        manual_amount,
        description,
    })
}

/// Uploads cut off by the body limit fail the same way an oversized image does
fn upload_error(e: MultipartError, context: &str, max_image_bytes: usize) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return image_too_large(max_image_bytes).into();
    }
    Error::BadRequest(format!("{}: {}", context, e))
}

/// Blank text fields count as missing
async fn text_value(field: Field<'_>) -> Result<Option<String>, Error> {
    let value = field
        .text()
        .await
        .map_err(|e| Error::BadRequest(format!("invalid form field: {}", e)))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}
