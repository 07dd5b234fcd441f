mod duplicates;
mod ingestion;
mod reservation;
mod scoring;
mod store;

pub use duplicates::*;
pub use ingestion::*;
pub use reservation::*;
pub use scoring::*;
pub use store::*;

use receipt_league_core::{Amount, Confidence, ReceiptStatus};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    config::calendar_date,
    infra::db::{parse_optional_date, parse_required_datetime, parse_required_enum, parse_uuid},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub team_id: Uuid,
    pub competition_id: Uuid,
    pub amount: Amount,
    /// Final points, fixed when the receipt is created
    pub points: u64,
    pub base_points: u64,
    pub points_multiplier: u64,
    pub store_name: String,
    /// Lowercase alphanumerics of `store_name`, used for duplicate matching
    pub normalized_store: String,
    #[serde(with = "calendar_date::option")]
    pub purchase_date: Option<Date>,
    pub currency: String,
    /// SHA-256 hex of the uploaded image bytes
    pub fingerprint: String,
    pub ocr_text: Option<String>,
    pub ocr_confidence: Confidence,
    pub description: Option<String>,
    pub status: ReceiptStatus,
    pub submitted_by: String,
    pub submitter_name: String,
    pub image_location: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Receipt {
    pub fn is_approved(&self) -> bool {
        self.status == ReceiptStatus::Approved
    }
}

impl FromRow<'_, SqliteRow> for Receipt {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let amount = Amount::from_mills(row.try_get("amount_mills")?).map_err(|e| {
            sqlx::Error::ColumnDecode {
                index: "amount_mills".to_string(),
                source: Box::new(e),
            }
        })?;

        Ok(Receipt {
            id: parse_uuid(row, "id")?,
            team_id: parse_uuid(row, "team_id")?,
            competition_id: parse_uuid(row, "competition_id")?,
            amount,
            points: row.try_get::<i64, _>("points")?.max(0) as u64,
            base_points: row.try_get::<i64, _>("base_points")?.max(0) as u64,
            points_multiplier: row.try_get::<i64, _>("points_multiplier")?.max(1) as u64,
            store_name: row.try_get("store_name")?,
            normalized_store: row.try_get("normalized_store")?,
            purchase_date: parse_optional_date(row, "purchase_date")?,
            currency: row.try_get("currency")?,
            fingerprint: row.try_get("fingerprint")?,
            ocr_text: row.try_get("ocr_text")?,
            ocr_confidence: parse_required_enum(row, "ocr_confidence")?,
            description: row.try_get("description")?,
            status: parse_required_enum(row, "status")?,
            submitted_by: row.try_get("submitted_by")?,
            submitter_name: row.try_get("submitter_name")?,
            image_location: row.try_get("image_location")?,
            created_at: parse_required_datetime(row, "created_at")?,
        })
    }
}
