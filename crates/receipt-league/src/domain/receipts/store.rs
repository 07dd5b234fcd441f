use log::debug;
use sqlx::{sqlite::SqliteRow, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::infra::db::{
    format_date, format_timestamp, parse_required_datetime, parse_uuid, DBConnection,
};

use super::Receipt;

const RECEIPT_COLUMNS: &str = "id, team_id, competition_id, amount_mills, points, base_points,
    points_multiplier, store_name, normalized_store, purchase_date, currency, fingerprint,
    ocr_text, ocr_confidence, description, status, submitted_by, submitter_name,
    image_location, created_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Reserved(Uuid),
    /// Someone already holds this fingerprint in the competition
    Taken {
        submitted_by: String,
        submitter_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct ReceiptStore {
    db_connection: DBConnection,
}

impl ReceiptStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Create-if-absent on `(competition_id, fingerprint)`
    pub async fn reserve_fingerprint(
        &self,
        competition_id: Uuid,
        fingerprint: &str,
        submitted_by: &str,
        submitter_name: &str,
    ) -> Result<Reservation, sqlx::Error> {
        let reservation_id = Uuid::now_v7();
        let reserved_at = format_timestamp(OffsetDateTime::now_utc())?;
        let fingerprint = fingerprint.to_string();
        let submitted_by = submitted_by.to_string();
        let submitter_name = submitter_name.to_string();

        self.db_connection
            .execute_write(move |pool| async move {
                let inserted = sqlx::query(
                    "INSERT INTO receipt_fingerprints (
                        competition_id, fingerprint, reservation_id, submitted_by,
                        submitter_name, reserved_at
                    ) VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT (competition_id, fingerprint) DO NOTHING",
                )
                .bind(competition_id.to_string())
                .bind(&fingerprint)
                .bind(reservation_id.to_string())
                .bind(&submitted_by)
                .bind(&submitter_name)
                .bind(&reserved_at)
                .execute(&pool)
                .await?
                .rows_affected();

                if inserted == 1 {
                    return Ok(Reservation::Reserved(reservation_id));
                }

                let row = sqlx::query(
                    "SELECT submitted_by, submitter_name FROM receipt_fingerprints
                    WHERE competition_id = ? AND fingerprint = ?",
                )
                .bind(competition_id.to_string())
                .bind(&fingerprint)
                .fetch_one(&pool)
                .await?;

                Ok(Reservation::Taken {
                    submitted_by: row.try_get("submitted_by")?,
                    submitter_name: row.try_get("submitter_name")?,
                })
            })
            .await
            .map_err(sqlx::Error::from)
    }

    /// Drop an unconfirmed reservation, a confirmed one is never released
    pub async fn release_fingerprint(&self, reservation_id: Uuid) -> Result<bool, sqlx::Error> {
        let released = self
            .db_connection
            .execute_write(move |pool| async move {
                let result = sqlx::query(
                    "DELETE FROM receipt_fingerprints WHERE reservation_id = ? AND receipt_id IS NULL",
                )
                .bind(reservation_id.to_string())
                .execute(&pool)
                .await?;
                Ok(result.rows_affected() == 1)
            })
            .await?;

        debug!("release reservation {}: {}", reservation_id, released);
        Ok(released)
    }

    /// Remove unconfirmed reservations made before `cutoff`, returns how many were removed
    pub async fn release_stale_reservations(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        let pending = sqlx::query(
            "SELECT reservation_id, reserved_at FROM receipt_fingerprints WHERE receipt_id IS NULL",
        )
        .try_map(|row: SqliteRow| {
            Ok((
                parse_uuid(&row, "reservation_id")?,
                parse_required_datetime(&row, "reserved_at")?,
            ))
        })
        .fetch_all(self.db_connection.read())
        .await?;

        let mut released = 0;
        for (reservation_id, reserved_at) in pending {
            if reserved_at < cutoff && self.release_fingerprint(reservation_id).await? {
                released += 1;
            }
        }
        Ok(released)
    }

    pub async fn get_competition_receipts(
        &self,
        competition_id: Uuid,
    ) -> Result<Vec<Receipt>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM receipts WHERE competition_id = ? ORDER BY created_at, id",
            RECEIPT_COLUMNS
        );
        sqlx::query_as::<_, Receipt>(&query)
            .bind(competition_id.to_string())
            .fetch_all(self.db_connection.read())
            .await
    }

    pub async fn get_team_receipts(&self, team_id: Uuid) -> Result<Vec<Receipt>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM receipts WHERE team_id = ? ORDER BY created_at DESC, id DESC",
            RECEIPT_COLUMNS
        );
        sqlx::query_as::<_, Receipt>(&query)
            .bind(team_id.to_string())
            .fetch_all(self.db_connection.read())
            .await
    }

    /// Insert the receipt, confirm its reservation and credit the team in one transaction.
    ///
    /// Only approved receipts move the team totals. Returns false, with nothing written,
    /// when the reservation no longer exists.
    pub async fn insert_receipt_and_credit(
        &self,
        receipt: &Receipt,
        reservation_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let receipt = receipt.clone();
        let purchase_date = receipt.purchase_date.map(format_date).transpose()?;
        let created_at = format_timestamp(receipt.created_at)?;

        self.db_connection
            .execute_write(move |pool| async move {
                let mut tx = pool.begin().await?;

                sqlx::query(
                    "INSERT INTO receipts (
                        id, team_id, competition_id, amount_mills, points, base_points,
                        points_multiplier, store_name, normalized_store, purchase_date, currency,
                        fingerprint, ocr_text, ocr_confidence, description, status, submitted_by,
                        submitter_name, image_location, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(receipt.id.to_string())
                .bind(receipt.team_id.to_string())
                .bind(receipt.competition_id.to_string())
                .bind(receipt.amount.mills())
                .bind(receipt.points as i64)
                .bind(receipt.base_points as i64)
                .bind(receipt.points_multiplier as i64)
                .bind(&receipt.store_name)
                .bind(&receipt.normalized_store)
                .bind(purchase_date)
                .bind(&receipt.currency)
                .bind(&receipt.fingerprint)
                .bind(&receipt.ocr_text)
                .bind(receipt.ocr_confidence.as_str())
                .bind(&receipt.description)
                .bind(receipt.status.as_str())
                .bind(&receipt.submitted_by)
                .bind(&receipt.submitter_name)
                .bind(&receipt.image_location)
                .bind(created_at)
                .execute(&mut *tx)
                .await?;

                let confirmed = sqlx::query(
                    "UPDATE receipt_fingerprints SET receipt_id = ?
                    WHERE reservation_id = ? AND receipt_id IS NULL",
                )
                .bind(receipt.id.to_string())
                .bind(reservation_id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if confirmed != 1 {
                    tx.rollback().await?;
                    return Ok(false);
                }

                if receipt.is_approved() {
                    sqlx::query(
                        "UPDATE teams SET
                            total_points = total_points + ?,
                            receipts_count = receipts_count + 1
                        WHERE id = ?",
                    )
                    .bind(receipt.points as i64)
                    .bind(receipt.team_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok(true)
            })
            .await
            .map_err(sqlx::Error::from)
    }
}
