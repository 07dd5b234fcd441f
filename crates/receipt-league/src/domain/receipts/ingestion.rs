use log::{debug, error, info, warn};
use receipt_league_core::{validate_receipt_image, Amount, Confidence, ReceiptStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    domain::{CompetitionStore, Error, Session, Team, WinnerEngine, WinnerResult},
    infra::{ImageStore, ReceiptReader, ReceiptReading},
};

use super::{
    find_duplicate, normalize_store_name, score_manual, score_receipt, DuplicateCandidate,
    FingerprintGuard, PromotionRules, Receipt, ReceiptStore, Reservation, Score,
};

pub const EXTRACTION_FAILED_MESSAGE: &str =
    "We couldn't read the total on this receipt. Upload a clearer photo or enter the total manually.";
pub const UNKNOWN_STORE: &str = "Unknown Store";

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReceiptSubmission {
    pub team_id: Uuid,
    pub image: ImageUpload,
    /// Used only when the total cannot be read from the photo
    pub manual_amount: Option<Amount>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub receipt: Receipt,
    pub promotion_applied: bool,
    /// Engine decision after an approved receipt, `None` for pending receipts or when
    /// the engine could not be reached
    pub winner: Option<WinnerResult>,
    pub notice: String,
}

/// Everything the persisted receipt needs besides ids and the image location
struct Extracted {
    amount: Amount,
    store_name: String,
    purchase_date: Option<Date>,
    currency: String,
    confidence: Confidence,
    text: Option<String>,
    status: ReceiptStatus,
    score: Score,
}

/// SHA-256 hex of the image bytes, identical photos share a fingerprint
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Clone)]
pub struct ReceiptIngestion {
    competition_store: CompetitionStore,
    receipt_store: ReceiptStore,
    engine: WinnerEngine,
    reader: Arc<dyn ReceiptReader>,
    images: Arc<dyn ImageStore>,
    promotion: PromotionRules,
    max_image_bytes: usize,
}

impl ReceiptIngestion {
    pub fn new(
        competition_store: CompetitionStore,
        receipt_store: ReceiptStore,
        engine: WinnerEngine,
        reader: Arc<dyn ReceiptReader>,
        images: Arc<dyn ImageStore>,
        promotion: PromotionRules,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            competition_store,
            receipt_store,
            engine,
            reader,
            images,
            promotion,
            max_image_bytes,
        }
    }

    pub async fn submit_receipt(
        &self,
        session: &Session,
        submission: ReceiptSubmission,
    ) -> Result<SubmitResult, Error> {
        validate_receipt_image(
            &submission.image.content_type,
            submission.image.bytes.len(),
            self.max_image_bytes,
        )?;

        let team = self
            .competition_store
            .get_team(submission.team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("team {} not found", submission.team_id)))?;

        if !team.is_member(session.email()) {
            return Err(Error::NotTeamMember);
        }

        let competition = self
            .competition_store
            .get_competition(team.competition_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("competition {} not found", team.competition_id))
            })?;
        if competition.is_completed() {
            return Err(Error::CompetitionClosed(competition.id));
        }

        let fingerprint = fingerprint(&submission.image.bytes);
        let submitter_name = session.display_name();

        let reservation_id = match self
            .receipt_store
            .reserve_fingerprint(
                competition.id,
                &fingerprint,
                session.email(),
                &submitter_name,
            )
            .await?
        {
            Reservation::Reserved(reservation_id) => reservation_id,
            Reservation::Taken {
                submitted_by,
                submitter_name,
            } => {
                info!(
                    "Rejected duplicate receipt {} in competition {}",
                    fingerprint, competition.id
                );
                return Err(Error::Duplicate {
                    original_submitter: Session::display_name_for(&submitter_name, &submitted_by),
                });
            }
        };

        let guard = FingerprintGuard::new(self.receipt_store.clone(), reservation_id);
        let receipt = match self
            .store_reserved(
                session,
                &team,
                &fingerprint,
                &submitter_name,
                guard.reservation_id(),
                submission,
            )
            .await
        {
            Ok(receipt) => {
                guard.confirmed();
                receipt
            }
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        info!(
            "Stored {} receipt {} for team {} ({} points)",
            receipt.status, receipt.id, team.id, receipt.points
        );

        let winner = if receipt.is_approved() {
            match self.engine.decide_and_finalize(competition.id, false).await {
                Ok(result) => Some(result),
                Err(e) => {
                    error!(
                        "Winner check failed after receipt {} in competition {}: {}",
                        receipt.id, competition.id, e
                    );
                    None
                }
            }
        } else {
            None
        };

        let promotion_applied = receipt.points_multiplier > 1;
        Ok(SubmitResult {
            notice: notice(&receipt),
            promotion_applied,
            winner,
            receipt,
        })
    }

    /// Runs while the fingerprint is reserved, any error here releases it
    async fn store_reserved(
        &self,
        session: &Session,
        team: &Team,
        fingerprint: &str,
        submitter_name: &str,
        reservation_id: Uuid,
        submission: ReceiptSubmission,
    ) -> Result<Receipt, Error> {
        let today = OffsetDateTime::now_utc().date();
        let ReceiptSubmission {
            image,
            manual_amount,
            description,
            ..
        } = submission;
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let extracted = match self.read(&image).await {
            Some(reading) => {
                let extracted = self.approved(reading, today);
                self.reject_lookalike(team.competition_id, &extracted).await?;
                extracted
            }
            None => match manual_amount {
                Some(amount) => pending(amount, description.as_deref()),
                None => return Err(Error::Extraction(EXTRACTION_FAILED_MESSAGE.to_string())),
            },
        };

        let receipt_id = Uuid::now_v7();
        let key = image_key(team.id, receipt_id, &image.file_name);
        let image_location = self
            .images
            .put(&key, &image.content_type, &image.bytes)
            .await
            .map_err(|e| Error::ImageStorage(e.to_string()))?;

        let receipt = Receipt {
            id: receipt_id,
            team_id: team.id,
            competition_id: team.competition_id,
            amount: extracted.amount,
            points: extracted.score.points,
            base_points: extracted.score.base_points,
            points_multiplier: extracted.score.multiplier,
            normalized_store: normalize_store_name(&extracted.store_name),
            store_name: extracted.store_name,
            purchase_date: extracted.purchase_date,
            currency: extracted.currency,
            fingerprint: fingerprint.to_string(),
            ocr_text: extracted.text,
            ocr_confidence: extracted.confidence,
            description,
            status: extracted.status,
            submitted_by: session.email().to_string(),
            submitter_name: submitter_name.to_string(),
            image_location,
            created_at: OffsetDateTime::now_utc(),
        };

        let stored = match self
            .receipt_store
            .insert_receipt_and_credit(&receipt, reservation_id)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_image(&receipt.image_location).await;
                return Err(e.into());
            }
        };

        if !stored {
            warn!(
                "Reservation {} expired before receipt {} was stored",
                reservation_id, receipt.id
            );
            self.discard_image(&receipt.image_location).await;
            return Err(Error::BadRequest(
                "The upload took too long, please submit the receipt again".to_string(),
            ));
        }

        Ok(receipt)
    }

    /// A reading is only trusted with high or medium confidence
    async fn read(&self, image: &ImageUpload) -> Option<ReceiptReading> {
        match self.reader.extract(&image.bytes, &image.content_type).await {
            Ok(reading) if reading.confidence.is_acceptable() => Some(reading),
            Ok(reading) => {
                debug!(
                    "Discarding {} confidence reading of {}",
                    reading.confidence.as_str(),
                    image.file_name
                );
                None
            }
            Err(e) if e.is_transient() => {
                warn!("Vision api busy while reading {}: {}", image.file_name, e);
                None
            }
            Err(e) => {
                warn!("Receipt extraction failed for {}: {}", image.file_name, e);
                None
            }
        }
    }

    fn approved(&self, reading: ReceiptReading, today: Date) -> Extracted {
        let score = score_receipt(reading.amount, &reading.store_name, &self.promotion, today);
        Extracted {
            amount: reading.amount,
            store_name: reading.store_name,
            purchase_date: Some(reading.date),
            currency: reading.currency,
            confidence: reading.confidence,
            text: reading.text,
            status: ReceiptStatus::Approved,
            score,
        }
    }

    async fn reject_lookalike(&self, competition_id: Uuid, extracted: &Extracted) -> Result<(), Error> {
        let existing = self
            .receipt_store
            .get_competition_receipts(competition_id)
            .await?;
        let candidate = DuplicateCandidate {
            normalized_store: normalize_store_name(&extracted.store_name),
            amount: extracted.amount,
            purchase_date: extracted.purchase_date,
            text: extracted.text.as_deref(),
        };

        match find_duplicate(&candidate, &existing) {
            Some(original) => {
                info!(
                    "Receipt matches stored receipt {} in competition {}",
                    original.id, competition_id
                );
                Err(Error::Duplicate {
                    original_submitter: Session::display_name_for(
                        &original.submitter_name,
                        &original.submitted_by,
                    ),
                })
            }
            None => Ok(()),
        }
    }

    async fn discard_image(&self, location: &str) {
        if let Err(e) = self.images.delete(location).await {
            warn!("Failed to remove orphaned receipt image {}: {}", location, e);
        }
    }
}

fn pending(amount: Amount, description: Option<&str>) -> Extracted {
    Extracted {
        amount,
        store_name: description.unwrap_or(UNKNOWN_STORE).to_string(),
        purchase_date: None,
        currency: String::from("USD"),
        confidence: Confidence::Manual,
        text: None,
        status: ReceiptStatus::Pending,
        score: score_manual(amount),
    }
}

fn image_key(team_id: Uuid, receipt_id: Uuid, file_name: &str) -> String {
    let file_name: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let file_name = file_name.trim_start_matches('.');
    if file_name.is_empty() {
        format!("{}/{}", team_id, receipt_id)
    } else {
        format!("{}/{}_{}", team_id, receipt_id, file_name)
    }
}

fn notice(receipt: &Receipt) -> String {
    match (receipt.status, receipt.points_multiplier) {
        (ReceiptStatus::Pending, _) => String::from(
            "Receipt saved and awaiting review. Points will be added once it is approved.",
        ),
        (ReceiptStatus::Approved, 1) => String::from("✓ Receipt uploaded and points added!"),
        (ReceiptStatus::Approved, 2) => {
            String::from("✓ Receipt uploaded and points added! Promotion bonus: points doubled!")
        }
        (ReceiptStatus::Approved, multiplier) => format!(
            "✓ Receipt uploaded and points added! Promotion bonus: points x{}!",
            multiplier
        ),
    }
}
