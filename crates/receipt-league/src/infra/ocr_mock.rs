use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use receipt_league_core::{Amount, Confidence};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::ocr::{Error, ReceiptReader, ReceiptReading};

/// Offline stand-in for the vision api.
///
/// Queued readings are handed out first, after that every photo reads as a
/// high confidence receipt whose total is derived from the image bytes so the
/// same photo always produces the same amount.
#[derive(Clone, Default)]
pub struct MockReceiptReader {
    queued: Arc<RwLock<VecDeque<Result<ReceiptReading, String>>>>,
}

impl MockReceiptReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_reading(&self, reading: ReceiptReading) {
        if let Ok(mut queued) = self.queued.write() {
            queued.push_back(Ok(reading));
        }
    }

    pub fn queue_failure(&self, reason: &str) {
        if let Ok(mut queued) = self.queued.write() {
            queued.push_back(Err(reason.to_string()));
        }
    }

    fn next_queued(&self) -> Option<Result<ReceiptReading, String>> {
        self.queued.write().ok().and_then(|mut queued| queued.pop_front())
    }

    /// $1.00 to $100.99, picked by the image hash
    fn derived_reading(image: &[u8]) -> Result<ReceiptReading, Error> {
        let digest = Sha256::digest(image);
        let seed = u16::from_be_bytes([digest[0], digest[1]]) as i64;
        let amount = Amount::from_cents(100 + seed % 10_000).map_err(|e| Error::Parse(e.to_string()))?;

        Ok(ReceiptReading {
            amount,
            store_name: String::from("Mock Market"),
            date: OffsetDateTime::now_utc().date(),
            currency: String::from("USD"),
            confidence: Confidence::High,
            text: Some(format!("mock market receipt {} total {}", hex::encode(&digest[..4]), amount)),
        })
    }
}

#[async_trait]
impl ReceiptReader for MockReceiptReader {
    async fn extract(&self, image: &[u8], _content_type: &str) -> Result<ReceiptReading, Error> {
        match self.next_queued() {
            Some(Ok(reading)) => Ok(reading),
            Some(Err(reason)) => Err(Error::Parse(reason)),
            None => Self::derived_reading(image),
        }
    }
}
