use log::{debug, error, info};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::domain::{Error, ReceiptStore};

use super::{CompetitionStore, WinnerEngine};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active competitions past their end date
    pub examined: usize,
    pub finalized: usize,
    pub failed: usize,
    pub released_reservations: u64,
}

/// Forces the winner engine to close competitions whose end date has passed
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    competition_store: CompetitionStore,
    receipt_store: ReceiptStore,
    engine: WinnerEngine,
    sweep_interval: Duration,
    reservation_ttl: Duration,
}

impl ExpirySweeper {
    pub fn new(
        competition_store: CompetitionStore,
        receipt_store: ReceiptStore,
        engine: WinnerEngine,
        sweep_interval: Duration,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            competition_store,
            receipt_store,
            engine,
            sweep_interval,
            reservation_ttl,
        }
    }

    pub async fn watch(&self, cancel_token: CancellationToken) -> Result<(), anyhow::Error> {
        info!("Starting expiry sweeper");

        loop {
            if cancel_token.is_cancelled() {
                info!("Expiry sweeper received cancellation");
                break;
            }

            match self.sweep().await {
                Ok(report) => {
                    debug!("Expiry sweep completed: {:?}", report);
                }
                Err(e) => {
                    error!("Expiry sweep error: {}", e);
                }
            }

            tokio::select! {
                _ = sleep(self.sweep_interval) => continue,
                _ = cancel_token.cancelled() => {
                    info!("Expiry sweeper cancelled during sleep");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One pass over the active competitions, a failure on one never stops the others
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let now = OffsetDateTime::now_utc();
        let mut report = SweepReport::default();

        let cutoff = now - self.reservation_ttl;
        match self.receipt_store.release_stale_reservations(cutoff).await {
            Ok(released) => {
                if released > 0 {
                    info!("Released {} stale fingerprint reservations", released);
                }
                report.released_reservations = released;
            }
            Err(e) => error!("Failed to release stale reservations: {}", e),
        }

        let expired: Vec<_> = self
            .competition_store
            .get_active_competitions()
            .await?
            .into_iter()
            .filter(|competition| competition.has_ended(now))
            .collect();

        debug!("Found {} expired active competitions", expired.len());

        for competition in expired {
            report.examined += 1;
            match self.engine.decide_and_finalize(competition.id, true).await {
                Ok(result) if result.has_winner => {
                    info!(
                        "Closed expired competition {} ({}): {}",
                        competition.id,
                        competition.name,
                        result.message.unwrap_or_default()
                    );
                    report.finalized += 1;
                }
                Ok(_) => {
                    debug!(
                        "Expired competition {} has no teams, leaving it active",
                        competition.id
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to close expired competition {}: {}",
                        competition.id, e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
