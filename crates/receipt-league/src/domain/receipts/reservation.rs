use log::{debug, warn};
use tokio::runtime::Handle;
use uuid::Uuid;

use super::ReceiptStore;

/// Holds a fingerprint reservation until the submission either commits or gives up.
///
/// Dropping the guard without calling [`FingerprintGuard::confirmed`] releases the
/// reservation in the background, so a cancelled request does not block the receipt.
pub struct FingerprintGuard {
    store: ReceiptStore,
    reservation_id: Uuid,
    armed: bool,
}

impl FingerprintGuard {
    pub fn new(store: ReceiptStore, reservation_id: Uuid) -> Self {
        Self {
            store,
            reservation_id,
            armed: true,
        }
    }

    pub fn reservation_id(&self) -> Uuid {
        self.reservation_id
    }

    /// The reservation now points at a stored receipt, keep it
    pub fn confirmed(mut self) {
        self.armed = false;
    }

    pub async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.store.release_fingerprint(self.reservation_id).await {
            warn!(
                "Failed to release fingerprint reservation {}: {}",
                self.reservation_id, e
            );
        }
    }
}

impl Drop for FingerprintGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let reservation_id = self.reservation_id;
        match Handle::try_current() {
            Ok(handle) => {
                debug!("Releasing abandoned reservation {}", reservation_id);
                handle.spawn(async move {
                    if let Err(e) = store.release_fingerprint(reservation_id).await {
                        warn!(
                            "Failed to release abandoned reservation {}: {}",
                            reservation_id, e
                        );
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to release reservation {}, the sweeper will clear it",
                reservation_id
            ),
        }
    }
}
