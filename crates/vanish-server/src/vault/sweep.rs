use std::time::Duration;

use serde::Serialize;
use tokio::time;
use tracing::{debug, info, warn};

use super::Vault;
use crate::error::{Result, VaultError};
use crate::lifecycle;
use crate::store::{Disposition, RecordState};

/// Counts from one pass of [`Vault::sweep`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    /// Records whose secrets this pass cleared.
    pub expired: usize,
    /// Records this pass moved to the trash.
    pub trashed: usize,
    /// Records whose transaction failed; retried on the next pass.
    pub failed: usize,
}

impl Vault {
    /// Advance every live record through expiry and deletion, whether or not
    /// anyone reads it. Each record is its own transaction running the same
    /// transition as the request path, so overlapping sweeps and reads
    /// converge on the same state.
    pub fn sweep(&self) -> Result<SweepReport> {
        let ids = self.store.ids()?;
        let mut report = SweepReport::default();

        for id in ids {
            report.scanned += 1;
            let now = self.now();
            let res = self.store.update(&id, |record| {
                let was_active = matches!(record.state, RecordState::Active { .. });
                let disposition = lifecycle::apply_lifecycle_transition(record, now);
                let expired = was_active && !matches!(record.state, RecordState::Active { .. });
                Ok((disposition, expired))
            });
            match res {
                Ok((disposition, expired)) => {
                    if expired {
                        report.expired += 1;
                    }
                    if disposition == Disposition::Trash {
                        report.trashed += 1;
                    }
                }
                // trashed by a read or another sweep since the id snapshot
                Err(VaultError::NotFound) => debug!(id = %id, "record gone before sweep"),
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %id, error = %e, "sweep failed for record");
                }
            }
        }

        if report.expired > 0 || report.trashed > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                trashed = report.trashed,
                failed = report.failed,
                "sweep complete"
            );
        }
        Ok(report)
    }

    /// Spawn a background Tokio task that calls `sweep()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                let vault = self.clone();
                match tokio::task::spawn_blocking(move || vault.sweep()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "background sweep error"),
                    Err(e) => warn!(error = %e, "background sweep task panicked"),
                }
            }
        })
    }
}
