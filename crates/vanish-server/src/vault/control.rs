use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_id, Vault};
use crate::error::Result;
use crate::lifecycle;
use crate::store::{Disposition, RecordState};

/// Holder-triggered transitions. Both can only destroy data, so knowing the
/// identifier is enough to invoke them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Expire,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    /// Secrets cleared; the public text stays until the delete window ends.
    Expired,
    /// Secrets cleared and the record trashed at once (`delete_after_days == 0`).
    Deleted,
    Killed,
    AlreadyExpired,
    AlreadyKilled,
}

impl Vault {
    pub fn control(&self, id: &str, action: ControlAction) -> Result<ControlOutcome> {
        match action {
            ControlAction::Expire => self.expire_now(id),
            ControlAction::Kill => self.kill(id),
        }
    }

    /// Expire the secrets now, as if the time limit had passed, then apply
    /// the usual delete scheduling.
    pub fn expire_now(&self, id: &str) -> Result<ControlOutcome> {
        let id = parse_id(id)?;
        let now = self.now();
        let (_, outcome) = self.store.update(&id, |record| {
            Ok(match record.state {
                RecordState::Killed { .. } => (Disposition::Unchanged, ControlOutcome::AlreadyKilled),
                RecordState::SecretsExpired { .. } => {
                    (Disposition::Unchanged, ControlOutcome::AlreadyExpired)
                }
                RecordState::Active { .. } => {
                    record.expire_secrets(now);
                    match lifecycle::apply_lifecycle_transition(record, now) {
                        Disposition::Trash => (Disposition::Trash, ControlOutcome::Deleted),
                        _ => (Disposition::Save, ControlOutcome::Expired),
                    }
                }
            })
        })?;
        if matches!(outcome, ControlOutcome::Expired | ControlOutcome::Deleted) {
            info!(id = %id, ?outcome, "secrets expired by holder");
        }
        Ok(outcome)
    }

    /// Destroy both blobs now. The record stays visible as killed until its
    /// delete window ends and the sweeper trashes it.
    pub fn kill(&self, id: &str) -> Result<ControlOutcome> {
        let id = parse_id(id)?;
        let now = self.now();
        let (_, outcome) = self.store.update(&id, |record| {
            Ok(if record.kill(now) {
                (Disposition::Save, ControlOutcome::Killed)
            } else {
                (Disposition::Unchanged, ControlOutcome::AlreadyKilled)
            })
        })?;
        if outcome == ControlOutcome::Killed {
            info!(id = %id, "record killed by holder");
        }
        Ok(outcome)
    }
}
