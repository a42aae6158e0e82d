use tracing::{debug, info};

use super::{parse_id, Vault};
use crate::error::{Result, VaultError};
use crate::lifecycle::{self, Phase};
use crate::store::{crypto, Ciphertext, Disposition, Record, RecordId, ViewEntry};

/// What the rendering boundary gets back from a read. Never plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub id: RecordId,
    pub phase: Phase,
    pub text_blob: Option<Ciphertext>,
    pub secret_blob: Option<Ciphertext>,
    /// Secret sections existed or may have existed and are gone for good.
    /// Positions missing from the text blob render as masked.
    pub masked: bool,
    /// This read used up the view limit. It still carries the secret blob;
    /// the next read will not.
    pub last_view: bool,
    pub section_count: u32,
    pub current_views: u32,
    pub max_views: u32,
    pub created_at: i64,
    pub secrets_expire_at: i64,
    pub secrets_expired_at: Option<i64>,
    pub delete_at: Option<i64>,
    pub killed_at: Option<i64>,
}

impl RecordView {
    fn of(id: RecordId, record: &Record, phase: Phase) -> Self {
        Self {
            id,
            phase,
            text_blob: record.text_blob().cloned(),
            secret_blob: record.secret_blob().cloned(),
            masked: phase == Phase::SecretsExpired,
            last_view: false,
            section_count: record.section_count,
            current_views: record.current_views,
            max_views: record.max_views,
            created_at: record.created_at,
            secrets_expire_at: record.secrets_expire_at,
            secrets_expired_at: record.secrets_expired_at(),
            delete_at: lifecycle::delete_at(record),
            killed_at: record.killed_at(),
        }
    }
}

enum Seen {
    View(RecordView),
    Gone,
}

impl Vault {
    /// Read a record on behalf of a holder.
    ///
    /// The password gate comes first and failing it changes nothing. A read
    /// of an Active record counts one view and logs the requester's
    /// fingerprint; the read that reaches `max_views` clears the secrets in the
    /// same transaction yet still returns them. Reads of expired or killed
    /// records never count and, when nothing is due, never take the write
    /// lock.
    pub fn view(&self, id: &str, password: Option<&str>, origin: &str) -> Result<RecordView> {
        let id = parse_id(id)?;
        let snapshot = self.store.read(&id)?;

        if let Some(hash) = &snapshot.password_hash {
            match password {
                None => return Err(VaultError::AuthRequired),
                Some(p) if !crypto::verify_password(p, hash) => {
                    debug!(id = %id, "password rejected");
                    return Err(VaultError::AuthFailed);
                }
                Some(_) => {}
            }
        }

        let now = self.now();
        let verdict = lifecycle::evaluate(&snapshot, now);
        if verdict.phase == Phase::Killed
            || (verdict.phase == Phase::SecretsExpired && verdict.is_noop())
        {
            return Ok(RecordView::of(id, &snapshot, verdict.phase));
        }

        let fingerprint = self.fingerprint(origin);
        let (_, seen) = self.store.update(&id, |record| {
            let verdict = lifecycle::evaluate(record, now);
            match verdict.phase {
                Phase::Active => Ok(count_view(id, record, now, fingerprint)),
                // a concurrent kill landed between snapshot and lock
                Phase::Killed => Ok((
                    Disposition::Unchanged,
                    Seen::View(RecordView::of(id, record, Phase::Killed)),
                )),
                Phase::SecretsExpired => {
                    let disposition = lifecycle::apply_lifecycle_transition(record, now);
                    let seen = if disposition == Disposition::Trash {
                        Seen::Gone
                    } else {
                        Seen::View(RecordView::of(id, record, Phase::SecretsExpired))
                    };
                    Ok((disposition, seen))
                }
            }
        })?;

        match seen {
            Seen::View(view) => Ok(view),
            Seen::Gone => {
                info!(id = %id, "record deleted on read");
                Err(VaultError::NotFound)
            }
        }
    }
}

/// Count one view of an Active record. Runs inside the store transaction.
fn count_view(id: RecordId, record: &mut Record, now: i64, origin: String) -> (Disposition, Seen) {
    record.current_views += 1;
    record.view_log.push(ViewEntry { at: now, origin });

    // Captured before any clearing below; this response keeps the secrets.
    let mut view = RecordView::of(id, record, Phase::Active);

    if record.current_views < record.max_views {
        return (Disposition::Save, Seen::View(view));
    }

    view.last_view = true;
    let disposition = match lifecycle::apply_lifecycle_transition(record, now) {
        Disposition::Trash => Disposition::Trash,
        _ => Disposition::Save,
    };
    view.secrets_expired_at = record.secrets_expired_at();
    view.delete_at = lifecycle::delete_at(record);
    info!(id = %id, views = record.current_views, "view limit reached, secrets cleared");
    (disposition, Seen::View(view))
}
