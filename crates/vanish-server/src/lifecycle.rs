//! Lifecycle rules for a record: when its secrets expire and when it leaves
//! the live table for good.
//!
//! Everything here is pure. The request path, manual control and the sweeper
//! all run [`apply_lifecycle_transition`] inside a store write transaction, so
//! they cannot disagree about what a record's next state is.

use serde::Serialize;

use crate::store::{Disposition, Record, RecordState};

pub const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Active,
    SecretsExpired,
    Killed,
}

/// What a record's fields say should happen to it at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Phase after the pending mutations are applied.
    pub phase: Phase,
    /// The secret blob must be dropped and `secrets_expired_at` stamped.
    pub expire_secrets: bool,
    /// The record must be moved to the trash.
    pub trash: bool,
}

impl Verdict {
    pub fn is_noop(&self) -> bool {
        !self.expire_secrets && !self.trash
    }
}

/// Time limit and view limit count the same.
pub fn secrets_due(record: &Record, now: i64) -> bool {
    now >= record.secrets_expire_at || record.current_views >= record.max_views
}

fn delete_after_secs(record: &Record) -> i64 {
    i64::from(record.delete_after_days) * SECS_PER_DAY
}

/// When the record becomes eligible for the trash, once its secrets expired.
pub fn delete_at(record: &Record) -> Option<i64> {
    record
        .secrets_expired_at()
        .map(|expired_at| expired_at.saturating_add(delete_after_secs(record)))
}

/// Saturating so a far-future stamp means "not yet" instead of wrapping.
fn window_closed(expired_at: i64, delete_after: i64, now: i64) -> bool {
    now >= expired_at.saturating_add(delete_after)
}

pub fn evaluate(record: &Record, now: i64) -> Verdict {
    let delete_after = delete_after_secs(record);
    match record.state {
        RecordState::Killed { expired_at, .. } => Verdict {
            phase: Phase::Killed,
            expire_secrets: false,
            trash: window_closed(expired_at, delete_after, now),
        },
        RecordState::SecretsExpired { expired_at, .. } => Verdict {
            phase: Phase::SecretsExpired,
            expire_secrets: false,
            trash: delete_after == 0 || window_closed(expired_at, delete_after, now),
        },
        RecordState::Active { .. } if secrets_due(record, now) => Verdict {
            phase: Phase::SecretsExpired,
            expire_secrets: true,
            // expired_at becomes `now` on this pass
            trash: delete_after == 0,
        },
        RecordState::Active { .. } => Verdict {
            phase: Phase::Active,
            expire_secrets: false,
            trash: false,
        },
    }
}

/// Apply whatever [`evaluate`] says is due. Idempotent: a second call at the
/// same or a later instant never re-clears, never moves the expiry stamp, and
/// never resurrects content.
pub fn apply_lifecycle_transition(record: &mut Record, now: i64) -> Disposition {
    let verdict = evaluate(record, now);
    let changed = verdict.expire_secrets && record.expire_secrets(now);
    if verdict.trash {
        Disposition::Trash
    } else if changed {
        Disposition::Save
    } else {
        Disposition::Unchanged
    }
}
