//! Record lifecycle operations on top of the [`Store`].
//!
//! Every state change is a mutator handed to [`Store::update`], so creation,
//! views, manual control and the sweeper are serialized per record by the
//! store and never by locks of their own.

mod control;
mod sweep;
mod view;

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{VaultConfig, DELETE_AFTER_DAYS_RANGE, EXPIRE_DAYS_RANGE, MAX_VIEWS_RANGE};
use crate::error::{Result, VaultError};
use crate::lifecycle::SECS_PER_DAY;
use crate::store::{crypto, Ciphertext, Record, RecordId, RecordState, Store};

pub use control::{ControlAction, ControlOutcome};
pub use sweep::SweepReport;
pub use view::RecordView;

/// Fresh ids tried before giving up on a create. A collision of 122 random
/// bits means the RNG is broken, not unlucky.
const CREATE_ATTEMPTS: usize = 3;

/// Upper bound on `section_count`.
pub const MAX_SECTIONS: u32 = 10_000;

/// A creation request as handed over by the boundary. Both blobs are already
/// encrypted by the client.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub text_blob: Vec<u8>,
    pub secret_blob: Option<Vec<u8>>,
    pub section_count: u32,
    pub expire_days: Option<u32>,
    pub max_views: Option<u32>,
    pub delete_after_days: Option<u32>,
    pub password: Option<String>,
}

#[derive(Clone)]
pub struct Vault {
    store: Store,
    config: Arc<VaultConfig>,
    clock: Arc<dyn Clock>,
}

impl Vault {
    pub fn new(store: Store, config: VaultConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }

    pub fn with_clock(store: Store, config: VaultConfig, clock: impl Clock) -> Self {
        Self {
            store,
            config: Arc::new(config),
            clock: Arc::new(clock),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Validate settings, hash the password and persist a new Active record
    /// under a fresh random id.
    pub fn create(&self, new: NewRecord) -> Result<RecordId> {
        let cfg = &self.config;
        let expire_days = in_range(
            "expire_days",
            new.expire_days.unwrap_or(cfg.default_expire_days),
            EXPIRE_DAYS_RANGE,
        )?;
        let max_views = in_range(
            "max_views",
            new.max_views.unwrap_or(cfg.default_max_views),
            MAX_VIEWS_RANGE,
        )?;
        let delete_after_days = in_range(
            "delete_after_days",
            new.delete_after_days.unwrap_or(cfg.default_delete_after_days),
            DELETE_AFTER_DAYS_RANGE,
        )?;
        in_range("section_count", new.section_count, (1, MAX_SECTIONS))?;

        if new.text_blob.is_empty() {
            return Err(VaultError::invalid("text_blob must not be empty"));
        }
        if new.text_blob.len() > cfg.max_blob_bytes {
            return Err(VaultError::invalid("text_blob exceeds size limit"));
        }
        if let Some(secret) = &new.secret_blob {
            if secret.is_empty() {
                return Err(VaultError::invalid("secret_blob must not be empty when present"));
            }
            if secret.len() > cfg.max_blob_bytes {
                return Err(VaultError::invalid("secret_blob exceeds size limit"));
            }
        }

        let password_hash = match new.password.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => Some(crypto::hash_password(p, cfg.password_cost)?),
            _ => None,
        };

        let now = self.now();
        let record = Record {
            created_at: now,
            secrets_expire_at: now + i64::from(expire_days) * SECS_PER_DAY,
            delete_after_days,
            max_views,
            current_views: 0,
            password_hash,
            section_count: new.section_count,
            view_log: Vec::new(),
            state: RecordState::Active {
                text_blob: Ciphertext::new(new.text_blob),
                secret_blob: new.secret_blob.map(Ciphertext::new),
            },
        };

        for _ in 0..CREATE_ATTEMPTS {
            let id = RecordId::generate();
            match self.store.create(&id, &record) {
                Ok(()) => {
                    info!(
                        id = %id,
                        expire_days,
                        max_views,
                        delete_after_days,
                        gated = record.password_hash.is_some(),
                        "record created"
                    );
                    return Ok(id);
                }
                Err(VaultError::Conflict) => warn!(id = %id, "identifier collision, retrying"),
                Err(e) => return Err(e),
            }
        }
        Err(VaultError::Conflict)
    }

    /// Fingerprint a requester address with the configured salt.
    pub fn fingerprint(&self, origin: &str) -> String {
        crypto::fingerprint(&self.config.fingerprint_salt, origin)
    }
}

/// Malformed ids are indistinguishable from unknown ones.
pub(crate) fn parse_id(id: &str) -> Result<RecordId> {
    RecordId::parse(id).ok_or(VaultError::NotFound)
}

fn in_range(name: &str, value: u32, (lo, hi): (u32, u32)) -> Result<u32> {
    if value < lo || value > hi {
        return Err(VaultError::invalid(format!(
            "{name} must be within {lo}..={hi}"
        )));
    }
    Ok(value)
}
