use anyhow::{Context, Result};

use crate::store::crypto::PasswordCost;

/// Inclusive bounds for creation settings.
pub const EXPIRE_DAYS_RANGE: (u32, u32) = (1, 3650);
pub const MAX_VIEWS_RANGE: (u32, u32) = (1, 10_000);
pub const DELETE_AFTER_DAYS_RANGE: (u32, u32) = (0, 3650);

/// Settings for the lifecycle engine and the store, passed to [`crate::Vault`]
/// at construction.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Used when a creation request omits `expire_days`.
    pub default_expire_days: u32,
    /// Used when a creation request omits `max_views`.
    pub default_max_views: u32,
    /// Used when a creation request omits `delete_after_days`.
    pub default_delete_after_days: u32,
    /// Upper bound on each ciphertext blob.
    pub max_blob_bytes: usize,
    /// Key for origin fingerprints. Persisted so fingerprints stay comparable
    /// across restarts.
    pub fingerprint_salt: Vec<u8>,
    pub password_cost: PasswordCost,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_expire_days: 14,
            default_max_views: 5,
            default_delete_after_days: 90,
            max_blob_bytes: 1_048_576,
            fingerprint_salt: Vec::new(),
            password_cost: PasswordCost::default(),
        }
    }
}

impl VaultConfig {
    /// Defaults overridden by `VANISH_DEFAULT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_u32("VANISH_DEFAULT_EXPIRE_DAYS")? {
            cfg.default_expire_days = v;
        }
        if let Some(v) = env_u32("VANISH_DEFAULT_MAX_VIEWS")? {
            cfg.default_max_views = v;
        }
        if let Some(v) = env_u32("VANISH_DEFAULT_DELETE_DAYS")? {
            cfg.default_delete_after_days = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults must themselves be valid creation settings.
    pub fn validate(&self) -> Result<()> {
        check_range("default_expire_days", self.default_expire_days, EXPIRE_DAYS_RANGE)?;
        check_range("default_max_views", self.default_max_views, MAX_VIEWS_RANGE)?;
        check_range(
            "default_delete_after_days",
            self.default_delete_after_days,
            DELETE_AFTER_DAYS_RANGE,
        )?;
        if self.max_blob_bytes == 0 {
            anyhow::bail!("max_blob_bytes must be positive");
        }
        Ok(())
    }

    pub fn with_fingerprint_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.fingerprint_salt = salt.into();
        self
    }
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a non-negative integer, got {v:?}")),
        Err(_) => Ok(None),
    }
}

fn check_range(name: &str, value: u32, (lo, hi): (u32, u32)) -> Result<()> {
    if value < lo || value > hi {
        anyhow::bail!("{name} must be within {lo}..={hi}, got {value}");
    }
    Ok(())
}
