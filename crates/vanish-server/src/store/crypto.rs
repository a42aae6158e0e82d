use std::path::Path;

use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use tracing::info;

use crate::error::VaultError;

type HmacSha256 = Hmac<Sha256>;

/// Length of an origin fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 12;

/// Argon2id cost parameters for record passwords.
#[derive(Debug, Clone, Copy)]
pub struct PasswordCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
        }
    }
}

impl PasswordCost {
    fn argon2(&self) -> Result<Argon2<'static>, VaultError> {
        let params = Params::new(self.memory_kib, self.iterations, 1, None)
            .map_err(|e| VaultError::invalid(format!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a record password into a self-describing PHC string.
pub fn hash_password(password: &str, cost: PasswordCost) -> Result<String, VaultError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = cost
        .argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::storage(format!("argon2 hash: {e}")))?;
    Ok(hash.to_string())
}

/// Verify against a stored PHC string. Parameters are read from the hash
/// itself, so records hashed under an older cost keep working.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// True if `phc` is an Argon2 PHC string this build can verify.
pub fn is_supported_hash(phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|h| h.algorithm.as_str().starts_with("argon2"))
        .unwrap_or(false)
}

/// Keyed one-way fingerprint of a requester address. The raw address is never
/// stored.
pub fn fingerprint(salt: &[u8], origin: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
    mac.update(origin.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    digest[..FINGERPRINT_LEN].to_owned()
}

/// Generate a fresh 32-byte random salt.
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Load the fingerprint salt from `vanish.salt`, creating it on first start.
pub fn load_or_create_salt(data_dir: &Path) -> Result<Vec<u8>> {
    let path = data_dir.join("vanish.salt");
    if path.exists() {
        let bytes = std::fs::read(&path).context("read vanish.salt")?;
        if bytes.len() != 32 {
            anyhow::bail!(
                "vanish.salt is corrupt (expected 32 bytes, got {})",
                bytes.len()
            );
        }
        Ok(bytes)
    } else {
        let salt = generate_salt();
        std::fs::write(&path, salt).context("write vanish.salt")?;
        info!("generated new fingerprint salt");
        Ok(salt.to_vec())
    }
}
