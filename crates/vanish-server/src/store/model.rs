use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::{Uuid, Variant};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Random 128-bit record identifier with UUIDv4 version/variant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Accepts only the 36-character hyphenated form with version 4 and the
    /// RFC 4122 variant. Anything else is treated by callers as not found.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 36 {
            return None;
        }
        let uuid = Uuid::try_parse(s).ok()?;
        if uuid.get_version_num() != 4 || uuid.get_variant() != Variant::RFC4122 {
            return None;
        }
        Some(Self(uuid))
    }

    /// Lowercase hyphenated form; the store key.
    pub fn key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Opaque client-encrypted bytes. The server never holds the key.
/// Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

/// One counted view: when, and a one-way fingerprint of where from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub at: i64,
    pub origin: String,
}

/// Where a live record is in its lifecycle. Content that has been destroyed
/// has no field to live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Active {
        text_blob: Ciphertext,
        /// Absent when the creator marked no section as secret.
        secret_blob: Option<Ciphertext>,
    },
    SecretsExpired {
        text_blob: Ciphertext,
        expired_at: i64,
    },
    Killed {
        killed_at: i64,
        /// `secrets_expired_at`: kept from before the kill, or the kill time.
        expired_at: i64,
    },
}

/// Stored in redb as bincode-encoded bytes. Every field except `state`,
/// `current_views` and `view_log` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub created_at: i64,
    pub secrets_expire_at: i64,
    pub delete_after_days: u32,
    pub max_views: u32,
    pub current_views: u32,
    /// Argon2id PHC string.
    pub password_hash: Option<String>,
    /// Number of sections (text and secret) in the creation request.
    pub section_count: u32,
    pub view_log: Vec<ViewEntry>,
    pub state: RecordState,
}

impl Record {
    pub fn text_blob(&self) -> Option<&Ciphertext> {
        match &self.state {
            RecordState::Active { text_blob, .. } | RecordState::SecretsExpired { text_blob, .. } => {
                Some(text_blob)
            }
            RecordState::Killed { .. } => None,
        }
    }

    pub fn secret_blob(&self) -> Option<&Ciphertext> {
        match &self.state {
            RecordState::Active { secret_blob, .. } => secret_blob.as_ref(),
            _ => None,
        }
    }

    pub fn secrets_expired_at(&self) -> Option<i64> {
        match self.state {
            RecordState::Active { .. } => None,
            RecordState::SecretsExpired { expired_at, .. }
            | RecordState::Killed { expired_at, .. } => Some(expired_at),
        }
    }

    pub fn killed_at(&self) -> Option<i64> {
        match self.state {
            RecordState::Killed { killed_at, .. } => Some(killed_at),
            _ => None,
        }
    }

    /// Drop the secret blob and stamp `secrets_expired_at`. A no-op when the
    /// secrets are already gone, so the first timestamp survives retries.
    /// Returns true if the state changed.
    pub fn expire_secrets(&mut self, now: i64) -> bool {
        let RecordState::Active { text_blob, .. } = &self.state else {
            return false;
        };
        self.state = RecordState::SecretsExpired {
            text_blob: text_blob.clone(),
            expired_at: now,
        };
        true
    }

    /// Destroy all content. Returns false if already killed.
    pub fn kill(&mut self, now: i64) -> bool {
        let expired_at = match self.state {
            RecordState::Killed { .. } => return false,
            RecordState::SecretsExpired { expired_at, .. } => expired_at,
            RecordState::Active { .. } => now,
        };
        self.state = RecordState::Killed {
            killed_at: now,
            expired_at,
        };
        true
    }
}
