use thiserror::Error;

/// Errors surfaced by the record store and the lifecycle operations built on it.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Unknown or malformed identifier, or the record was moved to the trash.
    #[error("not found")]
    NotFound,

    /// Identifier collision on create.
    #[error("identifier already in use")]
    Conflict,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("password required")]
    AuthRequired,

    #[error("wrong password")]
    AuthFailed,

    /// The durable write did not complete. Nothing may be assumed about the
    /// mutation that was attempted.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl VaultError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;

macro_rules! storage_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for VaultError {
                fn from(err: $ty) -> Self {
                    Self::storage(err)
                }
            }
        )*
    };
}

storage_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    bincode::error::EncodeError,
    bincode::error::DecodeError,
    std::io::Error,
);
