pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod import;
pub mod lifecycle;
pub mod server;
pub mod store;
pub mod vault;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: vault::Vault,
    /// Optional API key for operator routes.
    pub api_key: Option<String>,
    pub trust_forwarded: bool,
}

pub use config::VaultConfig;
pub use error::VaultError;
pub use lifecycle::Phase;
pub use server::{open_vault, resolve_data_dir, router, run, ServerConfig};
pub use vault::{ControlAction, ControlOutcome, NewRecord, RecordView, SweepReport, Vault};
