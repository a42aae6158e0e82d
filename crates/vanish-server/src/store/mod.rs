pub mod crypto;
pub mod db;
pub mod model;

pub use db::{Disposition, Store};
pub use model::{Ciphertext, Record, RecordId, RecordState, ViewEntry};
