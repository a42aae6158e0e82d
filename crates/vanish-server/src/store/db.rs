use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::debug;

use super::model::{Record, RecordId};
use crate::error::{Result, VaultError};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const TRASH: TableDefinition<&str, &[u8]> = TableDefinition::new("trash");

/// Leading byte of every encoded record, so the layout can change later
/// without guessing.
const RECORD_V1_MARKER: u8 = 0x01;

/// What an [`Store::update`] mutator wants done with the record it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing to persist; the transaction is aborted.
    Unchanged,
    /// Persist the mutated record.
    Save,
    /// Persist the mutated record into the trash and drop it from the live
    /// table, in one transaction.
    Trash,
}

/// Thread-safe handle to the redb store.
///
/// Every mutation is one redb write transaction covering the whole
/// read-modify-write of a single record. redb admits one writer at a time, so
/// two mutations of the same id can never interleave. Plain reads use MVCC
/// read transactions and never wait for the writer.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(RECORDS)?;
        write_txn.open_table(TRASH)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a new record. Fails with `Conflict` if the id is live or has
    /// ever been trashed: identifiers are never reused.
    pub fn create(&self, id: &RecordId, record: &Record) -> Result<()> {
        let key = id.key();
        let bytes = encode(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let trash = write_txn.open_table(TRASH)?;
            let mut live = write_txn.open_table(RECORDS)?;
            if trash.get(key.as_str())?.is_some() || live.get(key.as_str())?.is_some() {
                return Err(VaultError::Conflict);
            }
            live.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %key, "stored record");
        Ok(())
    }

    /// Snapshot of a live record.
    pub fn read(&self, id: &RecordId) -> Result<Record> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let raw_bytes: Option<Vec<u8>> =
            table.get(id.key().as_str())?.map(|guard| guard.value().to_vec());
        match raw_bytes {
            Some(bytes) => decode(&bytes),
            None => Err(VaultError::NotFound),
        }
    }

    /// Run `mutator` on the current record and persist according to the
    /// [`Disposition`] it returns, all inside one write transaction. An error
    /// from the mutator aborts without writing.
    pub fn update<T>(
        &self,
        id: &RecordId,
        mutator: impl FnOnce(&mut Record) -> Result<(Disposition, T)>,
    ) -> Result<(Disposition, T)> {
        let key = id.key();
        let write_txn = self.db.begin_write()?;
        let (disposition, value) = {
            let mut live = write_txn.open_table(RECORDS)?;

            // Clone the bytes so the AccessGuard is dropped before any mutation.
            let raw_bytes: Option<Vec<u8>> =
                live.get(key.as_str())?.map(|guard| guard.value().to_vec());
            let Some(bytes) = raw_bytes else {
                return Err(VaultError::NotFound);
            };

            let mut record = decode(&bytes)?;
            let (disposition, value) = mutator(&mut record)?;
            match disposition {
                Disposition::Unchanged => {}
                Disposition::Save => {
                    let updated = encode(&record)?;
                    live.insert(key.as_str(), updated.as_slice())?;
                }
                Disposition::Trash => {
                    let final_bytes = encode(&record)?;
                    live.remove(key.as_str())?;
                    let mut trash = write_txn.open_table(TRASH)?;
                    trash.insert(key.as_str(), final_bytes.as_slice())?;
                }
            }
            (disposition, value)
        };

        if disposition == Disposition::Unchanged {
            write_txn.abort()?;
        } else {
            write_txn.commit()?;
        }
        match disposition {
            Disposition::Save => debug!(id = %key, "updated record"),
            Disposition::Trash => debug!(id = %key, "moved record to trash"),
            Disposition::Unchanged => {}
        }
        Ok((disposition, value))
    }

    /// Move a record out of the live table as it is.
    pub fn move_to_trash(&self, id: &RecordId) -> Result<()> {
        self.update(id, |_| Ok((Disposition::Trash, ())))?;
        Ok(())
    }

    /// Ids of every live record at the time of the call.
    pub fn ids(&self) -> Result<Vec<RecordId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let mut ids = Vec::new();
        for item in table.iter()? {
            let (k, _v) = item?;
            match RecordId::parse(k.value()) {
                Some(id) => ids.push(id),
                None => tracing::warn!(key = %k.value(), "skipping malformed record key"),
            }
        }
        Ok(ids)
    }

    /// True if the id is live or trashed.
    pub fn contains(&self, id: &RecordId) -> Result<bool> {
        let key = id.key();
        let read_txn = self.db.begin_read()?;
        let live = read_txn.open_table(RECORDS)?;
        let trash = read_txn.open_table(TRASH)?;
        Ok(live.get(key.as_str())?.is_some() || trash.get(key.as_str())?.is_some())
    }

    pub fn count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.len()?)
    }

    pub fn trash_count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRASH)?;
        Ok(table.len()?)
    }

    /// Read a trashed record, for offline audit tooling only. Nothing on the
    /// request path calls this.
    pub fn read_trashed(&self, id: &RecordId) -> Result<Record> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRASH)?;
        let raw_bytes: Option<Vec<u8>> =
            table.get(id.key().as_str())?.map(|guard| guard.value().to_vec());
        match raw_bytes {
            Some(bytes) => decode(&bytes),
            None => Err(VaultError::NotFound),
        }
    }
}

/// Encode a Record as `[RECORD_V1_MARKER] + bincode(record)`.
fn encode(record: &Record) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<Record> {
    match bytes.split_first() {
        Some((&RECORD_V1_MARKER, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
            Ok(record)
        }
        Some((marker, _)) => Err(VaultError::Storage(format!(
            "unknown record format marker {marker:#04x}"
        ))),
        None => Err(VaultError::storage("empty record")),
    }
}
