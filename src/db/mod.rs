pub mod paste_repository;
pub mod user_repository;

use redb::backends::InMemoryBackend;
use redb::{
    Database as RedbDatabase, MultimapTableDefinition, ReadableTable, TableDefinition,
    WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub(crate) const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
pub(crate) const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
pub(crate) const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");
pub(crate) const PASTES: TableDefinition<u64, &[u8]> = TableDefinition::new("pastes");
pub(crate) const SHARE_IDS: TableDefinition<&str, u64> = TableDefinition::new("share_ids");
pub(crate) const OWNED_PASTES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("owned_pastes");
/// (paste id, grantee id) -> can_edit
pub(crate) const GRANTS: TableDefinition<(u64, u64), bool> = TableDefinition::new("grants");
pub(crate) const GRANTED_TO: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("granted_to");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    DuplicateUsername,

    #[error("could not allocate a unique share id after {0} attempts")]
    ShareIdExhausted(usize),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode record: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! redb_error_into_store_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Database(e.into())
                }
            }
        )*
    };
}

redb_error_into_store_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

#[derive(Clone)]
pub struct Database {
    pub db: Arc<RedbDatabase>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = RedbDatabase::create(path)?;
        Self::with_tables(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let db = RedbDatabase::builder().create_with_backend(InMemoryBackend::new())?;
        Self::with_tables(db)
    }

    /// Read transactions fail on tables that were never created, so every
    /// table is opened once up front.
    fn with_tables(db: RedbDatabase) -> Result<Self, StoreError> {
        let txn = db.begin_write()?;
        {
            txn.open_table(SEQUENCES)?;
            txn.open_table(USERS)?;
            txn.open_table(USERNAMES)?;
            txn.open_table(PASTES)?;
            txn.open_table(SHARE_IDS)?;
            txn.open_multimap_table(OWNED_PASTES)?;
            txn.open_table(GRANTS)?;
            txn.open_multimap_table(GRANTED_TO)?;
        }
        txn.commit()?;
        Ok(Database { db: Arc::new(db) })
    }

    /// Cheap liveness probe for the health endpoint.
    pub fn ping(&self) -> bool {
        self.db
            .begin_read()
            .map(|txn| txn.open_table(SEQUENCES).is_ok())
            .unwrap_or(false)
    }
}

/// Allocates the next id of the named sequence inside `txn`.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> Result<u64, StoreError> {
    let mut table = txn.open_table(SEQUENCES)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}
