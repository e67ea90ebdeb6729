use rusqlite::ffi;

use crate::snapshot::SnapshotError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid container name {0:?}")]
    InvalidContainerName(String),

    #[error("unknown ordering field {field:?} for {kind} container")]
    UnknownOrderingField { kind: &'static str, field: String },

    #[error("refusing to store invalid record {0:?}")]
    InvalidRecord(String),

    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("database lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// A primary-key collision: the record is already stored.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.extended_code,
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
            ),
            _ => false,
        }
    }
}
