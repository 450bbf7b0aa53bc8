use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger error: {0}")]
    Redb(#[from] redb::Error),

    #[error("ledger storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("ledger transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("ledger table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("ledger commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("ledger database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
