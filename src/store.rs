use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    error::Result,
    flags::{FlagSet, RelayFlag},
    schema,
    timestamp,
};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A stored consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub valid_after: DateTime<Utc>,
    pub fresh_until: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// A stored status entry, as handed to the fingerprint index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub id: i64,
    pub valid_after: DateTime<Utc>,
    pub fingerprint: String,
    pub nickname: String,
    pub digest: String,
    pub address: String,
    pub or_port: u16,
    pub dir_port: u16,
    pub published: DateTime<Utc>,
    pub flags: FlagSet,
}

/// Row counts shown by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub snapshots: u64,
    pub status_entries: u64,
    pub relays: u64,
    pub descriptors: u64,
}

/// The relational store holding snapshots, status entries, the fingerprint
/// index and server descriptors.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a store at the given path.
    ///
    /// The database runs in WAL mode so read-only queries proceed while an
    /// import holds the write lock.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// The most recent snapshot, if any has been imported.
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        Ok(self
            .conn
            .query_row(
                "SELECT valid_after, fresh_until, valid_until FROM consensus
                 ORDER BY valid_after DESC LIMIT 1",
                [],
                |row| {
                    Ok(Snapshot {
                        valid_after: timestamp::from_unix(row.get(0)?),
                        fresh_until: timestamp::from_unix(row.get(1)?),
                        valid_until: timestamp::from_unix(row.get(2)?),
                    })
                },
            )
            .optional()?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<u64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };
        Ok(StoreStats {
            snapshots: count("consensus")?,
            status_entries: count("status_entry")?,
            relays: count("fingerprint")?,
            descriptors: count("descriptor")?,
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Columns selected by [`status_entry_from_row`], in order.
pub(crate) fn status_entry_columns() -> String {
    let flags: Vec<&str> = RelayFlag::ALL.iter().map(|f| f.column()).collect();
    format!(
        "id, valid_after, fingerprint, nickname, digest, address, or_port, \
         dir_port, published, {}",
        flags.join(", ")
    )
}

pub(crate) fn status_entry_from_row(row: &Row<'_>) -> rusqlite::Result<StatusEntry> {
    let mut flags = FlagSet::default();
    for (i, flag) in RelayFlag::ALL.iter().enumerate() {
        if row.get::<_, bool>(9 + i)? {
            flags.insert(*flag);
        }
    }
    Ok(StatusEntry {
        id: row.get(0)?,
        valid_after: timestamp::from_unix(row.get(1)?),
        fingerprint: row.get(2)?,
        nickname: row.get(3)?,
        digest: row.get(4)?,
        address: row.get(5)?,
        or_port: row.get(6)?,
        dir_port: row.get(7)?,
        published: timestamp::from_unix(row.get(8)?),
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_has_no_snapshot() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.latest_snapshot().unwrap(), None);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn reopen_preserves_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relays.sqlite3");
        {
            let store = Store::open(&path).unwrap();
            store
                .conn()
                .execute(
                    "INSERT INTO consensus VALUES (100, 200, 300)",
                    [],
                )
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(timestamp::to_unix(&latest.valid_after), 100);
    }
}
