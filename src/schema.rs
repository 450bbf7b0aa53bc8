//! Relational schema for snapshots, status entries, the fingerprint index
//! and server descriptors.

use rusqlite::{Connection, OptionalExtension};

use crate::{
    error::{Error, Result},
    flags::RelayFlag,
};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables if they don't exist.
///
/// Refuses to open a database written by a newer schema.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;

    if current == 0 {
        conn.execute_batch(&create_tables_sql())?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "store schema version {current} is newer than supported \
             version {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables_sql() -> String {
    let flag_columns: String = RelayFlag::ALL
        .iter()
        .map(|flag| {
            format!("            {} INTEGER NOT NULL DEFAULT 0,\n", flag.column())
        })
        .collect();

    format!(
        r#"
        CREATE TABLE IF NOT EXISTS consensus (
            valid_after INTEGER PRIMARY KEY,
            fresh_until INTEGER NOT NULL,
            valid_until INTEGER NOT NULL
        );

        -- One row per (snapshot, relay); never updated once written
        CREATE TABLE IF NOT EXISTS status_entry (
            id INTEGER PRIMARY KEY,
            valid_after INTEGER NOT NULL REFERENCES consensus(valid_after),
            fingerprint TEXT NOT NULL,
            nickname TEXT NOT NULL,
            published INTEGER NOT NULL,
            digest TEXT NOT NULL,
            address TEXT NOT NULL,
            or_port INTEGER NOT NULL,
            dir_port INTEGER NOT NULL,
            version_line TEXT,
            bandwidth INTEGER,
            measured INTEGER,
{flag_columns}            is_unmeasured INTEGER NOT NULL DEFAULT 0,
            UNIQUE (valid_after, fingerprint)
        );

        -- One row per relay keyed by a 12-char fingerprint prefix
        CREATE TABLE IF NOT EXISTS fingerprint (
            fp12 TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            digest TEXT NOT NULL,
            nickname TEXT NOT NULL,
            address TEXT NOT NULL,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            sid INTEGER NOT NULL REFERENCES status_entry(id)
        );

        CREATE TABLE IF NOT EXISTS descriptor (
            descriptor TEXT PRIMARY KEY,
            fingerprint TEXT,
            nickname TEXT NOT NULL,
            published INTEGER,
            address TEXT NOT NULL,
            or_port INTEGER NOT NULL,
            dir_port INTEGER NOT NULL,
            platform TEXT,
            uptime INTEGER,
            contact BLOB,
            exit_policy TEXT,
            average_bandwidth INTEGER,
            burst_bandwidth INTEGER,
            observed_bandwidth INTEGER,
            hibernating INTEGER NOT NULL DEFAULT 0,
            extra_info_digest TEXT,
            is_bridge INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_status_entry_fingerprint
            ON status_entry(fingerprint, valid_after);
        CREATE INDEX IF NOT EXISTS idx_status_entry_valid_after
            ON status_entry(valid_after);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_last_seen
            ON fingerprint(last_seen DESC, fp12);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_fingerprint
            ON fingerprint(fingerprint);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_address
            ON fingerprint(address);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_nickname
            ON fingerprint(nickname);
        CREATE INDEX IF NOT EXISTS idx_descriptor_fingerprint
            ON descriptor(fingerprint);
        CREATE INDEX IF NOT EXISTS idx_descriptor_published
            ON descriptor(published);
        "#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn every_flag_has_a_column() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for flag in RelayFlag::ALL {
            let sql = format!("SELECT {} FROM status_entry", flag.column());
            conn.prepare(&sql).unwrap();
        }
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(init_schema(&conn), Err(Error::Config(_))));
    }
}
