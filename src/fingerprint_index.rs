//! The per-relay fingerprint index.
//!
//! One row per relay, keyed by a 12-character fingerprint prefix, records
//! the first and last time the relay was seen together with the details of
//! its most recent status entry. Rows are maintained incrementally as
//! status entries are stored, in whatever order snapshots arrive.
//!
//! [`upsert`] runs two statements on every call: a conditional update that
//! only advances `last_seen`, and an insert-if-absent. Each is atomic at the
//! row level and a no-op when its precondition fails, so concurrent
//! importers need no lock of their own and `last_seen` can never move
//! backwards.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    error::Result,
    store::{StatusEntry, status_entry_columns, status_entry_from_row},
    timestamp,
};

/// Length of the fingerprint prefix used as the index key.
pub const PREFIX_LEN: usize = 12;

/// The index key for a fingerprint.
pub fn prefix(fingerprint: &str) -> &str {
    fingerprint.get(..PREFIX_LEN).unwrap_or(fingerprint)
}

/// A fingerprint index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub fp12: String,
    pub fingerprint: String,
    pub digest: String,
    pub nickname: String,
    pub address: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sid: i64,
}

/// What an [`upsert`] did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the prefix; one was created.
    Inserted,
    /// The entry is newer than the row's `last_seen`; the row moved forward.
    Advanced,
    /// The entry is not newer than what the row already holds.
    Unchanged,
}

/// Fold a newly stored status entry into the index.
pub fn upsert(conn: &Connection, entry: &StatusEntry) -> Result<UpsertOutcome> {
    let fp12 = prefix(&entry.fingerprint);
    let seen = timestamp::to_unix(&entry.valid_after);

    let advanced = conn
        .prepare_cached(
            "UPDATE fingerprint
             SET fingerprint = ?1, digest = ?2, nickname = ?3, address = ?4,
                 last_seen = ?5, sid = ?6
             WHERE fp12 = ?7 AND last_seen < ?5",
        )?
        .execute(params![
            entry.fingerprint,
            entry.digest,
            entry.nickname,
            entry.address,
            seen,
            entry.id,
            fp12,
        ])?;

    let inserted = conn
        .prepare_cached(
            "INSERT INTO fingerprint
                 (fp12, fingerprint, digest, nickname, address,
                  first_seen, last_seen, sid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
             ON CONFLICT(fp12) DO NOTHING",
        )?
        .execute(params![
            fp12,
            entry.fingerprint,
            entry.digest,
            entry.nickname,
            entry.address,
            seen,
            entry.id,
        ])?;

    Ok(if inserted > 0 {
        UpsertOutcome::Inserted
    } else if advanced > 0 {
        UpsertOutcome::Advanced
    } else {
        UpsertOutcome::Unchanged
    })
}

/// Lower `first_seen` if `entry` predates it.
///
/// Not part of [`upsert`]: backfilling is an explicit reconciliation step.
/// Returns whether the row changed.
pub fn lower_first_seen(conn: &Connection, entry: &StatusEntry) -> Result<bool> {
    let seen = timestamp::to_unix(&entry.valid_after);
    let changed = conn
        .prepare_cached(
            "UPDATE fingerprint SET first_seen = ?1
             WHERE fp12 = ?2 AND first_seen > ?1",
        )?
        .execute(params![seen, prefix(&entry.fingerprint)])?;
    Ok(changed > 0)
}

/// Backfill every row's `first_seen` from the earliest stored status entry
/// of its relay. Returns the number of rows changed.
pub fn reconcile_first_seen(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE fingerprint
         SET first_seen = (
             SELECT MIN(s.valid_after) FROM status_entry AS s
             WHERE s.fingerprint = fingerprint.fingerprint
         )
         WHERE first_seen > (
             SELECT MIN(s.valid_after) FROM status_entry AS s
             WHERE s.fingerprint = fingerprint.fingerprint
         )",
        [],
    )?;
    tracing::info!(rows = changed, "reconciled first_seen");
    Ok(changed)
}

/// Recreate the index from stored status entries.
///
/// Entries are replayed oldest first, so the result matches an index
/// maintained while importing snapshots in chronological order. Returns
/// the number of index rows.
pub fn rebuild(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM fingerprint", [])?;
    let mut replayed = 0usize;
    {
        let sql = format!(
            "SELECT {} FROM status_entry ORDER BY valid_after, id",
            status_entry_columns()
        );
        let mut stmt = tx.prepare(&sql)?;
        let entries = stmt.query_map([], status_entry_from_row)?;
        for entry in entries {
            upsert(&tx, &entry?)?;
            replayed += 1;
        }
    }
    let rows: usize =
        tx.query_row("SELECT COUNT(*) FROM fingerprint", [], |row| row.get(0))?;
    tx.commit()?;
    tracing::info!(replayed, rows, "rebuilt fingerprint index");
    Ok(rows)
}

/// Fetch the index row for a fingerprint (or any string sharing its prefix).
pub fn get(conn: &Connection, fingerprint: &str) -> Result<Option<IndexRow>> {
    Ok(conn
        .query_row(
            "SELECT fp12, fingerprint, digest, nickname, address,
                    first_seen, last_seen, sid
             FROM fingerprint WHERE fp12 = ?",
            [prefix(fingerprint)],
            |row| {
                Ok(IndexRow {
                    fp12: row.get(0)?,
                    fingerprint: row.get(1)?,
                    digest: row.get(2)?,
                    nickname: row.get(3)?,
                    address: row.get(4)?,
                    first_seen: timestamp::from_unix(row.get(5)?),
                    last_seen: timestamp::from_unix(row.get(6)?),
                    sid: row.get(7)?,
                })
            },
        )
        .optional()?)
}
