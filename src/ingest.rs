use rusqlite::{Connection, Transaction, TransactionBehavior, params};

use crate::{
    document::{ConsensusDocument, RouterStatus, ServerDescriptor},
    error::Result,
    fingerprint_index::{self, UpsertOutcome},
    flags::RelayFlag,
    store::StatusEntry,
    timestamp,
};

/// What [`import_snapshot`] did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The snapshot was new; `statuses` status entries were stored.
    Imported { statuses: usize, new_relays: usize },
    /// A snapshot with the same `valid_after` was already stored.
    Skipped,
}

/// Store a consensus document and fold its entries into the fingerprint
/// index.
///
/// Everything happens in one immediate transaction. The snapshot row is
/// inserted first with `ON CONFLICT DO NOTHING`; if that changes nothing the
/// document was imported before and the call returns
/// [`ImportOutcome::Skipped`] without touching anything else.
pub fn import_snapshot(
    conn: &mut Connection,
    doc: &ConsensusDocument,
) -> Result<ImportOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let valid_after = timestamp::to_unix(&doc.valid_after);

    let created = tx.execute(
        "INSERT INTO consensus (valid_after, fresh_until, valid_until)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(valid_after) DO NOTHING",
        params![
            valid_after,
            timestamp::to_unix(&doc.fresh_until),
            timestamp::to_unix(&doc.valid_until),
        ],
    )?;
    if created == 0 {
        tracing::info!(
            valid_after = %timestamp::format(&doc.valid_after),
            "snapshot already imported, skipping"
        );
        return Ok(ImportOutcome::Skipped);
    }

    let mut new_relays = 0;
    for router in &doc.routers {
        let entry = insert_status(&tx, doc, router)?;
        if fingerprint_index::upsert(&tx, &entry)? == UpsertOutcome::Inserted {
            new_relays += 1;
        }
    }
    tx.commit()?;

    tracing::debug!(
        valid_after = %timestamp::format(&doc.valid_after),
        statuses = doc.routers.len(),
        new_relays,
        "imported snapshot"
    );
    Ok(ImportOutcome::Imported {
        statuses: doc.routers.len(),
        new_relays,
    })
}

fn insert_status(
    tx: &Transaction<'_>,
    doc: &ConsensusDocument,
    router: &RouterStatus,
) -> Result<StatusEntry> {
    let flag_columns: Vec<&str> =
        RelayFlag::ALL.iter().map(|f| f.column()).collect();
    let sql = format!(
        "INSERT INTO status_entry
             (valid_after, fingerprint, nickname, published, digest, address,
              or_port, dir_port, version_line, bandwidth, measured,
              is_unmeasured, {})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, {})",
        flag_columns.join(", "),
        (0..RelayFlag::ALL.len())
            .map(|i| format!("?{}", 13 + i))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let mut values: Vec<rusqlite::types::Value> = vec![
        timestamp::to_unix(&doc.valid_after).into(),
        router.fingerprint.clone().into(),
        router.nickname.clone().into(),
        timestamp::to_unix(&router.published).into(),
        router.digest.clone().into(),
        router.address.clone().into(),
        i64::from(router.or_port).into(),
        i64::from(router.dir_port).into(),
        router.version_line.clone().into(),
        router.bandwidth.into(),
        router.measured.into(),
        router.is_unmeasured.into(),
    ];
    values.extend(
        RelayFlag::ALL
            .iter()
            .map(|flag| router.flags.contains(*flag).into()),
    );

    tx.prepare_cached(&sql)?
        .execute(rusqlite::params_from_iter(values))?;

    Ok(StatusEntry {
        id: tx.last_insert_rowid(),
        valid_after: doc.valid_after,
        fingerprint: router.fingerprint.clone(),
        nickname: router.nickname.clone(),
        digest: router.digest.clone(),
        address: router.address.clone(),
        or_port: router.or_port,
        dir_port: router.dir_port,
        published: router.published,
        flags: router.flags,
    })
}

/// Key identifying a descriptor in the `descriptor` table.
///
/// Archive files are named after their descriptor digest; when one file
/// holds several descriptors each gets an ordinal suffix.
pub fn descriptor_key(file_name: &str, index: usize, total: usize) -> String {
    if total <= 1 {
        return file_name.to_string();
    }
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    format!("{stem}:{index}")
}

/// Buffers server descriptors and writes them in transactions of
/// `commit_after` rows.
///
/// Descriptors already present are left alone.
pub struct DescriptorWriter<'a> {
    conn: &'a mut Connection,
    commit_after: usize,
    pending: Vec<(String, ServerDescriptor)>,
    inserted: usize,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(conn: &'a mut Connection, commit_after: usize) -> Self {
        Self {
            conn,
            commit_after: commit_after.max(1),
            pending: Vec::new(),
            inserted: 0,
        }
    }

    /// Queue a descriptor. Returns `true` if this call committed a batch.
    pub fn push(&mut self, key: String, desc: ServerDescriptor) -> Result<bool> {
        self.pending.push((key, desc));
        if self.pending.len() >= self.commit_after {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Number of rows queued but not yet committed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Commit queued rows.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO descriptor
                     (descriptor, fingerprint, nickname, published, address,
                      or_port, dir_port, platform, uptime, contact,
                      exit_policy, average_bandwidth, burst_bandwidth,
                      observed_bandwidth, hibernating, extra_info_digest,
                      is_bridge)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                         ?13, ?14, ?15, ?16, ?17)",
            )?;
            for (key, d) in &self.pending {
                inserted += stmt.execute(params![
                    key,
                    d.fingerprint,
                    d.nickname,
                    d.published.as_ref().map(timestamp::to_unix),
                    d.address,
                    d.or_port,
                    d.dir_port,
                    d.platform,
                    d.uptime,
                    d.contact,
                    d.exit_policy.join(", "),
                    d.average_bandwidth,
                    d.burst_bandwidth,
                    d.observed_bandwidth,
                    d.hibernating,
                    d.extra_info_digest,
                    d.is_bridge,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(
            rows = self.pending.len(),
            inserted,
            "committed descriptor batch"
        );
        self.inserted += inserted;
        self.pending.clear();
        Ok(())
    }

    /// Commit the remainder and return how many rows were newly inserted.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.inserted)
    }
}
