//! The import ledger: which archive files were already imported, plus the
//! persisted settings.

use std::{collections::HashMap, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{error::Result, walker::DiscoveredFile};

/// Absolute path of an imported file -> its mtime at import.
const PROCESSED: TableDefinition<&str, u64> = TableDefinition::new("processed");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub struct Ledger {
    db: Database,
}

/// Discovered files split against the ledger.
#[derive(Debug, Default)]
pub struct FileDiff {
    /// Files never imported.
    pub new_files: Vec<DiscoveredFile>,
    /// Files imported before whose mtime has since changed.
    pub changed_files: Vec<DiscoveredFile>,
    /// Files imported with the same mtime; nothing to do.
    pub unchanged: usize,
}

impl FileDiff {
    /// New and changed files, in discovery order.
    pub fn pending(&self) -> Vec<DiscoveredFile> {
        let mut files: Vec<_> = self
            .new_files
            .iter()
            .chain(&self.changed_files)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(PROCESSED)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Processed files --

    /// Compare discovered files against what was already imported.
    pub fn diff(&self, discovered: &[DiscoveredFile]) -> Result<FileDiff> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROCESSED)?;

        let mut result = FileDiff::default();
        for file in discovered {
            match table.get(file.ledger_key().as_str())? {
                None => result.new_files.push(file.clone()),
                Some(stored) if stored.value() != file.mtime => {
                    result.changed_files.push(file.clone());
                }
                Some(_) => result.unchanged += 1,
            }
        }
        Ok(result)
    }

    /// Record files as imported, in a single transaction.
    pub fn mark_processed(&self, files: &[DiscoveredFile]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PROCESSED)?;
            for file in files {
                table.insert(file.ledger_key().as_str(), file.mtime)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn processed_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROCESSED)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Forget every imported file so the next import reads everything.
    pub fn clear_processed(&self) -> Result<usize> {
        let removed = self.processed_count()?;
        let txn = self.db.begin_write()?;
        txn.delete_table(PROCESSED)?;
        txn.open_table(PROCESSED)?;
        txn.commit()?;
        Ok(removed)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn settings(&self) -> Result<HashMap<String, String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = HashMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.insert(k.value().to_string(), v.value().to_string());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}
