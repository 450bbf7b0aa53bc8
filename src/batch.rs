//! Parallel import of archive directories.
//!
//! Every top-level source directory gets its own worker and its own store
//! connection. Within a source, partitions (see
//! [`walker::partition_source`]) are imported strictly one after another,
//! which bounds how much of an archive is in flight at once. A document
//! that fails is rolled back and recorded; the rest of the batch goes on.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::{
    document,
    error::Result,
    ingest::{self, DescriptorWriter, ImportOutcome},
    ledger::Ledger,
    store::Store,
    walker::{self, DiscoveredFile},
};

/// A document that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of importing one source directory.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source: PathBuf,
    /// Archive files found under the source.
    pub files_seen: usize,
    /// Files skipped because the ledger says they were imported already.
    pub files_unchanged: usize,
    /// Documents newly stored.
    pub imported: usize,
    /// Snapshots that were already in the store.
    pub duplicates: usize,
    /// Status entries written by imported snapshots.
    pub statuses: usize,
    pub failures: Vec<DocumentFailure>,
    /// Set when the source could not be processed at all.
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            ..Self::default()
        }
    }

    fn fail(&mut self, file: &DiscoveredFile, err: &crate::Error) {
        tracing::warn!(
            path = %file.absolute_path.display(),
            error = %err,
            "document import failed"
        );
        self.failures.push(DocumentFailure {
            path: file.absolute_path.clone(),
            error: err.to_string(),
        });
    }
}

/// Outcome of a batch import, one report per source, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub sources: Vec<SourceReport>,
}

impl BatchReport {
    pub fn imported(&self) -> usize {
        self.sources.iter().map(|s| s.imported).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.duplicates).sum()
    }

    pub fn files_unchanged(&self) -> usize {
        self.sources.iter().map(|s| s.files_unchanged).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentFailure> {
        self.sources.iter().flat_map(|s| s.failures.iter())
    }

    /// True when no source and no document failed.
    pub fn is_clean(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.error.is_none() && s.failures.is_empty())
    }
}

/// Import consensus documents from every source directory.
///
/// Fails only if the store itself cannot be opened; every other problem is
/// reported per source or per document.
pub fn import_consensus_sources(
    store_path: &Path,
    ledger: &Ledger,
    sources: &[PathBuf],
) -> Result<BatchReport> {
    run_sources(store_path, sources, |source, report| {
        import_consensus_source(store_path, ledger, source, report)
    })
}

/// Import server descriptors from every source directory, committing every
/// `commit_after` rows.
pub fn import_descriptor_sources(
    store_path: &Path,
    ledger: &Ledger,
    sources: &[PathBuf],
    commit_after: usize,
) -> Result<BatchReport> {
    run_sources(store_path, sources, |source, report| {
        import_descriptor_source(store_path, ledger, source, commit_after, report)
    })
}

fn run_sources<F>(
    store_path: &Path,
    sources: &[PathBuf],
    import: F,
) -> Result<BatchReport>
where
    F: Fn(&Path, &mut SourceReport) -> Result<()> + Sync,
{
    // Create the schema once before workers open their own connections.
    drop(Store::open(store_path)?);

    let sources = sources
        .par_iter()
        .map(|source| {
            let mut report = SourceReport::new(source);
            tracing::info!(source = %source.display(), "importing source");
            if let Err(err) = import(source.as_path(), &mut report) {
                tracing::error!(
                    source = %source.display(),
                    error = %err,
                    "source import failed"
                );
                report.error = Some(err.to_string());
            }
            report
        })
        .collect();

    Ok(BatchReport { sources })
}

fn import_consensus_source(
    store_path: &Path,
    ledger: &Ledger,
    source: &Path,
    report: &mut SourceReport,
) -> Result<()> {
    let mut store = Store::open(store_path)?;

    for partition in walker::partition_source(source)? {
        let diff = ledger.diff(&partition.files)?;
        report.files_seen += partition.files.len();
        report.files_unchanged += diff.unchanged;
        tracing::debug!(
            partition = %partition.root.display(),
            pending = diff.new_files.len() + diff.changed_files.len(),
            "importing partition"
        );

        let mut done = Vec::new();
        for file in diff.pending() {
            match import_consensus_file(&mut store, &file) {
                Ok(ImportOutcome::Imported { statuses, .. }) => {
                    report.imported += 1;
                    report.statuses += statuses;
                    done.push(file);
                }
                Ok(ImportOutcome::Skipped) => {
                    report.duplicates += 1;
                    done.push(file);
                }
                Err(err) => report.fail(&file, &err),
            }
        }
        ledger.mark_processed(&done)?;
    }
    Ok(())
}

fn import_consensus_file(
    store: &mut Store,
    file: &DiscoveredFile,
) -> Result<ImportOutcome> {
    let text = std::fs::read_to_string(&file.absolute_path)?;
    let doc = document::parse_consensus(&text)?;
    ingest::import_snapshot(store.conn_mut(), &doc)
}

fn import_descriptor_source(
    store_path: &Path,
    ledger: &Ledger,
    source: &Path,
    commit_after: usize,
    report: &mut SourceReport,
) -> Result<()> {
    let mut store = Store::open(store_path)?;
    let mut writer = DescriptorWriter::new(store.conn_mut(), commit_after);

    for partition in walker::partition_source(source)? {
        let diff = ledger.diff(&partition.files)?;
        report.files_seen += partition.files.len();
        report.files_unchanged += diff.unchanged;

        // Files whose rows may still sit in the writer's buffer.
        let mut uncommitted = Vec::new();
        for file in diff.pending() {
            let descriptors = match read_descriptors(&file) {
                Ok(descriptors) => descriptors,
                Err(err) => {
                    report.fail(&file, &err);
                    continue;
                }
            };
            let name = file.file_name();
            let total = descriptors.len();
            for (i, desc) in descriptors.into_iter().enumerate() {
                writer.push(ingest::descriptor_key(&name, i, total), desc)?;
            }
            report.imported += total;
            uncommitted.push(file);

            if writer.pending() == 0 {
                ledger.mark_processed(&uncommitted)?;
                uncommitted.clear();
            }
        }
        writer.flush()?;
        ledger.mark_processed(&uncommitted)?;
    }

    let inserted = writer.finish()?;
    tracing::debug!(source = %source.display(), inserted, "descriptors stored");
    Ok(())
}

fn read_descriptors(
    file: &DiscoveredFile,
) -> Result<Vec<document::ServerDescriptor>> {
    let text = std::fs::read_to_string(&file.absolute_path)?;
    document::parse_server_descriptors(&text)
}
