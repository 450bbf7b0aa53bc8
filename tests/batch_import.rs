//! Batch import over temporary archive trees.

use std::path::{Path, PathBuf};

use relayscope::{Ledger, Store, batch, fingerprint_index, timestamp};

const MORIA1: &str = "9695DFC35FFEB861329B9F1AB04C46397020CE31";

fn consensus(valid_after: &str, routers: &[(&str, &str, &str)]) -> String {
    let mut text = format!(
        "@type network-status-consensus-3 1.0\n\
         network-status-version 3\n\
         valid-after {valid_after}\n\
         fresh-until {valid_after}\n\
         valid-until {valid_after}\n"
    );
    for (nickname, identity, address) in routers {
        text.push_str(&format!(
            "r {nickname} {identity} IpcU7dolas8+Q+oAzwgvZIWx7PA \
             2013-04-01 03:21:48 {address} 9001 0\n\
             s Running Valid\n"
        ));
    }
    text
}

const MORIA: (&str, &str, &str) =
    ("moria1", "lpXfw1/+uGEym58asExGOXAgzjE", "128.31.0.34");
const TOR26: (&str, &str, &str) =
    ("tor26", "AAoQ1DAR6kkoo19hBAX5K0QztNw", "86.59.21.38");

struct Archive {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    store_path: PathBuf,
    ledger: Ledger,
}

impl Archive {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("archive");
        std::fs::create_dir(&root).unwrap();
        let store_path = tmp.path().join("relays.sqlite3");
        let ledger = Ledger::open(&tmp.path().join("ledger.redb")).unwrap();
        Self {
            _tmp: tmp,
            root,
            store_path,
            ledger,
        }
    }

    fn write(&self, relative: &str, text: &str) -> PathBuf {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    fn import(&self, sources: &[PathBuf]) -> batch::BatchReport {
        let report = batch::import_consensus_sources(
            &self.store_path,
            &self.ledger,
            sources,
        )
        .unwrap();
        assert!(report.is_clean(), "{report:?}");
        report
    }

    fn store(&self) -> Store {
        Store::open(&self.store_path).unwrap()
    }
}

/// `(fp12, nickname, address, first_seen, last_seen, sid)`
type IndexTuple = (String, String, String, i64, i64, i64);

fn index_rows(store: &Store) -> Vec<IndexTuple> {
    let mut stmt = store
        .conn()
        .prepare(
            "SELECT fp12, nickname, address, first_seen, last_seen, sid
             FROM fingerprint ORDER BY fp12",
        )
        .unwrap();
    stmt.query_map([], |row| -> rusqlite::Result<IndexTuple> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })
    .unwrap()
    .collect::<rusqlite::Result<_>>()
    .unwrap()
}

fn source(archive: &Archive, name: &str) -> PathBuf {
    archive.root.join(name)
}

fn seed(archive: &Archive) {
    archive.write(
        "consensuses/2013-04-01-05-00-00-consensus",
        &consensus("2013-04-01 05:00:00", &[MORIA]),
    );
    archive.write(
        "consensuses/2013-04-01-06-00-00-consensus",
        &consensus("2013-04-01 06:00:00", &[MORIA, TOR26]),
    );
}

#[test]
fn reimport_reads_nothing_and_changes_nothing() {
    let archive = Archive::new();
    seed(&archive);
    let sources = [source(&archive, "consensuses")];

    let first = archive.import(&sources);
    assert_eq!(first.imported(), 2);
    let before = index_rows(&archive.store());

    let second = archive.import(&sources);
    assert_eq!(second.imported(), 0);
    assert_eq!(second.duplicates(), 0);
    assert_eq!(second.files_unchanged(), 2);
    assert_eq!(index_rows(&archive.store()), before);
}

#[test]
fn cleared_ledger_reimport_is_idempotent() {
    let archive = Archive::new();
    seed(&archive);
    let sources = [source(&archive, "consensuses")];
    archive.import(&sources);
    let before = archive.store().stats().unwrap();

    assert_eq!(archive.ledger.clear_processed().unwrap(), 2);
    let again = archive.import(&sources);
    assert_eq!(again.imported(), 0);
    assert_eq!(again.duplicates(), 2);
    assert_eq!(archive.store().stats().unwrap(), before);
}

#[test]
fn copied_snapshot_under_new_name_is_a_duplicate() {
    let archive = Archive::new();
    seed(&archive);
    archive.import(&[source(&archive, "consensuses")]);

    archive.write(
        "mirror/copy-consensus",
        &consensus("2013-04-01 06:00:00", &[MORIA, TOR26]),
    );
    let report = archive.import(&[source(&archive, "mirror")]);
    assert_eq!(report.duplicates(), 1);
    assert_eq!(archive.store().stats().unwrap().snapshots, 2);
}

#[test]
fn sources_import_in_parallel() {
    let archive = Archive::new();
    archive.write(
        "a/2013-04-01-05-00-00-consensus",
        &consensus("2013-04-01 05:00:00", &[MORIA]),
    );
    archive.write(
        "b/2013-04-01-06-00-00-consensus",
        &consensus("2013-04-01 06:00:00", &[MORIA, TOR26]),
    );
    let report =
        archive.import(&[source(&archive, "a"), source(&archive, "b")]);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.imported(), 2);

    let store = archive.store();
    let row = fingerprint_index::get(store.conn(), MORIA1).unwrap().unwrap();
    assert_eq!(timestamp::format(&row.last_seen), "2013-04-01 06:00:00");
    assert_eq!(store.stats().unwrap().relays, 2);
}

#[test]
fn rebuild_reproduces_in_order_index() {
    let archive = Archive::new();
    seed(&archive);
    archive.import(&[source(&archive, "consensuses")]);

    let mut store = archive.store();
    let incremental = index_rows(&store);
    assert_eq!(fingerprint_index::rebuild(store.conn_mut()).unwrap(), 2);
    assert_eq!(index_rows(&store), incremental);
}

#[test]
fn late_snapshot_needs_backfill_to_match_rebuild() {
    let archive = Archive::new();
    // Partitions import in name order, so the later snapshot lands first.
    archive.write(
        "consensuses/1-late/c",
        &consensus("2013-04-01 07:00:00", &[MORIA]),
    );
    archive.write(
        "consensuses/2-early/c",
        &consensus("2013-04-01 05:00:00", &[MORIA]),
    );
    archive.import(&[source(&archive, "consensuses")]);

    let mut store = archive.store();
    let row = fingerprint_index::get(store.conn(), MORIA1).unwrap().unwrap();
    assert_eq!(timestamp::format(&row.first_seen), "2013-04-01 07:00:00");
    assert_eq!(timestamp::format(&row.last_seen), "2013-04-01 07:00:00");

    assert_eq!(
        fingerprint_index::reconcile_first_seen(store.conn()).unwrap(),
        1
    );
    let backfilled = index_rows(&store);
    fingerprint_index::rebuild(store.conn_mut()).unwrap();
    assert_eq!(index_rows(&store), backfilled);

    let row = fingerprint_index::get(store.conn(), MORIA1).unwrap().unwrap();
    assert_eq!(timestamp::format(&row.first_seen), "2013-04-01 05:00:00");
}

#[test]
fn descriptor_archive_imports_once() {
    let archive = Archive::new();
    let descriptors = archive.write(
        "descriptors/2013-04/ab/ab12",
        "@type server-descriptor 1.0\n\
         router moria1 128.31.0.34 9101 0 9131\n\
         platform Tor 0.2.4.11-alpha on Linux\n\
         published 2013-04-01 03:21:48\n\
         accept *:80\n\
         reject *:*\n",
    );
    let root: &Path = descriptors
        .parent()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .unwrap();

    for _ in 0..2 {
        let report = batch::import_descriptor_sources(
            &archive.store_path,
            &archive.ledger,
            &[root.to_path_buf()],
            100,
        )
        .unwrap();
        assert!(report.is_clean());
    }
    assert_eq!(archive.store().stats().unwrap().descriptors, 1);
    assert_eq!(archive.ledger.processed_count().unwrap(), 1);
}
