//! relayscope - an archive of relay network consensus history.
//!
//! relayscope imports archived network status consensuses and server
//! descriptors into a SQLite store, maintains a per-relay fingerprint index
//! (first seen, last seen, latest identity) as snapshots arrive in any
//! order, and answers summary, detail and status-history queries over it.
//!
//! # Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use relayscope::{DataDir, SearchFilters, Store, service};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = Store::open(&data_dir.store_db()).unwrap();
//!
//! let params = HashMap::from([
//!     ("search".to_string(), "moria".to_string()),
//!     ("running".to_string(), "true".to_string()),
//! ]);
//! let filters = SearchFilters::from_params(&params).unwrap();
//!
//! let response = service::summary(store.conn(), &filters, 50).unwrap();
//! for relay in &response.relays {
//!     println!("{} {}", relay.f, relay.a.join(","));
//! }
//! ```

pub mod batch;
pub mod config;
pub mod data_dir;
pub mod document;
pub mod error;
pub mod explain;
pub mod fingerprint_index;
pub mod flags;
pub mod ingest;
pub mod ledger;
pub mod maintenance;
pub mod materialize;
pub mod query;
pub mod ranges;
pub mod schema;
pub mod server;
pub mod service;
pub mod store;
pub mod timestamp;
pub mod walker;

pub use config::Config;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use query::SearchFilters;
pub use store::Store;
