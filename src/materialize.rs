//! Response records built from query rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    query::RelayRow,
    ranges::StatusRange,
    store::StatusEntry,
    timestamp,
};

/// Nickname carried by relays that never chose one.
pub const UNNAMED: &str = "Unnamed";

/// The compact per-relay record of `/summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaySummary {
    pub f: String,
    pub a: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    pub r: bool,
}

/// The per-relay record of `/details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayDetail {
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub or_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_addresses: Option<Vec<String>>,
    pub running: bool,
    #[serde(serialize_with = "timestamp::serialize")]
    pub first_seen: DateTime<Utc>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub last_seen: DateTime<Utc>,
}

/// Envelope shared by `/summary` and `/details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaysResponse<T> {
    /// `valid_after` of the latest snapshot; null for an empty store.
    #[serde(serialize_with = "timestamp::serialize_opt")]
    pub relays_published: Option<DateTime<Utc>>,
    /// Every matching relay, regardless of offset and limit.
    pub count: u64,
    pub relays: Vec<T>,
}

/// One status entry of a relay's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    #[serde(serialize_with = "timestamp::serialize")]
    pub valid_after: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub address: String,
    pub or_port: u16,
    pub dir_port: u16,
    pub flags: Vec<&'static str>,
}

/// A condensed window of a relay's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CondensedStatus {
    #[serde(serialize_with = "timestamp::serialize")]
    pub first_seen: DateTime<Utc>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub address: String,
    pub statuses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusList {
    Entries(Vec<StatusRecord>),
    Condensed(Vec<CondensedStatus>),
}

impl StatusList {
    pub fn len(&self) -> usize {
        match self {
            Self::Entries(v) => v.len(),
            Self::Condensed(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Envelope of `/statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusesResponse {
    #[serde(serialize_with = "timestamp::serialize_opt")]
    pub relays_published: Option<DateTime<Utc>>,
    pub fingerprint: String,
    /// Status entries in the requested window, before paging.
    pub total_status_count: u64,
    pub statuses: StatusList,
}

fn display_nickname(nickname: &str) -> Option<String> {
    (nickname != UNNAMED).then(|| nickname.to_string())
}

fn is_running(row: &RelayRow, latest: Option<DateTime<Utc>>) -> bool {
    latest == Some(row.last_seen)
}

pub fn summary(row: &RelayRow, latest: Option<DateTime<Utc>>) -> RelaySummary {
    RelaySummary {
        f: row.fingerprint.clone(),
        a: vec![row.address.clone()],
        n: display_nickname(&row.nickname),
        r: is_running(row, latest),
    }
}

pub fn detail(row: &RelayRow, latest: Option<DateTime<Utc>>) -> RelayDetail {
    RelayDetail {
        fingerprint: row.fingerprint.clone(),
        nickname: display_nickname(&row.nickname),
        or_addresses: vec![format!("{}:{}", row.address, row.or_port)],
        dir_addresses: (row.dir_port != 0)
            .then(|| vec![format!("{}:{}", row.address, row.dir_port)]),
        running: is_running(row, latest),
        first_seen: row.first_seen,
        last_seen: row.last_seen,
    }
}

pub fn status_record(entry: &StatusEntry) -> StatusRecord {
    StatusRecord {
        valid_after: entry.valid_after,
        nickname: display_nickname(&entry.nickname),
        address: entry.address.clone(),
        or_port: entry.or_port,
        dir_port: entry.dir_port,
        flags: entry.flags.iter().map(|f| f.name()).collect(),
    }
}

pub fn condensed(range: &StatusRange) -> CondensedStatus {
    CondensedStatus {
        first_seen: range.first_seen,
        last_seen: range.last_seen,
        nickname: display_nickname(&range.nickname),
        address: range.address.clone(),
        statuses: range.statuses,
    }
}
