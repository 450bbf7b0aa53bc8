//! The read operations behind both the HTTP routes and the CLI.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::{
    error::{Error, Result},
    fingerprint_index,
    materialize::{
        self,
        RelayDetail,
        RelaySummary,
        RelaysResponse,
        StatusList,
        StatusesResponse,
    },
    query::{self, QueryPlan, SearchFilters},
    ranges,
};

/// `valid_after` of the most recent snapshot.
pub fn latest_valid_after(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let latest: Option<i64> = conn
        .query_row("SELECT MAX(valid_after) FROM consensus", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(latest.map(crate::timestamp::from_unix))
}

/// Resolve filters to a plan, then run it and its count.
fn run<T>(
    conn: &Connection,
    filters: &SearchFilters,
    hard_limit: u64,
    shape: impl Fn(&query::RelayRow, Option<DateTime<Utc>>) -> T,
) -> Result<RelaysResponse<T>> {
    let latest = latest_valid_after(conn)?;
    let plan: QueryPlan = query::compile(filters, latest, hard_limit);
    tracing::debug!(
        regime = ?plan.regime,
        offset = plan.offset,
        limit = plan.limit,
        "running relay query"
    );

    let rows = query::execute(conn, &plan)?;
    let count = query::count(conn, &plan)?;
    Ok(RelaysResponse {
        relays_published: latest,
        count,
        relays: rows.iter().map(|row| shape(row, latest)).collect(),
    })
}

pub fn summary(
    conn: &Connection,
    filters: &SearchFilters,
    hard_limit: u64,
) -> Result<RelaysResponse<RelaySummary>> {
    run(conn, filters, hard_limit, materialize::summary)
}

pub fn details(
    conn: &Connection,
    filters: &SearchFilters,
    hard_limit: u64,
) -> Result<RelaysResponse<RelayDetail>> {
    run(conn, filters, hard_limit, materialize::detail)
}

/// The status history of the relay named by `filters.lookup`.
///
/// With `condensed`, the full history inside the window is compressed into
/// ranges first and `offset`/`limit` page through the ranges.
pub fn statuses(
    conn: &Connection,
    filters: &SearchFilters,
    hard_limit: u64,
    condensed: bool,
) -> Result<StatusesResponse> {
    let plan = query::compile_statuses(filters, hard_limit, !condensed)?;

    let known = fingerprint_index::get(conn, &plan.fingerprint)?
        .is_some_and(|row| row.fingerprint == plan.fingerprint);
    if !known {
        return Err(Error::NotFound {
            kind: "relay",
            name: plan.fingerprint,
        });
    }

    let latest = latest_valid_after(conn)?;
    let entries = query::execute_statuses(conn, &plan)?;
    let (total_status_count, statuses) = if condensed {
        let total = entries.len() as u64;
        let limit = filters.limit.map_or(hard_limit, |l| l.min(hard_limit));
        let windows = ranges::compress(entries)
            .skip(usize::try_from(filters.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|range| materialize::condensed(&range))
            .collect();
        (total, StatusList::Condensed(windows))
    } else {
        let total = query::count_statuses(conn, &plan)?;
        let records = entries.iter().map(materialize::status_record).collect();
        (total, StatusList::Entries(records))
    };

    Ok(StatusesResponse {
        relays_published: latest,
        fingerprint: plan.fingerprint,
        total_status_count,
        statuses,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        ingest::{
            import_snapshot,
            tests::{router, snapshot},
        },
        store::Store,
        timestamp,
    };

    const FP: &str = "9695DFC35FFEB861329B9F1AB04C46397020CE31";

    fn at(h: i64) -> DateTime<Utc> {
        timestamp::from_unix(1_364_792_400 + h * 3600)
    }

    fn filters(pairs: &[(&str, &str)]) -> SearchFilters {
        let params: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SearchFilters::from_params(&params).unwrap()
    }

    fn store_with_gap() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        for h in [0, 1, 2, 6, 7] {
            let doc = snapshot(at(h), vec![router(FP, "moria1", "10.0.0.1")]);
            import_snapshot(store.conn_mut(), &doc).unwrap();
        }
        store
    }

    #[test]
    fn empty_store_has_no_publication_time() {
        let store = Store::open_in_memory().unwrap();
        let response = summary(store.conn(), &filters(&[]), 50).unwrap();
        assert_eq!(response.relays_published, None);
        assert_eq!(response.count, 0);
        assert!(response.relays.is_empty());
    }

    #[test]
    fn details_report_first_and_last_seen() {
        let store = store_with_gap();
        let response = details(store.conn(), &filters(&[]), 50).unwrap();
        assert_eq!(response.relays_published, Some(at(7)));
        let relay = &response.relays[0];
        assert_eq!(relay.first_seen, at(0));
        assert_eq!(relay.last_seen, at(7));
        assert!(relay.running);
    }

    #[test]
    fn flat_statuses_page_newest_first() {
        let store = store_with_gap();
        let response = statuses(
            store.conn(),
            &filters(&[("lookup", FP), ("limit", "2")]),
            50,
            false,
        )
        .unwrap();
        assert_eq!(response.total_status_count, 5);
        match response.statuses {
            StatusList::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].valid_after, at(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn condensed_statuses_split_on_gaps() {
        let store = store_with_gap();
        let response =
            statuses(store.conn(), &filters(&[("lookup", FP)]), 50, true)
                .unwrap();
        assert_eq!(response.total_status_count, 5);
        match response.statuses {
            StatusList::Condensed(windows) => {
                assert_eq!(windows.len(), 2);
                assert_eq!(windows[0].first_seen, at(6));
                assert_eq!(windows[0].last_seen, at(7));
                assert_eq!(windows[1].first_seen, at(0));
                assert_eq!(windows[1].last_seen, at(2));
                assert_eq!(windows[1].statuses, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_relay_is_not_found() {
        let store = store_with_gap();
        let other = "000A10D43011EA4928A35F610405F92B4433B4DC";
        let err =
            statuses(store.conn(), &filters(&[("lookup", other)]), 50, false)
                .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
