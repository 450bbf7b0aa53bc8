use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;

use crate::{error::Result, query::QueryPlan};

/// The engine's plan for a compiled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub statement: String,
    /// `EXPLAIN QUERY PLAN` detail lines, indented by depth.
    pub steps: Vec<String>,
    /// Steps that read a whole table.
    pub full_scans: Vec<String>,
}

/// Ask the engine how it would run `plan`. Full table scans are logged as
/// warnings.
pub fn explain(conn: &Connection, plan: &QueryPlan) -> Result<PlanReport> {
    let (statement, params) = plan.to_sql();
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {statement}"))?;
    let rows: Vec<(i64, i64, String)> = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(3)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let subqueries: HashSet<&str> = rows
        .iter()
        .filter_map(|(_, _, detail)| {
            detail
                .strip_prefix("CO-ROUTINE ")
                .or_else(|| detail.strip_prefix("MATERIALIZE "))
        })
        .collect();

    let mut depth: Vec<(i64, usize)> = Vec::new();
    let mut steps = Vec::with_capacity(rows.len());
    let mut full_scans = Vec::new();
    for (id, parent, detail) in &rows {
        let level = depth
            .iter()
            .find(|(node, _)| node == parent)
            .map_or(0, |(_, level)| level + 1);
        depth.push((*id, level));
        steps.push(format!("{}{detail}", "  ".repeat(level)));

        if is_full_scan(detail, &subqueries) {
            tracing::warn!(step = %detail, "query plan scans a whole table");
            full_scans.push(detail.clone());
        }
    }

    Ok(PlanReport {
        statement,
        steps,
        full_scans,
    })
}

/// `SCAN t` without an index, where `t` is a table rather than a
/// subquery.
fn is_full_scan(detail: &str, subqueries: &HashSet<&str>) -> bool {
    let Some(rest) = detail.strip_prefix("SCAN ") else {
        return false;
    };
    let name = rest.split_whitespace().next().unwrap_or_default();
    !rest.contains("USING")
        && name != "CONSTANT"
        && !subqueries.contains(name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        query::{SearchFilters, compile},
        store::Store,
    };

    #[test]
    fn classifies_scan_details() {
        let subqueries = HashSet::from(["f"]);
        assert!(is_full_scan("SCAN fingerprint", &subqueries));
        assert!(is_full_scan("SCAN s", &subqueries));
        assert!(!is_full_scan("SCAN f", &subqueries));
        assert!(!is_full_scan(
            "SCAN fingerprint USING INDEX idx_fingerprint_last_seen",
            &subqueries
        ));
        assert!(!is_full_scan(
            "SEARCH s USING INTEGER PRIMARY KEY (rowid=?)",
            &subqueries
        ));
        assert!(!is_full_scan("SCAN CONSTANT ROW", &subqueries));
    }

    #[test]
    fn index_first_plan_avoids_full_scans() {
        let store = Store::open_in_memory().unwrap();
        let filters = SearchFilters::from_params(&HashMap::new()).unwrap();
        let plan = compile(&filters, None, 50);

        let report = explain(store.conn(), &plan).unwrap();
        assert!(!report.steps.is_empty());
        assert!(report.full_scans.is_empty(), "{:?}", report.steps);
        assert_eq!(report.statement, plan.to_sql().0);
    }
}
