//! Compiles request filters into bounded, deterministically ordered SQL.
//!
//! A request is first reduced to a [`SearchFilters`] value, then compiled
//! against the identity of the latest snapshot into a [`QueryPlan`]. The
//! plan is plain data; [`QueryPlan::to_sql`] renders it into a statement
//! and its parameters, so the shape of every query can be checked without
//! a database.
//!
//! Two regimes exist. Without a search term the plan pages through the
//! fingerprint index first and joins only the selected rows to their
//! status entries ([`Regime::IndexFirst`]). With a term, predicates on
//! both tables are applied to the `sid` equality join and paging happens
//! once at the end ([`Regime::Joined`]).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, types::Value};

use crate::{
    document::FINGERPRINT_LEN,
    error::{Error, Result},
    fingerprint_index::{self, PREFIX_LEN},
    store::{StatusEntry, status_entry_columns, status_entry_from_row},
    timestamp,
};

/// Default cap on the number of relays a single request may return.
pub const DEFAULT_HARD_LIMIT: u64 = 50;

/// Filters accepted by the summary, details and statuses requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub search: Option<String>,
    pub lookup: Option<String>,
    pub running: Option<bool>,
    /// Inclusive lower bound on when a relay was last seen.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on when a relay was last seen.
    pub to: Option<DateTime<Utc>>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl SearchFilters {
    /// Build filters from raw query-string parameters.
    ///
    /// Unparseable dates and unknown `running` values are treated as
    /// absent. A negative or non-numeric `offset` or `limit` is rejected.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let text = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let running = params.get("running").and_then(|v| {
            match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            }
        });
        let bound = |key: &str| {
            params.get(key).and_then(|v| timestamp::parse_bound(v))
        };

        Ok(Self {
            search: text("search"),
            lookup: text("lookup"),
            running,
            from: bound("from"),
            to: bound("to"),
            offset: parse_count(params, "offset")?.unwrap_or(0),
            limit: parse_count(params, "limit")?,
        })
    }

    /// The `lookup` fingerprint, if it is exactly a fingerprint's worth of
    /// hex digits once a leading `$` is removed. Upper-cased.
    pub fn lookup_fingerprint(&self) -> Option<String> {
        let lookup = self.lookup.as_deref()?;
        let bare = lookup.strip_prefix('$').unwrap_or(lookup);
        (bare.len() == FINGERPRINT_LEN
            && bare.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| bare.to_ascii_uppercase())
    }

    /// The effective `[from, to)` window. An upper bound at or before the
    /// lower bound is dropped.
    pub fn window(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match (self.from, self.to) {
            (Some(from), Some(to)) if to <= from => (Some(from), None),
            window => window,
        }
    }
}

fn parse_count(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<u64>> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            Error::InvalidInput(format!(
                "{key} must be a non-negative integer, got {value:?}"
            ))
        }),
    }
}

/// How a search term matches relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Fingerprint(String),
    FingerprintPrefix(String),
    AddressPrefix(String),
    Nickname(String),
}

impl Term {
    /// Classify the term of a request, if any. `lookup` wins over `search`
    /// when it is a well-formed fingerprint.
    pub fn classify(filters: &SearchFilters) -> Option<Self> {
        if let Some(fp) = filters.lookup_fingerprint() {
            return Some(Self::Fingerprint(fp));
        }
        let search = filters.search.as_deref()?;
        if search.len() == FINGERPRINT_LEN || search.starts_with('$') {
            let bare = search.strip_prefix('$').unwrap_or(search);
            Some(Self::FingerprintPrefix(bare.to_ascii_uppercase()))
        } else if search.contains('.') {
            Some(Self::AddressPrefix(search.to_string()))
        } else {
            Some(Self::Nickname(search.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    IndexFirst,
    Joined,
}

/// A condition on a fingerprint index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Term(Term),
    /// `last_seen` equals the latest snapshot.
    Running(DateTime<Utc>),
    /// `last_seen` is older than the latest snapshot.
    NotRunning(DateTime<Utc>),
    SeenSince(DateTime<Utc>),
    SeenBefore(DateTime<Utc>),
}

impl Predicate {
    fn is_time_bound(&self) -> bool {
        matches!(self, Self::SeenSince(_) | Self::SeenBefore(_))
    }

    /// Append this predicate's SQL conditions for an index table whose
    /// columns are reached through `col`.
    fn render(
        &self,
        col: &str,
        conds: &mut Vec<String>,
        params: &mut Vec<Value>,
    ) {
        match self {
            Self::Term(Term::Fingerprint(fp)) => {
                conds.push(format!("{col}fp12 = ?"));
                params.push(fingerprint_index::prefix(fp).to_string().into());
                conds.push(format!("{col}fingerprint = ?"));
                params.push(fp.clone().into());
            }
            Self::Term(Term::FingerprintPrefix(prefix)) => {
                if prefix.len() >= PREFIX_LEN {
                    conds.push(format!("{col}fp12 = ?"));
                    params.push(
                        fingerprint_index::prefix(prefix).to_string().into(),
                    );
                }
                conds.push(format!("{col}fingerprint GLOB ?"));
                params.push(format!("{}*", glob_escape(prefix)).into());
            }
            Self::Term(Term::AddressPrefix(prefix)) => {
                conds.push(format!("{col}address GLOB ?"));
                params.push(format!("{}*", glob_escape(prefix)).into());
            }
            Self::Term(Term::Nickname(part)) => {
                // LIKE ignores ASCII case.
                conds.push(format!("{col}nickname LIKE ? ESCAPE '\\'"));
                params.push(format!("%{}%", like_escape(part)).into());
            }
            Self::Running(latest) => {
                conds.push(format!("{col}last_seen = ?"));
                params.push(timestamp::to_unix(latest).into());
            }
            Self::NotRunning(latest) | Self::SeenBefore(latest) => {
                conds.push(format!("{col}last_seen < ?"));
                params.push(timestamp::to_unix(latest).into());
            }
            Self::SeenSince(since) => {
                conds.push(format!("{col}last_seen >= ?"));
                params.push(timestamp::to_unix(since).into());
            }
        }
    }

    /// The same time bound applied to a joined status entry.
    fn render_on_status(
        &self,
        conds: &mut Vec<String>,
        params: &mut Vec<Value>,
    ) {
        match self {
            Self::SeenSince(ts) => {
                conds.push("s.valid_after >= ?".to_string());
                params.push(timestamp::to_unix(ts).into());
            }
            Self::SeenBefore(ts) => {
                conds.push("s.valid_after < ?".to_string());
                params.push(timestamp::to_unix(ts).into());
            }
            _ => {}
        }
    }
}

fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKey {
    LastSeenDesc,
    Fp12Asc,
}

impl OrderKey {
    fn render(self, col: &str) -> String {
        match self {
            Self::LastSeenDesc => format!("{col}last_seen DESC"),
            Self::Fp12Asc => format!("{col}fp12"),
        }
    }
}

/// A compiled relay query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub regime: Regime,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderKey>,
    pub offset: u64,
    pub limit: u64,
}

/// Compile filters against the latest snapshot.
///
/// `latest` is `None` for an empty store, in which case the `running`
/// filter has nothing to compare against and is left out.
pub fn compile(
    filters: &SearchFilters,
    latest: Option<DateTime<Utc>>,
    hard_limit: u64,
) -> QueryPlan {
    let term = Term::classify(filters);
    let regime = if term.is_some() {
        Regime::Joined
    } else {
        Regime::IndexFirst
    };

    let mut predicates = Vec::new();
    if let Some(term) = term {
        predicates.push(Predicate::Term(term));
    }
    match (filters.running, latest) {
        (Some(true), Some(latest)) => predicates.push(Predicate::Running(latest)),
        (Some(false), Some(latest)) => {
            predicates.push(Predicate::NotRunning(latest))
        }
        _ => {}
    }
    let (from, to) = filters.window();
    if let Some(from) = from {
        predicates.push(Predicate::SeenSince(from));
    }
    if let Some(to) = to {
        predicates.push(Predicate::SeenBefore(to));
    }

    let mut order = Vec::with_capacity(2);
    if filters.running != Some(true) {
        order.push(OrderKey::LastSeenDesc);
    }
    order.push(OrderKey::Fp12Asc);

    QueryPlan {
        regime,
        predicates,
        order,
        offset: filters.offset,
        limit: filters.limit.map_or(hard_limit, |l| l.min(hard_limit)),
    }
}

const RELAY_COLUMNS: &str = "f.fingerprint, f.nickname, f.address, \
                             f.first_seen, f.last_seen, s.or_port, s.dir_port";

impl QueryPlan {
    /// Render the plan into a statement returning [`RelayRow`]s.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = match self.regime {
            Regime::IndexFirst => {
                let mut conds = Vec::new();
                for p in &self.predicates {
                    p.render("", &mut conds, &mut params);
                }
                params.push(to_sql_int(self.limit));
                params.push(to_sql_int(self.offset));

                let mut outer = Vec::new();
                for p in self.predicates.iter().filter(|p| p.is_time_bound()) {
                    p.render_on_status(&mut outer, &mut params);
                }

                format!(
                    "SELECT {RELAY_COLUMNS} FROM (\
                     SELECT fp12, fingerprint, nickname, address, \
                     first_seen, last_seen, sid FROM fingerprint{} \
                     ORDER BY {} LIMIT ? OFFSET ?) AS f \
                     JOIN status_entry AS s ON s.id = f.sid{} \
                     ORDER BY {}",
                    where_clause(&conds, " WHERE "),
                    self.render_order(""),
                    where_clause(&outer, " WHERE "),
                    self.render_order("f."),
                )
            }
            Regime::Joined => {
                let mut conds = vec!["s.id = f.sid".to_string()];
                for p in &self.predicates {
                    p.render("f.", &mut conds, &mut params);
                }
                params.push(to_sql_int(self.limit));
                params.push(to_sql_int(self.offset));

                format!(
                    "SELECT {RELAY_COLUMNS} \
                     FROM fingerprint AS f, status_entry AS s \
                     WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
                    conds.join(" AND "),
                    self.render_order("f."),
                )
            }
        };
        (sql, params)
    }

    /// Render a statement counting every relay the plan matches, ignoring
    /// offset and limit.
    pub fn count_sql(&self) -> (String, Vec<Value>) {
        let mut conds = Vec::new();
        let mut params = Vec::new();
        for p in &self.predicates {
            p.render("", &mut conds, &mut params);
        }
        (
            format!(
                "SELECT COUNT(*) FROM fingerprint{}",
                where_clause(&conds, " WHERE ")
            ),
            params,
        )
    }

    fn render_order(&self, col: &str) -> String {
        self.order
            .iter()
            .map(|key| key.render(col))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn where_clause(conds: &[String], keyword: &str) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!("{keyword}{}", conds.join(" AND "))
    }
}

fn to_sql_int(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// A relay as returned by a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRow {
    pub fingerprint: String,
    pub nickname: String,
    pub address: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub or_port: u16,
    pub dir_port: u16,
}

/// Run a plan.
pub fn execute(conn: &Connection, plan: &QueryPlan) -> Result<Vec<RelayRow>> {
    let (sql, params) = plan.to_sql();
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(RelayRow {
            fingerprint: row.get(0)?,
            nickname: row.get(1)?,
            address: row.get(2)?,
            first_seen: timestamp::from_unix(row.get(3)?),
            last_seen: timestamp::from_unix(row.get(4)?),
            or_port: row.get(5)?,
            dir_port: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Count every relay a plan matches.
pub fn count(conn: &Connection, plan: &QueryPlan) -> Result<u64> {
    let (sql, params) = plan.count_sql();
    Ok(conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
        row.get(0)
    })?)
}

/// A compiled status-history query for one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlan {
    pub fingerprint: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: u64,
    /// `None` selects the full history.
    pub limit: Option<u64>,
}

/// Compile a status-history request. `lookup` must name one relay.
///
/// `paged` is false when the caller condenses the history itself and
/// needs every entry in the window.
pub fn compile_statuses(
    filters: &SearchFilters,
    hard_limit: u64,
    paged: bool,
) -> Result<StatusPlan> {
    let fingerprint = filters.lookup_fingerprint().ok_or_else(|| {
        Error::InvalidInput(format!(
            "lookup must be a {FINGERPRINT_LEN}-character hex fingerprint"
        ))
    })?;
    let (from, to) = filters.window();
    Ok(StatusPlan {
        fingerprint,
        from,
        to,
        offset: if paged { filters.offset } else { 0 },
        limit: paged
            .then(|| filters.limit.map_or(hard_limit, |l| l.min(hard_limit))),
    })
}

impl StatusPlan {
    fn conditions(&self) -> (String, Vec<Value>) {
        let mut conds = vec!["fingerprint = ?".to_string()];
        let mut params: Vec<Value> = vec![self.fingerprint.clone().into()];
        if let Some(from) = &self.from {
            conds.push("valid_after >= ?".to_string());
            params.push(timestamp::to_unix(from).into());
        }
        if let Some(to) = &self.to {
            conds.push("valid_after < ?".to_string());
            params.push(timestamp::to_unix(to).into());
        }
        (conds.join(" AND "), params)
    }

    /// Newest entries first.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let (conds, mut params) = self.conditions();
        let mut sql = format!(
            "SELECT {} FROM status_entry WHERE {conds} \
             ORDER BY valid_after DESC",
            status_entry_columns()
        );
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(to_sql_int(limit));
            params.push(to_sql_int(self.offset));
        }
        (sql, params)
    }

    pub fn count_sql(&self) -> (String, Vec<Value>) {
        let (conds, params) = self.conditions();
        (
            format!("SELECT COUNT(*) FROM status_entry WHERE {conds}"),
            params,
        )
    }
}

pub fn execute_statuses(
    conn: &Connection,
    plan: &StatusPlan,
) -> Result<Vec<StatusEntry>> {
    let (sql, params) = plan.to_sql();
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), status_entry_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn count_statuses(conn: &Connection, plan: &StatusPlan) -> Result<u64> {
    let (sql, params) = plan.count_sql();
    Ok(conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
        row.get(0)
    })?)
}
