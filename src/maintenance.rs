use rusqlite::Connection;

/// Reclaim free pages and refresh planner statistics.
///
/// Must run outside a transaction. Failures are logged and reported as
/// `false`; they never abort the caller.
pub fn vacuum_analyze(conn: &Connection) -> bool {
    for statement in ["VACUUM", "ANALYZE"] {
        if let Err(err) = conn.execute_batch(statement) {
            tracing::error!(statement, error = %err, "maintenance failed");
            return false;
        }
    }
    tracing::info!("vacuum and analyze complete");
    true
}
