use crate::domain::error::DomainError;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> Result<(), DomainError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS processed_keys (
            source_type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            candidate_key TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (source_type, identifier, candidate_key)
        );

        CREATE TABLE IF NOT EXISTS processed_markers (
            source_type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            last_key TEXT NOT NULL,
            last_processed_at TEXT NOT NULL,
            PRIMARY KEY (source_type, identifier)
        );

        CREATE TABLE IF NOT EXISTS deliveries (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            target_channel TEXT NOT NULL,
            success INTEGER NOT NULL,
            thread_id TEXT,
            attempts INTEGER NOT NULL,
            error TEXT,
            delivered_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS raw_cache (
            source_type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            period TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (source_type, identifier, period)
        );

        CREATE TABLE IF NOT EXISTS thread_refs (
            channel_id TEXT NOT NULL,
            topic_key TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (channel_id, topic_key)
        );

        CREATE TABLE IF NOT EXISTS post_progress (
            thread_id TEXT NOT NULL,
            body_digest TEXT NOT NULL,
            chunks_sent INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (thread_id, body_digest)
        );

        CREATE INDEX IF NOT EXISTS idx_deliveries_at ON deliveries(delivered_at);
        ",
    )
    .map_err(|e| DomainError::Database(format!("Migration failed: {e}")))
}

/// Open a connection in WAL mode with the schema in place.
pub fn open_connection(db_path: &str) -> Result<Connection, DomainError> {
    let conn = Connection::open(db_path).map_err(|e| DomainError::Database(format!("DB error: {e}")))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| DomainError::Database(format!("WAL error: {e}")))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| DomainError::Database(format!("busy timeout: {e}")))?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Fixed-width UTC timestamps so text comparison orders them correctly.
pub fn ts(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}
