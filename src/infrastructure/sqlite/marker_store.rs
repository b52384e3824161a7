use crate::domain::entities::processed_marker::ProcessedMarker;
use crate::domain::error::DomainError;
use crate::domain::ports::idempotency_store::IdempotencyStore;
use crate::domain::values::source_type::SourceType;
use crate::infrastructure::sqlite::migrations::{parse_ts, ts};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;
use tracing::warn;

pub struct SqliteMarkerStore {
    conn: Mutex<Connection>,
}

impl SqliteMarkerStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn row_to_marker(row: &rusqlite::Row) -> Result<Option<ProcessedMarker>, rusqlite::Error> {
        let source: String = row.get(0)?;
        let at: String = row.get(3)?;
        let (Ok(source_type), Some(last_processed_at)) = (source.parse::<SourceType>(), parse_ts(&at)) else {
            warn!(source = %source, at = %at, "skipping unreadable marker row");
            return Ok(None);
        };
        Ok(Some(ProcessedMarker {
            source_type,
            identifier: row.get(1)?,
            last_key: row.get(2)?,
            last_processed_at,
        }))
    }
}

impl IdempotencyStore for SqliteMarkerStore {
    fn has_processed(&self, source_type: SourceType, identifier: &str, candidate_key: &str) -> Result<bool, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_keys WHERE source_type = ?1 AND identifier = ?2 AND candidate_key = ?3",
                params![source_type.as_str(), identifier, candidate_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_processed(
        &self,
        source_type: SourceType,
        identifier: &str,
        candidate_key: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let at = ts(&processed_at);
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO processed_keys (source_type, identifier, candidate_key, processed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source_type.as_str(), identifier, candidate_key, at],
        )?;
        // The marker only moves forward in time.
        tx.execute(
            "INSERT INTO processed_markers (source_type, identifier, last_key, last_processed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source_type, identifier) DO UPDATE SET
                 last_key = excluded.last_key,
                 last_processed_at = excluded.last_processed_at
             WHERE excluded.last_processed_at >= processed_markers.last_processed_at",
            params![source_type.as_str(), identifier, candidate_key, at],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn marker(&self, source_type: SourceType, identifier: &str) -> Result<Option<ProcessedMarker>, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let marker = conn
            .query_row(
                "SELECT source_type, identifier, last_key, last_processed_at
                 FROM processed_markers WHERE source_type = ?1 AND identifier = ?2",
                params![source_type.as_str(), identifier],
                Self::row_to_marker,
            )
            .optional()?;
        Ok(marker.flatten())
    }

    fn markers(&self) -> Result<Vec<ProcessedMarker>, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT source_type, identifier, last_key, last_processed_at
             FROM processed_markers ORDER BY source_type, identifier",
        )?;
        let markers = stmt
            .query_map([], Self::row_to_marker)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(markers)
    }
}
