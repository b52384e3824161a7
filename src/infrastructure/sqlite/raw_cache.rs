use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use crate::domain::ports::raw_cache::RawCache;
use crate::infrastructure::sqlite::migrations::{parse_ts, ts};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub struct SqliteRawCache {
    conn: Mutex<Connection>,
}

impl SqliteRawCache {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl RawCache for SqliteRawCache {
    fn get(&self, key: &DataSourceKey, fresh_since: Option<DateTime<Utc>>) -> Result<Option<RawRecord>, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT payload, fetched_at FROM raw_cache
                 WHERE source_type = ?1 AND identifier = ?2 AND period = ?3",
                params![key.source_type.as_str(), key.identifier, key.period],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, fetched)) = row else {
            return Ok(None);
        };
        let Some(fetched_at) = parse_ts(&fetched) else {
            return Ok(None);
        };
        if fresh_since.is_some_and(|since| fetched_at < since) {
            return Ok(None);
        }
        let payload = serde_json::from_str(&payload)
            .map_err(|e| DomainError::Database(format!("corrupt cache entry {key}: {e}")))?;
        Ok(Some(RawRecord {
            key: key.clone(),
            fetched_at,
            payload,
        }))
    }

    fn put(&self, record: &RawRecord) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| DomainError::Database(format!("cache encode: {e}")))?;
        conn.execute(
            "INSERT OR REPLACE INTO raw_cache (source_type, identifier, period, payload, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key.source_type.as_str(),
                record.key.identifier,
                record.key.period,
                payload,
                ts(&record.fetched_at),
            ],
        )?;
        Ok(())
    }
}
