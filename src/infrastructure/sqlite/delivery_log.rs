use crate::domain::entities::envelope::DeliveryRecord;
use crate::domain::error::DomainError;
use crate::domain::ports::delivery_log::DeliveryLog;
use crate::infrastructure::sqlite::migrations::{parse_ts, ts};
use rusqlite::{params, Connection};
use std::sync::Mutex;

pub struct SqliteDeliveryLog {
    conn: Mutex<Connection>,
}

impl SqliteDeliveryLog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<DeliveryRecord, rusqlite::Error> {
        let at: String = row.get(7)?;
        Ok(DeliveryRecord {
            id: row.get(0)?,
            topic: row.get(1)?,
            target_channel: row.get(2)?,
            success: row.get::<_, i64>(3)? != 0,
            thread_id: row.get(4)?,
            attempts: row.get(5)?,
            error: row.get(6)?,
            delivered_at: parse_ts(&at).unwrap_or_else(chrono::Utc::now),
        })
    }
}

impl DeliveryLog for SqliteDeliveryLog {
    fn record(&self, record: &DeliveryRecord) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO deliveries (id, topic, target_channel, success, thread_id, attempts, error, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.topic,
                record.target_channel,
                record.success as i64,
                record.thread_id,
                record.attempts,
                record.error,
                ts(&record.delivered_at),
            ],
        )
        .map_err(|e| DomainError::Database(format!("Failed to record delivery: {e}")))?;
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id, topic, target_channel, success, thread_id, attempts, error, delivered_at
             FROM deliveries ORDER BY delivered_at DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}
