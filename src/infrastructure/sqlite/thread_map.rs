use crate::domain::entities::envelope::ThreadRef;
use crate::domain::error::DomainError;
use crate::infrastructure::sqlite::migrations::ts;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Persistent topic to thread mapping for sinks that need one, plus the
/// progress of multi-message posts so a retried post resumes where it failed.
pub struct SqliteThreadMap {
    conn: Mutex<Connection>,
}

impl SqliteThreadMap {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn get(&self, channel_id: &str, topic_key: &str) -> Result<Option<ThreadRef>, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let id: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM thread_refs WHERE channel_id = ?1 AND topic_key = ?2",
                params![channel_id, topic_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| ThreadRef {
            id,
            channel_id: channel_id.to_string(),
        }))
    }

    pub fn put(&self, channel_id: &str, topic_key: &str, thread: &ThreadRef) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO thread_refs (channel_id, topic_key, thread_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![channel_id, topic_key, thread.id, ts(&chrono::Utc::now())],
        )?;
        Ok(())
    }

    pub fn forget(&self, channel_id: &str, topic_key: &str) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM thread_refs WHERE channel_id = ?1 AND topic_key = ?2",
            params![channel_id, topic_key],
        )?;
        Ok(())
    }

    /// Drop every topic mapped to a thread that no longer exists, and any
    /// partial post progress in it.
    pub fn forget_thread(&self, channel_id: &str, thread_id: &str) -> Result<usize, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let removed = conn.execute(
            "DELETE FROM thread_refs WHERE channel_id = ?1 AND thread_id = ?2",
            params![channel_id, thread_id],
        )?;
        conn.execute("DELETE FROM post_progress WHERE thread_id = ?1", params![thread_id])?;
        Ok(removed)
    }

    /// Chunks of the body with `digest` already accepted in `thread_id`.
    pub fn chunks_sent(&self, thread_id: &str, digest: &str) -> Result<usize, DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        let sent: Option<i64> = conn
            .query_row(
                "SELECT chunks_sent FROM post_progress WHERE thread_id = ?1 AND body_digest = ?2",
                params![thread_id, digest],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sent.unwrap_or(0).max(0) as usize)
    }

    pub fn record_chunks_sent(&self, thread_id: &str, digest: &str, sent: usize) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO post_progress (thread_id, body_digest, chunks_sent, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![thread_id, digest, sent as i64, ts(&chrono::Utc::now())],
        )?;
        Ok(())
    }

    pub fn clear_progress(&self, thread_id: &str, digest: &str) -> Result<(), DomainError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DomainError::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM post_progress WHERE thread_id = ?1 AND body_digest = ?2",
            params![thread_id, digest],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite::migrations::open_connection;

    #[test]
    fn test_put_get_forget() {
        let map = SqliteThreadMap::new(open_connection(":memory:").unwrap());
        let t = ThreadRef {
            id: "900".into(),
            channel_id: "1".into(),
        };
        assert!(map.get("1", "chip_report:2024-05-03").unwrap().is_none());
        map.put("1", "chip_report:2024-05-03", &t).unwrap();
        map.put("1", "chip_report:2024-05-06", &t).unwrap();
        assert_eq!(map.get("1", "chip_report:2024-05-03").unwrap(), Some(t.clone()));
        assert!(map.get("2", "chip_report:2024-05-03").unwrap().is_none());

        map.forget("1", "chip_report:2024-05-06").unwrap();
        assert!(map.get("1", "chip_report:2024-05-06").unwrap().is_none());
        assert_eq!(map.forget_thread("1", "900").unwrap(), 1);
        assert!(map.get("1", "chip_report:2024-05-03").unwrap().is_none());
    }

    #[test]
    fn test_post_progress() {
        let map = SqliteThreadMap::new(open_connection(":memory:").unwrap());
        assert_eq!(map.chunks_sent("900", "abc").unwrap(), 0);
        map.record_chunks_sent("900", "abc", 2).unwrap();
        assert_eq!(map.chunks_sent("900", "abc").unwrap(), 2);
        assert_eq!(map.chunks_sent("900", "def").unwrap(), 0);

        map.clear_progress("900", "abc").unwrap();
        assert_eq!(map.chunks_sent("900", "abc").unwrap(), 0);

        map.record_chunks_sent("900", "abc", 1).unwrap();
        map.forget_thread("1", "900").unwrap();
        assert_eq!(map.chunks_sent("900", "abc").unwrap(), 0);
    }
}
