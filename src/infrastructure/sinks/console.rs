use crate::domain::entities::envelope::ThreadRef;
use crate::domain::error::DomainError;
use crate::domain::ports::notification_sink::NotificationSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Prints posts to stdout instead of delivering them. Used by `--dry-run`.
#[derive(Default)]
pub struct ConsoleSink {
    threads: Mutex<HashMap<(String, String), ThreadRef>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn is_durable(&self) -> bool {
        false
    }

    async fn get_or_create_thread(
        &self,
        channel_id: &str,
        topic_key: &str,
        title: &str,
        _tags: &[String],
    ) -> Result<ThreadRef, DomainError> {
        let mut threads = self
            .threads
            .lock()
            .map_err(|e| DomainError::Dispatch(e.to_string()))?;
        let thread = threads
            .entry((channel_id.to_string(), topic_key.to_string()))
            .or_insert_with(|| {
                info!(channel_id, topic_key, title, "console thread opened");
                ThreadRef {
                    id: format!("console:{topic_key}"),
                    channel_id: channel_id.to_string(),
                }
            });
        Ok(thread.clone())
    }

    async fn post(&self, thread: &ThreadRef, body: &str) -> Result<(), DomainError> {
        println!("──── {} ────\n{body}\n", thread.id);
        Ok(())
    }
}
