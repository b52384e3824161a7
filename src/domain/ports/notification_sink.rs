use crate::domain::entities::envelope::ThreadRef;
use crate::domain::error::DomainError;
use async_trait::async_trait;

/// Messaging platform with topic-keyed discussion threads.
///
/// The topic to thread mapping is owned by the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a successful post reached the platform. Keys are only marked
    /// processed after a durable delivery.
    fn is_durable(&self) -> bool {
        true
    }

    async fn get_or_create_thread(
        &self,
        channel_id: &str,
        topic_key: &str,
        title: &str,
        tags: &[String],
    ) -> Result<ThreadRef, DomainError>;

    async fn post(&self, thread: &ThreadRef, body: &str) -> Result<(), DomainError>;
}
