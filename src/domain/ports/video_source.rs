use crate::domain::entities::media_item::VideoItem;
use crate::domain::error::DomainError;
use async_trait::async_trait;

#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Recent items of a channel. Order is not guaranteed.
    async fn list_recent(&self, channel_id: &str) -> Result<Vec<VideoItem>, DomainError>;

    /// Transcript text. An item without a transcript is `DomainError::NotFound`.
    async fn fetch_transcript(&self, item_id: &str) -> Result<String, DomainError>;
}
