use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub item_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl VideoItem {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.item_id)
    }
}

/// A summarized item ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct MediaDigest {
    pub channel: String,
    pub item: VideoItem,
    pub summary: String,
    pub markdown: String,
}
