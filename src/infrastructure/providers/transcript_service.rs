//! Client for the video listing / transcript microservice.

use crate::domain::entities::media_item::VideoItem;
use crate::domain::error::DomainError;
use crate::domain::ports::video_source::VideoSource;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

pub struct TranscriptService {
    base_url: String,
    language: String,
    list_limit: usize,
    client: reqwest::Client,
}

impl TranscriptService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            language: "zh-TW".into(),
            list_limit: 10,
            client: reqwest::Client::builder()
                .user_agent("marketpulse/0.1")
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct VideosResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    videos: Vec<VideoDto>,
}

#[derive(Debug, serde::Deserialize)]
struct VideoDto {
    #[serde(alias = "id")]
    video_id: String,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "upload_date", alias = "published")]
    published_at: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Accepts RFC 3339 timestamps and bare `YYYYMMDD` / `YYYY-MM-DD` dates.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl VideoSource for TranscriptService {
    async fn list_recent(&self, channel_id: &str) -> Result<Vec<VideoItem>, DomainError> {
        let url = format!("{}/api/v1/channel/{channel_id}/videos", self.base_url);
        let limit = self.list_limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[("limit", limit.as_str()), ("content_type", "streams")])
            .send()
            .await
            .map_err(|e| DomainError::from_http("video listing", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::from_status("video listing", status, &body));
        }
        let parsed: VideosResponse = resp
            .json()
            .await
            .map_err(|e| DomainError::MalformedResponse(format!("video listing: {e}")))?;
        if !parsed.success {
            return Ok(Vec::new());
        }

        Ok(parsed
            .videos
            .into_iter()
            .map(|v| VideoItem {
                published_at: v.published_at.as_deref().and_then(parse_published),
                item_id: v.video_id,
                title: v.title,
            })
            .collect())
    }

    async fn fetch_transcript(&self, item_id: &str) -> Result<String, DomainError> {
        let url = format!("{}/api/v1/transcript/text", self.base_url);
        let body = serde_json::json!({
            "youtube_url": format!("https://www.youtube.com/watch?v={item_id}"),
            "language": self.language,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::from_http("transcript", e))?;

        let status = resp.status();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            // disabled or missing captions
            return Err(DomainError::NotFound(format!("transcript {item_id}: {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DomainError::from_status("transcript", status, &text));
        }

        let parsed: TranscriptResponse = resp
            .json()
            .await
            .map_err(|e| DomainError::MalformedResponse(format!("transcript: {e}")))?;
        match (parsed.success, parsed.text) {
            (true, Some(text)) if !text.trim().is_empty() => Ok(text),
            _ => Err(DomainError::NotFound(format!(
                "transcript {item_id}: {}",
                parsed.message.unwrap_or_else(|| "no text".into())
            ))),
        }
    }
}
