use crate::application::retry::{retry_with_backoff, RetryPolicy};
use crate::domain::entities::media_item::{MediaDigest, VideoItem};
use crate::domain::error::DomainError;
use crate::domain::ports::summarizer::Summarizer;
use crate::domain::ports::video_source::VideoSource;
use crate::domain::values::prompt_contract::PromptContract;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MediaSettings {
    /// Only items whose title matches are considered.
    pub title_pattern: Option<Regex>,
    /// Newest items considered per run.
    pub max_items: usize,
    pub contract: PromptContract,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            title_pattern: None,
            max_items: 10,
            contract: PromptContract::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AttemptCounts {
    pub transcript: u32,
    pub summarize: u32,
}

pub struct PreparedDigest {
    /// `Ok(None)` when the item has no transcript.
    pub result: Result<Option<MediaDigest>, DomainError>,
    pub attempts: AttemptCounts,
}

pub struct MediaSummarizer {
    source: Arc<dyn VideoSource>,
    summarizer: Arc<dyn Summarizer>,
    retry: RetryPolicy,
    settings: MediaSettings,
}

impl MediaSummarizer {
    pub fn new(
        source: Arc<dyn VideoSource>,
        summarizer: Arc<dyn Summarizer>,
        retry: RetryPolicy,
        settings: MediaSettings,
    ) -> Self {
        Self {
            source,
            summarizer,
            retry,
            settings,
        }
    }

    /// Recent items of `channel`, newest first, filtered by title.
    pub async fn list_candidates(&self, channel: &str) -> Result<Vec<VideoItem>, DomainError> {
        let attempted = retry_with_backoff(&self.retry, &format!("list_recent:{channel}"), || {
            self.source.list_recent(channel)
        })
        .await;
        let mut items = attempted.result?;
        let listed = items.len();

        if let Some(pattern) = &self.settings.title_pattern {
            items.retain(|i| pattern.is_match(&i.title));
        }
        // None sorts before Some, so reversing the comparison puts undated items last.
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items.truncate(self.settings.max_items);

        info!(channel, listed, candidates = items.len(), "listed video items");
        Ok(items)
    }

    /// Fetch the transcript and summarize it. Failures are returned, never
    /// raised, so one item cannot abort its siblings.
    pub async fn prepare(&self, channel: &str, item: &VideoItem) -> PreparedDigest {
        let mut attempts = AttemptCounts::default();

        let transcript = retry_with_backoff(&self.retry, &format!("transcript:{}", item.item_id), || {
            self.source.fetch_transcript(&item.item_id)
        })
        .await;
        attempts.transcript = transcript.attempts;

        let text = match transcript.result {
            Ok(t) if !t.trim().is_empty() => t,
            Ok(_) => {
                info!(item_id = %item.item_id, "empty transcript, skipping");
                return PreparedDigest { result: Ok(None), attempts };
            }
            Err(e) if e.is_not_found() => {
                info!(item_id = %item.item_id, "no transcript available");
                return PreparedDigest { result: Ok(None), attempts };
            }
            Err(e) => return PreparedDigest { result: Err(e), attempts },
        };

        let summary = self.summarize(&item.item_id, &text).await;
        attempts.summarize = summary.attempts;

        let result = summary.result.map(|summary| {
            Some(MediaDigest {
                channel: channel.to_string(),
                markdown: render_markdown(channel, item, &summary),
                item: item.clone(),
                summary,
            })
        });
        PreparedDigest { result, attempts }
    }

    async fn summarize(&self, item_id: &str, text: &str) -> crate::application::retry::Attempted<String> {
        let contract = &self.settings.contract;
        retry_with_backoff(&self.retry, &format!("summarize:{item_id}"), move || async move {
            let raw = self.summarizer.summarize(text, contract).await?;
            contract.validate(&raw).map_err(|e| {
                warn!(item_id, model = self.summarizer.model(), error = %e, "discarding summary");
                e
            })
        })
        .await
    }
}

/// Digest body: title, source line, the summary, then a source-link list.
pub fn render_markdown(channel: &str, item: &VideoItem, summary: &str) -> String {
    let published = item
        .published_at
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".into());
    format!(
        "# {title}\n> Source: <{url}> | Published: {published}\n\n{summary}\n\n## 🔗 重要資訊來源\n1. [{channel}] [{title}]({url})\n",
        title = item.title,
        url = item.url(),
        summary = summary.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_markdown_links_source() {
        let item = VideoItem {
            item_id: "abc123".into(),
            title: "2024/05/03 Morning Call".into(),
            published_at: None,
        };
        let md = render_markdown("UC_finance", &item, "## Core Theme\nx\n");
        assert!(md.starts_with("# 2024/05/03 Morning Call\n"));
        assert!(md.contains("https://www.youtube.com/watch?v=abc123"));
        assert!(md.contains("Published: unknown"));
        assert!(md.contains("## Core Theme\nx\n\n## 🔗 重要資訊來源\n"));
        assert!(md.ends_with(
            "1. [UC_finance] [2024/05/03 Morning Call](https://www.youtube.com/watch?v=abc123)\n"
        ));
    }
}
