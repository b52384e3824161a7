//! Discord REST sink. Forum channels get one post (thread) per topic; other
//! channels receive messages directly.

use crate::domain::entities::envelope::ThreadRef;
use crate::domain::error::DomainError;
use crate::domain::ports::notification_sink::NotificationSink;
use crate::infrastructure::sqlite::thread_map::SqliteThreadMap;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const API_BASE: &str = "https://discord.com/api/v10";
const MESSAGE_LIMIT: usize = 2000;
const THREAD_NAME_LIMIT: usize = 100;
const GUILD_FORUM: u8 = 15;
const GUILD_MEDIA: u8 = 16;
const FENCE: &str = "```";

#[derive(Debug, Clone, Deserialize)]
struct ForumTag {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelInfo {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    available_tags: Vec<ForumTag>,
}

impl ChannelInfo {
    fn is_forum(&self) -> bool {
        self.kind == GUILD_FORUM || self.kind == GUILD_MEDIA
    }
}

#[derive(Debug, Deserialize)]
struct CreatedChannel {
    id: String,
}

pub struct DiscordSink {
    token: String,
    base_url: String,
    client: reqwest::Client,
    threads: Arc<SqliteThreadMap>,
    channels: Mutex<HashMap<String, ChannelInfo>>,
    /// Serializes lookup-or-create so one topic never gets two threads.
    create_lock: Mutex<()>,
}

impl DiscordSink {
    pub fn new(token: String, threads: Arc<SqliteThreadMap>, timeout: Duration) -> Self {
        Self {
            token,
            base_url: API_BASE.into(),
            client: reqwest::Client::builder()
                .user_agent("DiscordBot (https://github.com/marketpulse, 0.1)")
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            threads,
            channels: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Point the sink at another API root, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(context: &str, resp: reqwest::Response) -> Result<reqwest::Response, DomainError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match DomainError::from_status(context, status, &body) {
            DomainError::Configuration(m) => DomainError::Configuration(m),
            DomainError::NotFound(m) => DomainError::NotFound(m),
            other => DomainError::Dispatch(other.to_string()),
        })
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, DomainError> {
        if let Some(info) = self.channels.lock().await.get(channel_id) {
            return Ok(info.clone());
        }
        let resp = self
            .client
            .get(format!("{}/channels/{channel_id}", self.base_url))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| DomainError::Dispatch(format!("discord channel lookup: {e}")))?;
        let info: ChannelInfo = Self::check("discord channel lookup", resp)
            .await?
            .json()
            .await
            .map_err(|e| DomainError::Dispatch(format!("discord channel lookup: {e}")))?;
        self.channels
            .lock()
            .await
            .insert(channel_id.to_string(), info.clone());
        Ok(info)
    }

    async fn create_forum_post(
        &self,
        channel_id: &str,
        info: &ChannelInfo,
        title: &str,
        tags: &[String],
    ) -> Result<ThreadRef, DomainError> {
        let applied: Vec<&str> = tags
            .iter()
            .filter_map(|t| info.available_tags.iter().find(|a| &a.name == t).map(|a| a.id.as_str()))
            .collect();
        if applied.len() < tags.len() {
            warn!(channel_id, ?tags, "some tags are not available on the forum");
        }
        let name: String = title.chars().take(THREAD_NAME_LIMIT).collect();
        let body = serde_json::json!({
            "name": name,
            "message": { "content": format!("**{title}**") },
            "applied_tags": applied,
        });

        let resp = self
            .client
            .post(format!("{}/channels/{channel_id}/threads", self.base_url))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Dispatch(format!("discord create thread: {e}")))?;
        let created: CreatedChannel = Self::check("discord create thread", resp)
            .await?
            .json()
            .await
            .map_err(|e| DomainError::Dispatch(format!("discord create thread: {e}")))?;

        info!(channel_id, thread = %created.id, title, "forum post created");
        Ok(ThreadRef {
            id: created.id,
            channel_id: channel_id.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
    }

    async fn get_or_create_thread(
        &self,
        channel_id: &str,
        topic_key: &str,
        title: &str,
        tags: &[String],
    ) -> Result<ThreadRef, DomainError> {
        let _creating = self.create_lock.lock().await;
        if let Some(existing) = self.threads.get(channel_id, topic_key)? {
            return Ok(existing);
        }

        let info = self.channel_info(channel_id).await?;
        let thread = if info.is_forum() {
            self.create_forum_post(channel_id, &info, title, tags).await?
        } else {
            ThreadRef {
                id: channel_id.to_string(),
                channel_id: channel_id.to_string(),
            }
        };
        self.threads.put(channel_id, topic_key, &thread)?;
        Ok(thread)
    }

    /// Bodies over the message limit go out as several messages. Accepted
    /// chunks are recorded, so posting the same body again after a failure
    /// resumes at the first chunk not yet delivered.
    async fn post(&self, thread: &ThreadRef, body: &str) -> Result<(), DomainError> {
        let chunks = split_message(body, MESSAGE_LIMIT);
        let digest = format!("{:x}", Sha256::digest(body.as_bytes()));
        let sent = self.threads.chunks_sent(&thread.id, &digest)?;
        if sent > 0 {
            info!(thread = %thread.id, sent, total = chunks.len(), "resuming partial post");
        }

        for (idx, chunk) in chunks.iter().enumerate().skip(sent) {
            let resp = self
                .client
                .post(format!("{}/channels/{}/messages", self.base_url, thread.id))
                .header("Authorization", self.auth())
                .json(&serde_json::json!({ "content": chunk }))
                .send()
                .await
                .map_err(|e| DomainError::Dispatch(format!("discord post: {e}")))?;

            if let Err(e) = Self::check("discord post", resp).await {
                if e.is_not_found() {
                    // Thread was deleted; drop every mapping to it so a retry recreates it.
                    self.threads.forget_thread(&thread.channel_id, &thread.id)?;
                    return Err(DomainError::Dispatch(format!("thread {} no longer exists", thread.id)));
                }
                return Err(e);
            }
            if idx + 1 < chunks.len() {
                self.threads.record_chunks_sent(&thread.id, &digest, idx + 1)?;
            }
        }
        if sent > 0 || chunks.len() > 1 {
            self.threads.clear_progress(&thread.id, &digest)?;
        }
        Ok(())
    }
}

/// Split on line boundaries into chunks of at most `limit` characters.
/// Lines longer than the limit are cut. A code fence open at a chunk
/// boundary is closed there and reopened at the start of the next chunk.
pub fn split_message(body: &str, limit: usize) -> Vec<String> {
    let mut splitter = Splitter::new(limit);
    for line in body.lines() {
        splitter.line(line);
    }
    splitter.finish()
}

struct Splitter {
    limit: usize,
    chunks: Vec<String>,
    current: String,
    len: usize,
    /// Length of the reopened fence at the start of `current`.
    prefix_len: usize,
    /// Opening line of the fence we are inside, if any.
    fence: Option<String>,
}

impl Splitter {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            chunks: Vec::new(),
            current: String::new(),
            len: 0,
            prefix_len: 0,
            fence: None,
        }
    }

    fn line(&mut self, line: &str) {
        let fence_after = if line.trim_start().starts_with(FENCE) {
            match self.fence {
                Some(_) => None,
                None => Some(line.trim().to_string()),
            }
        } else {
            self.fence.clone()
        };
        // room for "\n```" if the chunk has to be closed inside a fence
        let reserve = if fence_after.is_some() { FENCE.len() + 1 } else { 0 };
        let budget = self.limit.saturating_sub(reserve).max(1);
        let reopen = self.fence.as_ref().map_or(0, |o| o.chars().count() + 1);
        let piece_len = budget.saturating_sub(reopen).max(1);

        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            self.push("", budget);
        } else {
            for piece in chars.chunks(piece_len) {
                let piece: String = piece.iter().collect();
                self.push(&piece, budget);
            }
        }
        self.fence = fence_after;
    }

    fn push(&mut self, piece: &str, budget: usize) {
        let n = piece.chars().count();
        if self.len > 0 && self.len + 1 + n > budget {
            self.flush(true);
        }
        if self.len > 0 {
            self.current.push('\n');
            self.len += 1;
        }
        self.current.push_str(piece);
        self.len += n;
    }

    fn flush(&mut self, reopen: bool) {
        let mut chunk = std::mem::take(&mut self.current);
        let has_content = self.len > self.prefix_len;
        self.len = 0;
        self.prefix_len = 0;
        if has_content {
            if reopen && self.fence.is_some() {
                chunk.push('\n');
                chunk.push_str(FENCE);
            }
            if !chunk.trim().is_empty() {
                self.chunks.push(chunk);
            }
        }
        if reopen {
            if let Some(opener) = &self.fence {
                self.current = opener.clone();
                self.len = opener.chars().count();
                self.prefix_len = self.len;
            }
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush(false);
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_is_one_chunk() {
        assert_eq!(split_message("a\nb", 2000), vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_splits_on_lines() {
        let body = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(body, 9), vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_cuts_overlong_line() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let body = "籌".repeat(10);
        assert_eq!(split_message(&body, 10).len(), 1);
    }

    #[test]
    fn test_fence_is_closed_and_reopened_across_chunks() {
        let mut body = String::from("**2330**\n```\n");
        for _ in 0..6 {
            body.push_str(&"x".repeat(10));
            body.push('\n');
        }
        body.push_str("```\n> note");

        let chunks = split_message(&body, 30);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 30, "{c:?}");
            assert_eq!(c.matches(FENCE).count() % 2, 0, "{c:?}");
        }
        assert!(chunks[0].starts_with("**2330**\n```"));
        assert!(chunks[1].starts_with("```\n"));
        assert!(chunks.last().unwrap().ends_with("> note"));
        let xs: usize = chunks.iter().map(|c| c.matches(&"x".repeat(10)).count()).sum();
        assert_eq!(xs, 6);
    }

    #[test]
    fn test_fence_language_tag_is_kept_on_reopen() {
        let body = format!("```text\n{}\n{}\n```", "a".repeat(8), "b".repeat(8));
        let chunks = split_message(&body, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("```text\n{}\n```", "a".repeat(8)));
        assert_eq!(chunks[1], format!("```text\n{}\n```", "b".repeat(8)));
    }
}
