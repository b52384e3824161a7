use crate::domain::entities::analysis_result::{AnalysisResult, AnalysisStatus};
use crate::domain::entities::envelope::{DeliveryResult, DispatchEnvelope, ThreadRef};
use crate::domain::entities::media_item::MediaDigest;
use crate::domain::error::DomainError;
use crate::domain::ports::notification_sink::NotificationSink;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Delivers envelopes to the notification sink, one thread per topic.
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, call_timeout: Duration) -> Self {
        Self { sink, call_timeout }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn is_durable(&self) -> bool {
        self.sink.is_durable()
    }

    pub async fn dispatch(&self, envelope: &DispatchEnvelope) -> DeliveryResult {
        match self.try_dispatch(envelope).await {
            Ok(thread) => DeliveryResult::delivered(thread),
            Err(e) => DeliveryResult::failed(e.to_string()),
        }
    }

    /// Look up or create the topic thread, then post the body. Failures keep
    /// their class so the caller can decide whether to retry.
    pub async fn try_dispatch(&self, envelope: &DispatchEnvelope) -> Result<ThreadRef, DomainError> {
        let thread = self
            .bounded(
                "get_or_create_thread",
                self.sink.get_or_create_thread(
                    &envelope.target_channel,
                    &envelope.topic,
                    &envelope.title,
                    &envelope.tags,
                ),
            )
            .await?;
        self.bounded("post", self.sink.post(&thread, &envelope.body)).await?;

        info!(
            sink = self.sink.name(),
            topic = %envelope.topic,
            thread = %thread.id,
            "delivered"
        );
        Ok(thread)
    }

    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, DomainError>>,
    ) -> Result<T, DomainError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(as_dispatch_error(op, e)),
            Err(_) => Err(DomainError::Dispatch(format!(
                "{op}: timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }
}

fn as_dispatch_error(op: &str, e: DomainError) -> DomainError {
    match e {
        DomainError::Configuration(_) | DomainError::Dispatch(_) => e,
        other => DomainError::Dispatch(format!("{op}: {other}")),
    }
}

/// Topic shared by every stock reported on the same trading day.
pub fn chip_topic(period: &str) -> String {
    format!("chip_report:{period}")
}

pub fn chip_envelope(result: &AnalysisResult, channel: &str, tags: &[String]) -> DispatchEnvelope {
    let mut body = format!("**{}**", result.key.identifier);
    if result.status == AnalysisStatus::Partial {
        body.push_str(" _(partial history)_");
    }
    body.push('\n');
    body.push_str("```\n");
    body.push_str(&result.summary);
    body.push_str("\n```");
    for note in &result.annotations {
        body.push_str(&format!("\n> {note}"));
    }

    DispatchEnvelope {
        topic: chip_topic(&result.key.period),
        title: format!("📊 {} 籌碼日報", result.key.period),
        body,
        tags: tags.to_vec(),
        target_channel: channel.to_string(),
    }
}

/// Market overview, posted as markdown into the same daily thread as the
/// watchlist reports.
pub fn market_envelope(result: &AnalysisResult, channel: &str, tags: &[String]) -> DispatchEnvelope {
    let mut body = format!("## 🏛️ Market overview\n{}", result.summary);
    for note in &result.annotations {
        body.push_str(&format!("\n> {note}"));
    }
    DispatchEnvelope {
        topic: chip_topic(&result.key.period),
        title: format!("📊 {} 籌碼日報", result.key.period),
        body,
        tags: tags.to_vec(),
        target_channel: channel.to_string(),
    }
}

pub fn media_envelope(digest: &MediaDigest, channel: &str, topic: &str) -> DispatchEnvelope {
    let day = digest
        .item
        .published_at
        .map(|d| d.format("%Y/%m/%d").to_string())
        .unwrap_or_else(|| chrono::Utc::now().format("%Y/%m/%d").to_string());
    DispatchEnvelope {
        topic: topic.to_string(),
        title: format!("📅 {day} 金融摘要"),
        body: digest.markdown.clone(),
        tags: Vec::new(),
        target_channel: channel.to_string(),
    }
}
