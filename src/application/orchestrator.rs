//! Drives a job run: candidates, idempotency filter, engine, dispatch, commit.
//!
//! Per candidate the order is fixed: take the key lock, check the store,
//! analyze or summarize, dispatch with bounded retry, record the delivery,
//! and only then mark the key processed. A candidate's failure is captured
//! in its [`ItemReport`] and never aborts its siblings.

use crate::application::chip_analytics::{is_weekend, ChipAnalyticsEngine, MARKET_ID};
use crate::application::dispatcher::{chip_envelope, market_envelope, media_envelope, Dispatcher};
use crate::application::key_locks::KeyLocks;
use crate::application::media_summarizer::{AttemptCounts, MediaSummarizer};
use crate::application::retry::{retry_with_backoff, RetryPolicy};
use crate::application::scheduler::JobHandler;
use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::entities::envelope::{DeliveryRecord, DeliveryResult, DispatchEnvelope, ThreadRef};
use crate::domain::entities::job_spec::JobKind;
use crate::domain::entities::media_item::VideoItem;
use crate::domain::error::DomainError;
use crate::domain::ports::delivery_log::DeliveryLog;
use crate::domain::ports::idempotency_store::IdempotencyStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub watchlist: Vec<String>,
    /// Stocks ranked per side in the market overview; 0 skips the overview.
    pub market_top_n: usize,
    pub chip_channel: Option<String>,
    pub chip_tags: Vec<String>,
    pub video_channels: Vec<String>,
    pub finance_channel: Option<String>,
    pub video_topic: String,
    /// Candidates processed concurrently within one run.
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            watchlist: vec!["2330".into()],
            market_top_n: 10,
            chip_channel: None,
            chip_tags: vec!["籌碼異動".into()],
            video_channels: Vec::new(),
            finance_channel: None,
            video_topic: "daily_finance".into(),
            concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Dispatched { thread: ThreadRef },
    /// Rendered to a non-durable sink; the key stays unprocessed.
    DryRun { thread: ThreadRef },
    AlreadyProcessed,
    NoData { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ItemAttempts {
    pub transcript: u32,
    pub summarize: u32,
    pub dispatch: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub key: DataSourceKey,
    pub outcome: ItemOutcome,
    pub attempts: ItemAttempts,
}

impl ItemReport {
    fn new(key: DataSourceKey, outcome: ItemOutcome) -> Self {
        Self {
            key,
            outcome,
            attempts: ItemAttempts::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub dispatched: usize,
    pub dry_run: usize,
    pub skipped: usize,
    pub no_data: usize,
    pub failed: usize,
    pub items: Vec<ItemReport>,
    /// Failures outside any single candidate, e.g. a listing that failed.
    pub errors: Vec<String>,
    pub notes: Vec<String>,
}

impl RunReport {
    pub fn new(job_name: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            candidates: 0,
            dispatched: 0,
            dry_run: 0,
            skipped: 0,
            no_data: 0,
            failed: 0,
            items: Vec::new(),
            errors: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn push(&mut self, item: ItemReport) {
        self.candidates += 1;
        match &item.outcome {
            ItemOutcome::Dispatched { .. } => self.dispatched += 1,
            ItemOutcome::DryRun { .. } => self.dry_run += 1,
            ItemOutcome::AlreadyProcessed => self.skipped += 1,
            ItemOutcome::NoData { .. } => self.no_data += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(item);
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{}: {} candidates, {} dispatched, {} already processed, {} no data, {} failed",
            self.job_name, self.candidates, self.dispatched, self.skipped, self.no_data, self.failed
        );
        if self.dry_run > 0 {
            line.push_str(&format!(", {} dry run", self.dry_run));
        }
        line
    }
}

enum Candidate {
    Chip { stock_id: String, date: NaiveDate },
    Market { date: NaiveDate },
    Video { channel: String, item: VideoItem },
}

impl Candidate {
    fn key(&self) -> DataSourceKey {
        match self {
            Candidate::Chip { stock_id, date } => DataSourceKey::chip(stock_id, *date),
            Candidate::Market { date } => DataSourceKey::chip(MARKET_ID, *date),
            Candidate::Video { channel, item } => DataSourceKey::video(channel, &item.item_id),
        }
    }
}

/// Envelope ready for dispatch, or the reason there is none.
enum Prepared {
    Ready(DispatchEnvelope),
    Skip(ItemOutcome),
}

pub struct Orchestrator {
    store: Arc<dyn IdempotencyStore>,
    deliveries: Arc<dyn DeliveryLog>,
    locks: Arc<KeyLocks>,
    chip: Arc<ChipAnalyticsEngine>,
    media: Option<Arc<MediaSummarizer>>,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    settings: PipelineSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        deliveries: Arc<dyn DeliveryLog>,
        locks: Arc<KeyLocks>,
        chip: Arc<ChipAnalyticsEngine>,
        media: Option<Arc<MediaSummarizer>>,
        dispatcher: Arc<Dispatcher>,
        retry: RetryPolicy,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            deliveries,
            locks,
            chip,
            media,
            dispatcher,
            retry,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current trading date in the scheduling timezone.
    pub fn today(&self) -> NaiveDate {
        self.chip.today()
    }

    /// Analyze every watchlist stock for `date`, plus the market overview when
    /// enabled, and post the results into the day's thread.
    pub async fn run_chip_daily(&self, job_name: &str, date: NaiveDate) -> Result<RunReport, DomainError> {
        let channel = self
            .settings
            .chip_channel
            .clone()
            .ok_or_else(|| DomainError::Configuration("CHIP_CHANNEL_ID is not set".into()))?;
        let mut report = RunReport::new(job_name);

        if is_weekend(date) {
            report.notes.push(format!("{date} is a weekend, no trading data"));
            info!(job = job_name, %date, "weekend, nothing to do");
            return Ok(report.finish());
        }

        let mut candidates: Vec<Candidate> = self
            .settings
            .watchlist
            .iter()
            .map(|s| Candidate::Chip {
                stock_id: s.clone(),
                date,
            })
            .collect();
        if self.settings.market_top_n > 0 {
            candidates.push(Candidate::Market { date });
        }
        self.run_candidates(&mut report, candidates, &channel).await;
        Ok(report.finish())
    }

    /// Summarize new items of every configured video channel.
    pub async fn run_video_digest(&self, job_name: &str) -> Result<RunReport, DomainError> {
        let media = self
            .media
            .clone()
            .ok_or_else(|| DomainError::Configuration("media summarizer is not configured".into()))?;
        let target = self
            .settings
            .finance_channel
            .clone()
            .ok_or_else(|| DomainError::Configuration("FINANCE_CHANNEL_ID is not set".into()))?;
        let mut report = RunReport::new(job_name);

        let mut candidates = Vec::new();
        for channel in &self.settings.video_channels {
            match media.list_candidates(channel).await {
                Ok(items) => candidates.extend(items.into_iter().map(|item| Candidate::Video {
                    channel: channel.clone(),
                    item,
                })),
                Err(e) => {
                    warn!(job = job_name, channel = %channel, error = %e, "listing failed");
                    report.errors.push(format!("{channel}: {e}"));
                }
            }
        }
        if self.settings.video_channels.is_empty() {
            report.notes.push("no video channels configured".into());
        }

        self.run_candidates(&mut report, candidates, &target).await;
        Ok(report.finish())
    }

    async fn run_candidates(&self, report: &mut RunReport, candidates: Vec<Candidate>, target: &str) {
        let results: Vec<ItemReport> = stream::iter(candidates)
            .map(|c| self.process(c, target))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        for item in results {
            report.push(item);
        }
        info!(job = %report.job_name, "{}", report.summary_line());
    }

    async fn process(&self, candidate: Candidate, target: &str) -> ItemReport {
        let key = candidate.key();
        let _guard = self.locks.lock(&key.lock_key()).await;

        match self.store.has_processed(key.source_type, &key.identifier, &key.period) {
            Ok(true) => return ItemReport::new(key, ItemOutcome::AlreadyProcessed),
            Ok(false) => {}
            Err(e) => {
                error!(key = %key, error = %e, "idempotency check failed");
                return ItemReport::new(key, ItemOutcome::Failed { error: e.to_string() });
            }
        }

        let mut attempts = ItemAttempts::default();
        let prepared = match &candidate {
            Candidate::Chip { stock_id, date } => self.prepare_chip(stock_id, *date, target).await,
            Candidate::Market { date } => self.prepare_market(*date, target).await,
            Candidate::Video { channel, item } => {
                let (prepared, counts) = self.prepare_video(channel, item, target).await;
                attempts.transcript = counts.transcript;
                attempts.summarize = counts.summarize;
                prepared
            }
        };

        let envelope = match prepared {
            Prepared::Ready(envelope) => envelope,
            Prepared::Skip(outcome) => {
                if let ItemOutcome::Failed { error } = &outcome {
                    warn!(key = %key, error = %error, "item failed before dispatch");
                }
                return ItemReport { key, outcome, attempts };
            }
        };

        let attempted = retry_with_backoff(&self.retry, &format!("dispatch:{}", envelope.topic), || {
            self.dispatcher.try_dispatch(&envelope)
        })
        .await;
        attempts.dispatch = attempted.attempts;

        if !self.dispatcher.is_durable() {
            let outcome = match attempted.result {
                Ok(thread) => {
                    info!(key = %key, sink = self.dispatcher.sink_name(), "dry run, key left unprocessed");
                    ItemOutcome::DryRun { thread }
                }
                Err(e) => ItemOutcome::Failed { error: e.to_string() },
            };
            return ItemReport { key, outcome, attempts };
        }

        let delivery = match &attempted.result {
            Ok(thread) => DeliveryResult::delivered(thread.clone()),
            Err(e) => DeliveryResult::failed(e.to_string()),
        };
        if let Err(e) = self
            .deliveries
            .record(&DeliveryRecord::from_result(&envelope, &delivery, attempted.attempts))
        {
            warn!(key = %key, error = %e, "failed to record delivery");
        }

        let outcome = match attempted.result {
            Ok(thread) => {
                match self
                    .store
                    .mark_processed(key.source_type, &key.identifier, &key.period, Utc::now())
                {
                    Ok(()) => ItemOutcome::Dispatched { thread },
                    Err(e) => {
                        error!(key = %key, error = %e, "delivered but marker write failed");
                        ItemOutcome::Failed {
                            error: format!("delivered but not committed: {e}"),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, attempts = attempts.dispatch, error = %e, "dispatch failed, left unprocessed");
                ItemOutcome::Failed { error: e.to_string() }
            }
        };

        ItemReport { key, outcome, attempts }
    }

    async fn prepare_chip(&self, stock_id: &str, date: NaiveDate, target: &str) -> Prepared {
        match self.chip.analyze(stock_id, date).await {
            Ok(result) if !result.has_data() => Prepared::Skip(ItemOutcome::NoData {
                reason: result.annotations.join("; "),
            }),
            Ok(result) => Prepared::Ready(chip_envelope(&result, target, &self.settings.chip_tags)),
            Err(e) => Prepared::Skip(ItemOutcome::Failed { error: e.to_string() }),
        }
    }

    async fn prepare_market(&self, date: NaiveDate, target: &str) -> Prepared {
        match self.chip.market_overview(date, self.settings.market_top_n).await {
            Ok(result) if !result.has_data() => Prepared::Skip(ItemOutcome::NoData {
                reason: result.annotations.join("; "),
            }),
            Ok(result) => Prepared::Ready(market_envelope(&result, target, &self.settings.chip_tags)),
            Err(e) => Prepared::Skip(ItemOutcome::Failed { error: e.to_string() }),
        }
    }

    async fn prepare_video(&self, channel: &str, item: &VideoItem, target: &str) -> (Prepared, AttemptCounts) {
        let Some(media) = &self.media else {
            return (
                Prepared::Skip(ItemOutcome::Failed {
                    error: "media summarizer is not configured".into(),
                }),
                AttemptCounts::default(),
            );
        };
        let prepared = media.prepare(channel, item).await;
        let next = match prepared.result {
            Ok(Some(digest)) => Prepared::Ready(media_envelope(&digest, target, &self.settings.video_topic)),
            Ok(None) => Prepared::Skip(ItemOutcome::NoData {
                reason: "no transcript available".into(),
            }),
            Err(e) => Prepared::Skip(ItemOutcome::Failed { error: e.to_string() }),
        };
        (next, prepared.attempts)
    }
}

/// Scheduler entry point for one pipeline job.
pub struct PipelineJob {
    orchestrator: Arc<Orchestrator>,
    kind: JobKind,
    job_name: String,
}

impl PipelineJob {
    pub fn new(orchestrator: Arc<Orchestrator>, kind: JobKind, job_name: impl Into<String>) -> Self {
        Self {
            orchestrator,
            kind,
            job_name: job_name.into(),
        }
    }
}

#[async_trait]
impl JobHandler for PipelineJob {
    async fn run(&self) -> Result<RunReport, DomainError> {
        match self.kind {
            JobKind::ChipDaily => {
                let date = self.orchestrator.today();
                self.orchestrator.run_chip_daily(&self.job_name, date).await
            }
            JobKind::VideoDigest => self.orchestrator.run_video_digest(&self.job_name).await,
        }
    }
}
