pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

use application::chip_analytics::{AnalysisOptions, CacheSettings, ChipAnalyticsEngine};
use application::commands::{
    ChipCommand, ChipCompareCommand, CommandRegistry, JobsCommand, MarketCommand, RunJobCommand, SummaryCommand,
    TrendCommand,
};
use application::dispatcher::Dispatcher;
use application::key_locks::KeyLocks;
use application::media_summarizer::{MediaSettings, MediaSummarizer};
use application::orchestrator::{Orchestrator, PipelineJob, RunReport};
use application::scheduler::{JobStatus, Scheduler, TriggerSource};
use chrono::{NaiveDate, Utc};
use config::Config;
use domain::entities::analysis_result::AnalysisResult;
use domain::entities::envelope::DeliveryRecord;
use domain::entities::job_spec::{JobKind, JobSpec};
use domain::entities::processed_marker::ProcessedMarker;
use domain::error::DomainError;
use domain::ports::chip_provider::ChipDataProvider;
use domain::ports::delivery_log::DeliveryLog;
use domain::ports::idempotency_store::IdempotencyStore;
use domain::ports::notification_sink::NotificationSink;
use domain::ports::summarizer::Summarizer;
use domain::ports::video_source::VideoSource;
use domain::values::source_type::SourceType;
use infrastructure::providers::openrouter::OpenRouterSummarizer;
use infrastructure::providers::transcript_service::TranscriptService;
use infrastructure::providers::twse::TwseChipProvider;
use infrastructure::sinks::console::ConsoleSink;
use infrastructure::sinks::discord::DiscordSink;
use infrastructure::sqlite::delivery_log::SqliteDeliveryLog;
use infrastructure::sqlite::marker_store::SqliteMarkerStore;
use infrastructure::sqlite::migrations::open_connection;
use infrastructure::sqlite::raw_cache::SqliteRawCache;
use infrastructure::sqlite::thread_map::SqliteThreadMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// External collaborators of the pipeline. The video source and summarizer
/// are optional; without both the video job is unavailable.
pub struct Providers {
    pub chip: Arc<dyn ChipDataProvider>,
    pub video: Option<Arc<dyn VideoSource>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub sink: Arc<dyn NotificationSink>,
}

pub struct MarketPulse {
    store: Arc<dyn IdempotencyStore>,
    deliveries: Arc<dyn DeliveryLog>,
    engine: Arc<ChipAnalyticsEngine>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    commands: CommandRegistry,
}

impl MarketPulse {
    /// Wire the production adapters. With `dry_run` every post goes to
    /// stdout instead of the chat platform.
    pub fn new(config: &Config, dry_run: bool) -> Result<Self, DomainError> {
        let timeout = config.retry.call_timeout;
        let chip: Arc<dyn ChipDataProvider> = Arc::new(TwseChipProvider::new(Some(config.twse_url.clone()), timeout));
        let video: Option<Arc<dyn VideoSource>> = config
            .transcript_endpoint
            .as_deref()
            .map(|url| Arc::new(TranscriptService::new(url, timeout)) as Arc<dyn VideoSource>);
        let summarizer: Option<Arc<dyn Summarizer>> = config.openrouter_api_key.clone().map(|key| {
            Arc::new(OpenRouterSummarizer::new(
                key,
                config.openrouter_model.clone(),
                Some(config.openrouter_base_url.clone()),
                timeout,
            )) as Arc<dyn Summarizer>
        });
        let sink: Arc<dyn NotificationSink> = match (&config.discord_token, dry_run) {
            (Some(token), false) => {
                let threads = Arc::new(SqliteThreadMap::new(open_connection(&config.db_path)?));
                Arc::new(DiscordSink::new(token.clone(), threads, timeout))
            }
            _ => Arc::new(ConsoleSink::new()),
        };

        let providers = Providers {
            chip,
            video,
            summarizer,
            sink,
        };
        Self::assemble(&config.db_path, config, providers, |kind| config.missing_for(kind, dry_run))
    }

    /// Build the context around caller-supplied collaborators. Jobs are only
    /// disabled for collaborators that are absent.
    pub fn with_providers(db_path: &str, config: &Config, providers: Providers) -> Result<Self, DomainError> {
        Self::assemble(db_path, config, providers, |_| None)
    }

    fn assemble<F>(db_path: &str, config: &Config, providers: Providers, missing: F) -> Result<Self, DomainError>
    where
        F: Fn(JobKind) -> Option<String>,
    {
        let store: Arc<dyn IdempotencyStore> = Arc::new(SqliteMarkerStore::new(open_connection(db_path)?));
        let deliveries: Arc<dyn DeliveryLog> = Arc::new(SqliteDeliveryLog::new(open_connection(db_path)?));
        let cache = if config.cache_enabled {
            Some(CacheSettings {
                store: Arc::new(SqliteRawCache::new(open_connection(db_path)?)),
                ttl: config.cache_ttl,
            })
        } else {
            None
        };

        let engine = Arc::new(ChipAnalyticsEngine::new(
            providers.chip,
            cache,
            config.retry.clone(),
            config.analysis.clone(),
            config.timezone,
        ));
        let media = match (providers.video, providers.summarizer) {
            (Some(video), Some(summarizer)) => Some(Arc::new(MediaSummarizer::new(
                video,
                summarizer,
                config.retry.clone(),
                MediaSettings {
                    title_pattern: config.title_pattern.clone(),
                    ..MediaSettings::default()
                },
            ))),
            _ => None,
        };
        let media_available = media.is_some();
        let dispatcher = Arc::new(Dispatcher::new(providers.sink, config.retry.call_timeout));

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            deliveries.clone(),
            Arc::new(KeyLocks::new()),
            engine.clone(),
            media,
            dispatcher,
            config.retry.clone(),
            config.pipeline_settings(),
        ));

        let mut scheduler = Scheduler::new();
        let jobs = [
            (JobKind::ChipDaily, config.chip_schedule.clone(), config.chip_autorun),
            (JobKind::VideoDigest, config.video_schedule.clone(), config.video_autorun),
        ];
        for (kind, schedule, autorun) in jobs {
            let spec = JobSpec::new(kind, schedule, config.timezone, autorun);
            let reason = missing(kind).or_else(|| {
                (kind == JobKind::VideoDigest && !media_available)
                    .then(|| "video source or summarizer not configured".to_string())
            });
            match reason {
                Some(reason) => scheduler.register_unavailable(spec, reason),
                None => {
                    let handler = Arc::new(PipelineJob::new(orchestrator.clone(), kind, spec.job_name.clone()));
                    scheduler.register(spec, handler);
                }
            }
        }
        let scheduler = Arc::new(scheduler);

        let mut commands = CommandRegistry::new();
        commands.register(Arc::new(ChipCommand::new(engine.clone())));
        commands.register(Arc::new(TrendCommand::new(engine.clone())));
        commands.register(Arc::new(MarketCommand::new(engine.clone(), config.market_top_n)));
        commands.register(Arc::new(ChipCompareCommand::new(engine.clone())));
        commands.register(Arc::new(RunJobCommand::new(scheduler.clone())));
        commands.register(Arc::new(SummaryCommand::new(scheduler.clone())));
        commands.register(Arc::new(JobsCommand::new(scheduler.clone())));

        Ok(Self {
            store,
            deliveries,
            engine,
            orchestrator,
            scheduler,
            commands,
        })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn today(&self) -> NaiveDate {
        self.engine.today()
    }

    /// Trigger a job outside its schedule. Shares the overlap gate with the
    /// timer.
    pub async fn run_job(&self, name: &str) -> Result<RunReport, DomainError> {
        self.scheduler.trigger(name, TriggerSource::Manual).await
    }

    /// Run the chip job for a past or current trading date. Keys already
    /// delivered are skipped as on a scheduled run.
    pub async fn run_chip_for(&self, date: NaiveDate) -> Result<RunReport, DomainError> {
        self.orchestrator
            .run_chip_daily(JobKind::ChipDaily.default_name(), date)
            .await
    }

    pub fn job_status(&self) -> Vec<JobStatus> {
        self.scheduler.status(&Utc::now())
    }

    /// Run the scheduler until `shutdown` turns true.
    pub async fn serve(&self, shutdown: watch::Receiver<bool>) {
        info!(jobs = ?self.scheduler.job_names(), "serving");
        self.scheduler.clone().run(shutdown).await;
    }

    pub async fn invoke(&self, command: &str, args: &[String]) -> String {
        self.commands.invoke(command, args).await
    }

    pub async fn analyze_chip(&self, stock_id: &str, date: Option<NaiveDate>) -> Result<AnalysisResult, DomainError> {
        let date = date.unwrap_or_else(|| self.engine.today());
        self.engine.analyze(stock_id, date).await
    }

    /// Analysis with a single trend window.
    pub async fn analyze_trend(
        &self,
        stock_id: &str,
        window: usize,
        date: Option<NaiveDate>,
    ) -> Result<AnalysisResult, DomainError> {
        let date = date.unwrap_or_else(|| self.engine.today());
        let options = AnalysisOptions {
            windows: vec![window],
            top_n: self.engine.options().top_n,
        };
        self.engine.analyze_with(stock_id, date, &options).await
    }

    pub fn has_processed(&self, source_type: SourceType, identifier: &str, key: &str) -> Result<bool, DomainError> {
        self.store.has_processed(source_type, identifier, key)
    }

    pub fn markers(&self) -> Result<Vec<ProcessedMarker>, DomainError> {
        self.store.markers()
    }

    pub fn deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DomainError> {
        self.deliveries.list(limit)
    }
}
