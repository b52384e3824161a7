//! Shared test helpers: in-process fakes for every collaborator.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc, Weekday};
use marketpulse::config::Config;
use marketpulse::domain::entities::chip_snapshot::{ChipSnapshot, ParticipantFlow};
use marketpulse::domain::entities::data_key::DataSourceKey;
use marketpulse::domain::entities::envelope::ThreadRef;
use marketpulse::domain::entities::market_flow::MarketFlow;
use marketpulse::domain::entities::media_item::VideoItem;
use marketpulse::domain::entities::raw_record::RawRecord;
use marketpulse::domain::error::DomainError;
use marketpulse::domain::ports::chip_provider::ChipDataProvider;
use marketpulse::domain::ports::notification_sink::NotificationSink;
use marketpulse::domain::ports::summarizer::Summarizer;
use marketpulse::domain::ports::video_source::VideoSource;
use marketpulse::domain::values::investor_category::InvestorCategory;
use marketpulse::domain::values::prompt_contract::PromptContract;
use marketpulse::{MarketPulse, Providers};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GOOD_SUMMARY: &str =
    "## Core Theme\nRates on hold\n\n## Sub-topics\n### Fed\n- **No change**\n\n## Key Figures\n- CPI 3.1%";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// The `n` weekdays ending at `end` (or before it, if `end` is a weekend), newest first.
pub fn trading_days(end: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut day = end;
    while out.len() < n {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        day -= ChronoDuration::days(1);
    }
    out
}

/// A day whose three categories net the given amounts over a 10,000-share base.
pub fn day_flow(stock: &str, date: NaiveDate, foreign: f64, trust: f64, dealer: f64) -> ChipSnapshot {
    let base = 10_000.0;
    ChipSnapshot {
        stock_id: stock.to_string(),
        stock_name: None,
        date,
        participants: vec![
            ParticipantFlow::new("foreign_ex_dealer", InvestorCategory::Foreign, base + foreign, base),
            ParticipantFlow::new("investment_trust", InvestorCategory::Trust, base + trust, base),
            ParticipantFlow::new("dealer_proprietary", InvestorCategory::Dealer, base + dealer, base),
        ],
    }
}

pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.chip_channel = Some("chip-channel".into());
    config.finance_channel = Some("finance-channel".into());
    config.video_channels = vec!["UC_finance".into()];
    config.market_top_n = 0;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.call_timeout = Duration::from_secs(2);
    config
}

pub struct Fakes {
    pub chip: Arc<FakeChipProvider>,
    pub video: Arc<FakeVideoSource>,
    pub summarizer: Arc<FakeSummarizer>,
    pub sink: Arc<FakeSink>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            chip: Arc::new(FakeChipProvider::default()),
            video: Arc::new(FakeVideoSource::default()),
            summarizer: Arc::new(FakeSummarizer::default()),
            sink: Arc::new(FakeSink::default()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            chip: self.chip.clone(),
            video: Some(self.video.clone()),
            summarizer: Some(self.summarizer.clone()),
            sink: self.sink.clone(),
        }
    }
}

pub fn setup_with(config: &Config) -> (MarketPulse, Fakes) {
    let fakes = Fakes::new();
    let mp = MarketPulse::with_providers(":memory:", config, fakes.providers()).unwrap();
    (mp, fakes)
}

pub fn setup() -> (MarketPulse, Fakes) {
    setup_with(&test_config())
}

// ---- chip provider ----

#[derive(Default)]
pub struct FakeChipProvider {
    days: Mutex<HashMap<(String, NaiveDate), ChipSnapshot>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    queried: Mutex<Vec<NaiveDate>>,
    pub calls: AtomicUsize,
}

impl FakeChipProvider {
    pub fn insert(&self, snapshot: ChipSnapshot) {
        self.days
            .lock()
            .unwrap()
            .insert((snapshot.stock_id.clone(), snapshot.date), snapshot);
    }

    /// The next `n` fetches for `stock` fail with a transient error.
    pub fn fail_times(&self, stock: &str, n: u32) {
        self.transient_failures.lock().unwrap().insert(stock.to_string(), n);
    }

    pub fn queried_dates(&self) -> Vec<NaiveDate> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChipDataProvider for FakeChipProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_chip_data(&self, stock_id: &str, date: NaiveDate) -> Result<RawRecord, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queried.lock().unwrap().push(date);
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(stock_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(DomainError::Transient("connection reset".into()));
                }
            }
        }
        match self.days.lock().unwrap().get(&(stock_id.to_string(), date)) {
            Some(s) => Ok(RawRecord::new(DataSourceKey::chip(stock_id, date), s.to_payload())),
            None => Err(DomainError::NotFound(format!("{stock_id} {date}"))),
        }
    }

    /// Every inserted snapshot of `date`; transient failures are keyed `"market"`.
    async fn fetch_market_data(&self, date: NaiveDate) -> Result<MarketFlow, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(left) = failures.get_mut("market") {
                if *left > 0 {
                    *left -= 1;
                    return Err(DomainError::Transient("connection reset".into()));
                }
            }
        }
        let mut stocks: Vec<ChipSnapshot> = self
            .days
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.date == date)
            .cloned()
            .collect();
        if stocks.is_empty() {
            return Err(DomainError::NotFound(format!("market {date}")));
        }
        stocks.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
        Ok(MarketFlow { date, stocks })
    }
}

// ---- video source ----

#[derive(Default)]
pub struct FakeVideoSource {
    items: Mutex<HashMap<String, Vec<VideoItem>>>,
    transcripts: Mutex<HashMap<String, String>>,
    transcript_failures: Mutex<HashMap<String, u32>>,
    pub transcript_calls: AtomicUsize,
}

impl FakeVideoSource {
    pub fn add_item(&self, channel: &str, item_id: &str, title: &str, day: u32, transcript: Option<&str>) {
        let item = VideoItem {
            item_id: item_id.to_string(),
            title: title.to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 5, day, 0, 30, 0).unwrap()),
        };
        self.items
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(item);
        if let Some(t) = transcript {
            self.transcripts
                .lock()
                .unwrap()
                .insert(item_id.to_string(), t.to_string());
        }
    }

    pub fn fail_transcript_times(&self, item_id: &str, n: u32) {
        self.transcript_failures
            .lock()
            .unwrap()
            .insert(item_id.to_string(), n);
    }
}

#[async_trait]
impl VideoSource for FakeVideoSource {
    async fn list_recent(&self, channel_id: &str) -> Result<Vec<VideoItem>, DomainError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_transcript(&self, item_id: &str) -> Result<String, DomainError> {
        self.transcript_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.transcript_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(item_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(DomainError::Transient("transcript service 503".into()));
                }
            }
        }
        self.transcripts
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("no transcript for {item_id}")))
    }
}

// ---- summarizer ----

/// Answers from a script first, then with [`GOOD_SUMMARY`].
#[derive(Default)]
pub struct FakeSummarizer {
    script: Mutex<VecDeque<Result<String, DomainError>>>,
    pub calls: AtomicUsize,
}

impl FakeSummarizer {
    pub fn push(&self, response: Result<&str, DomainError>) {
        self.script
            .lock()
            .unwrap()
            .push_back(response.map(String::from));
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn summarize(&self, _text: &str, _contract: &PromptContract) -> Result<String, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(r) => r,
            None => Ok(GOOD_SUMMARY.to_string()),
        }
    }
}

// ---- sink ----

#[derive(Default)]
pub struct FakeSink {
    threads: Mutex<HashMap<(String, String), ThreadRef>>,
    pub posts: Mutex<Vec<(String, String)>>,
    pub threads_created: AtomicUsize,
    fail_next: AtomicU32,
    fail_containing: Mutex<Option<String>>,
    post_delay: Mutex<Option<Duration>>,
}

impl FakeSink {
    /// The next `n` posts fail.
    pub fn fail_next_posts(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every post whose body contains `needle` fails, until cleared.
    pub fn fail_posts_containing(&self, needle: Option<&str>) {
        *self.fail_containing.lock().unwrap() = needle.map(String::from);
    }

    pub fn delay_posts(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = Some(delay);
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    /// (channel, topic) of every thread opened so far.
    pub fn topics(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.threads.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn bodies(&self) -> Vec<String> {
        self.posts.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for FakeSink {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_or_create_thread(
        &self,
        channel_id: &str,
        topic_key: &str,
        _title: &str,
        _tags: &[String],
    ) -> Result<ThreadRef, DomainError> {
        let mut threads = self.threads.lock().unwrap();
        let thread = threads
            .entry((channel_id.to_string(), topic_key.to_string()))
            .or_insert_with(|| {
                let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
                ThreadRef {
                    id: format!("thread-{n}"),
                    channel_id: channel_id.to_string(),
                }
            });
        Ok(thread.clone())
    }

    async fn post(&self, thread: &ThreadRef, body: &str) -> Result<(), DomainError> {
        let delay = *self.post_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let fail_next = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_next {
            return Err(DomainError::Dispatch("503 from platform".into()));
        }
        if let Some(needle) = self.fail_containing.lock().unwrap().as_deref() {
            if body.contains(needle) {
                return Err(DomainError::Dispatch(format!("rejected post containing {needle}")));
            }
        }
        self.posts
            .lock()
            .unwrap()
            .push((thread.id.clone(), body.to_string()));
        Ok(())
    }
}
