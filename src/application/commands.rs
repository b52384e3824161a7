//! Named commands for the chat/CLI front-end, built once into a plain
//! name-to-handler map.

use crate::application::chip_analytics::{fmt_shares, market_comparison, AnalysisOptions, ChipAnalyticsEngine};
use crate::application::scheduler::{Scheduler, TriggerSource};
use crate::domain::entities::analysis_result::AnalysisResult;
use crate::domain::entities::job_spec::JobKind;
use crate::domain::error::DomainError;
use crate::domain::values::investor_category::InvestorCategory;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const MAX_TREND_DAYS: usize = 10;

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn usage(&self) -> &'static str;

    async fn execute(&self, args: &[String]) -> Result<String, DomainError>;
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    by_name: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        let idx = self.commands.len();
        self.by_name.insert(command.name(), idx);
        for alias in command.aliases() {
            self.by_name.insert(*alias, idx);
        }
        self.commands.push(command);
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.by_name.get(name).map(|&i| &self.commands[i])
    }

    pub fn help_text(&self) -> String {
        let mut lines = vec!["Available commands:".to_string()];
        for c in &self.commands {
            let aliases = if c.aliases().is_empty() {
                String::new()
            } else {
                format!(" (aliases: {})", c.aliases().join(", "))
            };
            lines.push(format!("  {}{}", c.usage(), aliases));
        }
        lines.join("\n")
    }

    /// Run a command and return its text. Failures become a message for the
    /// requester instead of an error.
    pub async fn invoke(&self, name: &str, args: &[String]) -> String {
        if name == "help" {
            return self.help_text();
        }
        let Some(command) = self.resolve(name) else {
            return format!("❌ Unknown command: '{name}'. Try 'help'.");
        };
        info!(command = command.name(), ?args, "command invoked");
        match command.execute(args).await {
            Ok(text) => text,
            Err(e) => format!("❌ {}: {e}\nUsage: {}", command.name(), command.usage()),
        }
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| DomainError::InvalidInput(format!("Invalid date '{s}', expected YYYY-MM-DD")))
}

fn required<'a>(args: &'a [String], idx: usize, what: &str) -> Result<&'a str, DomainError> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| DomainError::InvalidInput(format!("missing {what}")))
}

pub fn format_analysis(result: &AnalysisResult) -> String {
    if !result.has_data() {
        return format!("📭 {}", result.summary);
    }
    let mut out = result.summary.clone();
    for note in &result.annotations {
        out.push_str(&format!("\n⚠️ {note}"));
    }
    out
}

pub struct ChipCommand {
    engine: Arc<ChipAnalyticsEngine>,
}

impl ChipCommand {
    pub fn new(engine: Arc<ChipAnalyticsEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Command for ChipCommand {
    fn name(&self) -> &'static str {
        "chip"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["daily_chip", "chip_stock"]
    }

    fn usage(&self) -> &'static str {
        "chip <stock> [YYYY-MM-DD]"
    }

    async fn execute(&self, args: &[String]) -> Result<String, DomainError> {
        let stock = required(args, 0, "stock id")?;
        let date = match args.get(1) {
            Some(d) => parse_date(d)?,
            None => self.engine.today(),
        };
        let result = self.engine.analyze(stock, date).await?;
        Ok(format_analysis(&result))
    }
}

/// Per-day net flow for one investor category, oldest first.
pub struct TrendCommand {
    engine: Arc<ChipAnalyticsEngine>,
}

impl TrendCommand {
    pub fn new(engine: Arc<ChipAnalyticsEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Command for TrendCommand {
    fn name(&self) -> &'static str {
        "chip_trend"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["trend"]
    }

    fn usage(&self) -> &'static str {
        "chip_trend <stock> [foreign|trust|dealer|all] [days<=10]"
    }

    async fn execute(&self, args: &[String]) -> Result<String, DomainError> {
        let stock = required(args, 0, "stock id")?;
        let category = match args.get(1).map(String::as_str) {
            None | Some("all") | Some("全部") | Some("合計") => None,
            Some(c) => Some(c.parse::<InvestorCategory>().map_err(DomainError::InvalidInput)?),
        };
        let days = match args.get(2) {
            Some(d) => d
                .parse::<usize>()
                .map_err(|_| DomainError::InvalidInput(format!("Invalid day count '{d}'")))?,
            None => 5,
        }
        .clamp(1, MAX_TREND_DAYS);

        let mut series = self.engine.recent_series(stock, self.engine.today(), days).await?;
        if series.is_empty() {
            return Ok(format!("📭 No chip data found for {stock}"));
        }
        series.reverse();

        let label = category.map(|c| c.to_string()).unwrap_or_else(|| "all".into());
        let mut lines = vec![format!("📈 {stock} {label} net flow, last {} trading days", series.len())];
        let mut prev: Option<f64> = None;
        let mut total = 0.0;
        for s in &series {
            let net = match category {
                Some(c) => s.net_for(c),
                None => s.net_total(),
            };
            let arrow = match prev {
                None => "⏺️",
                Some(p) if net > p => "📈",
                Some(p) if net < p => "📉",
                Some(_) => "➡️",
            };
            let dot = if net >= 0.0 { "🟢" } else { "🔴" };
            lines.push(format!("{arrow} {}: {dot} {}", s.date.format("%m/%d"), fmt_shares(net)));
            total += net;
            prev = Some(net);
        }
        lines.push(format!(
            "Total {} | Avg {}/day",
            fmt_shares(total),
            fmt_shares(total / series.len() as f64)
        ));

        // Baseline comparison over the same window.
        if let Some(last) = series.last() {
            let opts = AnalysisOptions {
                windows: vec![days],
                top_n: self.engine.options().top_n,
            };
            let analysis = self.engine.analyze_with(stock, last.date, &opts).await?;
            if let Some(delta) = analysis.metric(&format!("trend_delta_{days}d")) {
                lines.push(format!("Latest vs {days}d mean: {}", fmt_shares(delta)));
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Market-wide category totals with the top net buyers and sellers.
pub struct MarketCommand {
    engine: Arc<ChipAnalyticsEngine>,
    top_n: usize,
}

impl MarketCommand {
    pub fn new(engine: Arc<ChipAnalyticsEngine>, top_n: usize) -> Self {
        Self {
            engine,
            top_n: top_n.max(1),
        }
    }
}

#[async_trait]
impl Command for MarketCommand {
    fn name(&self) -> &'static str {
        "chip_rank"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["market", "籌碼排行"]
    }

    fn usage(&self) -> &'static str {
        "chip_rank [YYYY-MM-DD]"
    }

    async fn execute(&self, args: &[String]) -> Result<String, DomainError> {
        let date = match args.first() {
            Some(d) => parse_date(d)?,
            None => self.engine.today(),
        };
        let result = self.engine.market_overview(date, self.top_n).await?;
        Ok(format_analysis(&result))
    }
}

pub struct ChipCompareCommand {
    engine: Arc<ChipAnalyticsEngine>,
}

impl ChipCompareCommand {
    pub fn new(engine: Arc<ChipAnalyticsEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Command for ChipCompareCommand {
    fn name(&self) -> &'static str {
        "chip_compare"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["compare", "籌碼對比"]
    }

    fn usage(&self) -> &'static str {
        "chip_compare <YYYY-MM-DD> <YYYY-MM-DD>"
    }

    async fn execute(&self, args: &[String]) -> Result<String, DomainError> {
        let first = parse_date(required(args, 0, "first date")?)?;
        let second = parse_date(required(args, 1, "second date")?)?;
        let (Some(a), Some(b)) = (self.engine.market_flow(first).await?, self.engine.market_flow(second).await?) else {
            return Ok(format!("📭 No complete market data for {first} and {second}"));
        };
        Ok(market_comparison(&a, &b))
    }
}

/// Triggers a job through the scheduler, serialized with the timer path.
pub struct RunJobCommand {
    scheduler: Arc<Scheduler>,
}

impl RunJobCommand {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Command for RunJobCommand {
    fn name(&self) -> &'static str {
        "run"
    }

    fn usage(&self) -> &'static str {
        "run <job>"
    }

    async fn execute(&self, args: &[String]) -> Result<String, DomainError> {
        let job = required(args, 0, "job name")?;
        let report = self.scheduler.trigger(job, TriggerSource::Manual).await?;
        Ok(format!("✅ {}", report.summary_line()))
    }
}

pub struct SummaryCommand {
    scheduler: Arc<Scheduler>,
}

impl SummaryCommand {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Command for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn usage(&self) -> &'static str {
        "summary"
    }

    async fn execute(&self, _args: &[String]) -> Result<String, DomainError> {
        let report = self
            .scheduler
            .trigger(JobKind::VideoDigest.default_name(), TriggerSource::Manual)
            .await?;
        if report.candidates == 0 {
            return Ok("📭 No new finance items.".into());
        }
        Ok(format!("✅ {}", report.summary_line()))
    }
}

pub struct JobsCommand {
    scheduler: Arc<Scheduler>,
}

impl JobsCommand {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Command for JobsCommand {
    fn name(&self) -> &'static str {
        "jobs"
    }

    fn usage(&self) -> &'static str {
        "jobs"
    }

    async fn execute(&self, _args: &[String]) -> Result<String, DomainError> {
        let mut lines = Vec::new();
        for status in self.scheduler.status(&Utc::now()) {
            let next = status
                .next_trigger
                .map(|t| t.with_timezone(&status.spec.timezone).format("%Y-%m-%d %H:%M %Z").to_string())
                .unwrap_or_else(|| "-".into());
            let mut line = format!(
                "{} [{}] {} {} state={:?} next={}",
                status.spec.job_name,
                if status.spec.enabled { "auto" } else { "manual" },
                status.spec.schedule,
                status.spec.timezone.name(),
                status.state,
                next
            );
            if let Some(reason) = &status.unavailable {
                line.push_str(&format!(" unavailable: {reason}"));
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
