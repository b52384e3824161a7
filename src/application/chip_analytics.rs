//! Institutional flow analytics: concentration, buy/sell pressure and trend
//! deltas over a rolling baseline of trading days.
//!
//! Metric names are stable and used as keys in reports:
//!
//! - `net_buy_foreign`, `net_buy_trust`, `net_buy_dealer`, `net_buy_total`
//!   (shares, net-buy > 0) for the target day
//! - `gross_volume`, `pressure_ratio` (net / gross, in [-1, 1]) and the
//!   label `pressure_direction`
//! - `concentration_top<N>` over the shortest window: the summed |net| of the
//!   N participants with the largest |net| divided by the gross volume of
//!   every participant, in [0, 1]
//! - `trend_delta_<w>d`, `trend_mean_<w>d`, `trend_days_<w>d` and
//!   `trend_delta_foreign_<w>d` per configured window, where the mean covers
//!   the last `w` trading days including the target day
//!
//! The market overview covers every listed stock of a day: `net_buy_<category>`
//! and `net_buy_total` summed over the market, `stocks` counted, and the top
//! net buyers and sellers ranked in the summary.
//!
//! A day without a record is never read as zero volume. The target day
//! missing yields a `no_data` result; missing history days are skipped and a
//! short history marks the result partial.

use crate::application::retry::{retry_with_backoff, RetryPolicy};
use crate::domain::entities::analysis_result::{AnalysisResult, AnalysisStatus};
use crate::domain::entities::chip_snapshot::ChipSnapshot;
use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::entities::market_flow::MarketFlow;
use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use crate::domain::ports::chip_provider::ChipDataProvider;
use crate::domain::ports::raw_cache::RawCache;
use crate::domain::values::investor_category::InvestorCategory;
use crate::domain::values::metric_value::MetricValue;
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Trend windows in trading days. The shortest one also bounds the
    /// concentration window.
    pub windows: Vec<usize>,
    pub top_n: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            windows: vec![5, 20],
            top_n: 5,
        }
    }
}

impl AnalysisOptions {
    fn normalized(&self) -> Self {
        let mut windows: Vec<usize> = self.windows.iter().copied().filter(|w| *w > 0).collect();
        windows.sort_unstable();
        windows.dedup();
        if windows.is_empty() {
            windows.push(1);
        }
        Self {
            windows,
            top_n: self.top_n.max(1),
        }
    }
}

pub struct CacheSettings {
    pub store: Arc<dyn RawCache>,
    pub ttl: Duration,
}

/// Identifier of the market-wide overview in chip keys.
pub const MARKET_ID: &str = "market";

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub struct ChipAnalyticsEngine {
    provider: Arc<dyn ChipDataProvider>,
    cache: Option<CacheSettings>,
    retry: RetryPolicy,
    options: AnalysisOptions,
    timezone: Tz,
}

impl ChipAnalyticsEngine {
    pub fn new(
        provider: Arc<dyn ChipDataProvider>,
        cache: Option<CacheSettings>,
        retry: RetryPolicy,
        options: AnalysisOptions,
        timezone: Tz,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
            options: options.normalized(),
            timezone,
        }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub async fn analyze(&self, stock_id: &str, date: NaiveDate) -> Result<AnalysisResult, DomainError> {
        self.analyze_with(stock_id, date, &self.options).await
    }

    pub async fn analyze_with(
        &self,
        stock_id: &str,
        date: NaiveDate,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, DomainError> {
        let options = options.normalized();
        let key = DataSourceKey::chip(stock_id, date);

        let Some(current) = self.snapshot(stock_id, date).await? else {
            return Ok(AnalysisResult::no_data(
                key,
                format!("no chip record for {date} (market closed or not yet published)"),
            ));
        };

        let longest = options.windows.iter().copied().max().unwrap_or(1);
        let mut series = vec![current];
        series.extend(self.history(stock_id, date, longest - 1).await?);

        Ok(compute(key, &series, &options))
    }

    /// Snapshots of the last `days` trading days ending at `date`, newest
    /// first. Days without a record are left out.
    pub async fn recent_series(&self, stock_id: &str, date: NaiveDate, days: usize) -> Result<Vec<ChipSnapshot>, DomainError> {
        let mut out = Vec::with_capacity(days);
        if days == 0 {
            return Ok(out);
        }
        if !is_weekend(date) {
            if let Some(current) = self.snapshot(stock_id, date).await? {
                out.push(current);
            }
        }
        let remaining = days - out.len();
        out.extend(self.history(stock_id, date, remaining).await?);
        Ok(out)
    }

    /// Up to `needed` trading-day snapshots before `date`, newest first.
    /// Weekends are not queried; the walk stops after `(needed + 1) * 3`
    /// calendar days.
    async fn history(&self, stock_id: &str, date: NaiveDate, needed: usize) -> Result<Vec<ChipSnapshot>, DomainError> {
        let mut out = Vec::with_capacity(needed);
        if needed == 0 {
            return Ok(out);
        }
        let max_days = ((needed + 1) * 3) as i64;
        for back in 1..=max_days {
            let day = date - Duration::days(back);
            if is_weekend(day) {
                continue;
            }
            match self.snapshot(stock_id, day).await? {
                Some(s) => out.push(s),
                None => debug!(stock_id, %day, "no record, skipping day"),
            }
            if out.len() >= needed {
                break;
            }
        }
        Ok(out)
    }

    /// One day's snapshot, `None` when the provider has no record.
    pub async fn snapshot(&self, stock_id: &str, date: NaiveDate) -> Result<Option<ChipSnapshot>, DomainError> {
        let key = DataSourceKey::chip(stock_id, date);

        if let Some(cache) = &self.cache {
            let fresh_since = (date >= self.today()).then(|| Utc::now() - cache.ttl);
            match cache.store.get(&key, fresh_since) {
                Ok(Some(record)) => return ChipSnapshot::from_record(&record).map(Some),
                Ok(None) => {}
                Err(e) => warn!(error = %e, key = %key, "cache read failed"),
            }
        }

        let label = format!("{}:{stock_id}:{date}", self.provider.name());
        let attempted = retry_with_backoff(&self.retry, &label, || {
            self.provider.fetch_chip_data(stock_id, date)
        })
        .await;

        let record: RawRecord = match attempted.result {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let snapshot = ChipSnapshot::from_record(&record)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store.put(&record) {
                warn!(error = %e, key = %key, "cache write failed");
            }
        }
        Ok(Some(snapshot))
    }
}

impl ChipAnalyticsEngine {
    /// The whole market's flow for `date`, `None` when nothing is published.
    pub async fn market_flow(&self, date: NaiveDate) -> Result<Option<MarketFlow>, DomainError> {
        let label = format!("{}:{MARKET_ID}:{date}", self.provider.name());
        let attempted = retry_with_backoff(&self.retry, &label, || self.provider.fetch_market_data(date)).await;
        match attempted.result {
            Ok(flow) if flow.stocks.is_empty() => Ok(None),
            Ok(flow) => Ok(Some(flow)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Market-wide category totals with the `top_n` net buyers and sellers.
    pub async fn market_overview(&self, date: NaiveDate, top_n: usize) -> Result<AnalysisResult, DomainError> {
        let key = DataSourceKey::chip(MARKET_ID, date);
        match self.market_flow(date).await? {
            Some(flow) => Ok(market_overview(key, &flow, top_n.max(1))),
            None => Ok(AnalysisResult::no_data(
                key,
                format!("no market table for {date} (market closed or not yet published)"),
            )),
        }
    }
}

pub fn market_overview(key: DataSourceKey, flow: &MarketFlow, top_n: usize) -> AnalysisResult {
    let mut metrics: BTreeMap<String, MetricValue> = BTreeMap::new();
    for category in InvestorCategory::ALL {
        metrics.insert(format!("net_buy_{category}"), flow.net_for(category).into());
    }
    metrics.insert("net_buy_total".into(), flow.net_total().into());
    metrics.insert("stocks".into(), (flow.stocks.len() as f64).into());

    let mut lines = vec![format!("**Market institutional flow on {}**", flow.date)];
    for category in InvestorCategory::ALL {
        let net = flow.net_for(category);
        lines.push(format!("{} {category}: `{}`", direction_dot(net), fmt_shares(net)));
    }
    let total = flow.net_total();
    lines.push(format!("{} total: `{}`", direction_dot(total), fmt_shares(total)));

    let rank = |title: &str, picked: Vec<&ChipSnapshot>| {
        let mut out = vec![String::new(), format!("{title} (top {top_n})")];
        if picked.is_empty() {
            out.push("none".into());
        }
        for (i, s) in picked.iter().enumerate() {
            let name = s.stock_name.as_deref().unwrap_or(&s.stock_id);
            out.push(format!("{}. **{name}** ({}): `{}`", i + 1, s.stock_id, fmt_shares(s.net_total())));
        }
        out
    };
    lines.extend(rank("🏆 Net buy", flow.top_buyers(top_n)));
    lines.extend(rank("📉 Net sell", flow.top_sellers(top_n)));

    AnalysisResult {
        key,
        computed_at: Utc::now(),
        status: AnalysisStatus::Complete,
        metrics,
        summary: lines.join("\n"),
        annotations: Vec::new(),
    }
}

/// Per-category market net flow on two days and the change between them.
pub fn market_comparison(first: &MarketFlow, second: &MarketFlow) -> String {
    let mut lines = vec![format!("📊 Market flow {} vs {}", first.date, second.date)];
    let mut rows: Vec<(String, f64, f64)> = InvestorCategory::ALL
        .iter()
        .map(|&c| (c.to_string(), first.net_for(c), second.net_for(c)))
        .collect();
    rows.push(("total".into(), first.net_total(), second.net_total()));
    for (label, a, b) in rows {
        let change = b - a;
        let arrow = if change > 0.0 {
            "📈"
        } else if change < 0.0 {
            "📉"
        } else {
            "➡️"
        };
        lines.push(format!("{arrow} **{label}**"));
        lines.push(format!("  {}: `{}`", first.date, fmt_shares(a)));
        lines.push(format!("  {}: `{}`", second.date, fmt_shares(b)));
        lines.push(format!("  change: `{}`", fmt_shares(change)));
    }
    lines.join("\n")
}

fn direction_dot(net: f64) -> &'static str {
    if net < 0.0 {
        "🔴"
    } else {
        "🟢"
    }
}

/// Pure metric computation. `series` is newest first and starts with the
/// target day.
pub fn compute(key: DataSourceKey, series: &[ChipSnapshot], options: &AnalysisOptions) -> AnalysisResult {
    let mut metrics: BTreeMap<String, MetricValue> = BTreeMap::new();
    let mut annotations = Vec::new();
    let mut status = AnalysisStatus::Complete;

    let Some(current) = series.first() else {
        return AnalysisResult::no_data(key, "empty series");
    };

    for category in InvestorCategory::ALL {
        metrics.insert(format!("net_buy_{category}"), current.net_for(category).into());
    }
    let net = current.net_total();
    let gross = current.gross_total();
    let ratio = if gross > 0.0 { net / gross } else { 0.0 };
    let direction = if net > 0.0 {
        "net_buy"
    } else if net < 0.0 {
        "net_sell"
    } else {
        "flat"
    };
    metrics.insert("net_buy_total".into(), net.into());
    metrics.insert("gross_volume".into(), gross.into());
    metrics.insert("pressure_ratio".into(), ratio.into());
    metrics.insert("pressure_direction".into(), direction.into());

    let shortest = options.windows.first().copied().unwrap_or(1);
    let recent = &series[..shortest.min(series.len())];
    metrics.insert(
        format!("concentration_top{}", options.top_n),
        concentration(recent, options.top_n).into(),
    );

    for &w in &options.windows {
        let window = &series[..w.min(series.len())];
        let days = window.len();
        let mean_total = window.iter().map(ChipSnapshot::net_total).sum::<f64>() / days as f64;
        let mean_foreign = window
            .iter()
            .map(|s| s.net_for(InvestorCategory::Foreign))
            .sum::<f64>()
            / days as f64;

        metrics.insert(format!("trend_mean_{w}d"), mean_total.into());
        metrics.insert(format!("trend_delta_{w}d"), (net - mean_total).into());
        metrics.insert(
            format!("trend_delta_foreign_{w}d"),
            (current.net_for(InvestorCategory::Foreign) - mean_foreign).into(),
        );
        metrics.insert(format!("trend_days_{w}d"), (days as f64).into());

        if days < w {
            status = AnalysisStatus::Partial;
            annotations.push(format!("partial: trend_{w}d uses {days} of {w} trading days"));
        }
    }

    let summary = render_summary(current, &metrics, options);
    AnalysisResult {
        key,
        computed_at: Utc::now(),
        status,
        metrics,
        summary,
        annotations,
    }
}

fn concentration(window: &[ChipSnapshot], top_n: usize) -> f64 {
    let mut per_participant: HashMap<&str, (f64, f64)> = HashMap::new();
    for snapshot in window {
        for p in &snapshot.participants {
            let entry = per_participant.entry(p.name.as_str()).or_insert((0.0, 0.0));
            entry.0 += p.buy;
            entry.1 += p.sell;
        }
    }
    let gross: f64 = per_participant.values().map(|(b, s)| b + s).sum();
    if gross <= 0.0 {
        return 0.0;
    }
    let mut abs_net: Vec<f64> = per_participant.values().map(|(b, s)| (b - s).abs()).collect();
    abs_net.sort_by(|a, b| b.total_cmp(a));
    let top: f64 = abs_net.iter().take(top_n).sum();
    (top / gross).clamp(0.0, 1.0)
}

fn render_summary(current: &ChipSnapshot, metrics: &BTreeMap<String, MetricValue>, options: &AnalysisOptions) -> String {
    let get = |name: &str| metrics.get(name).and_then(MetricValue::as_f64).unwrap_or(0.0);
    let name = current
        .stock_name
        .as_deref()
        .map(|n| format!("{} {n}", current.stock_id))
        .unwrap_or_else(|| current.stock_id.clone());

    let mut lines = vec![
        format!("{name} institutional flow on {}", current.date),
        format!(
            "Foreign {} | Trust {} | Dealer {} | Total {}",
            fmt_shares(get("net_buy_foreign")),
            fmt_shares(get("net_buy_trust")),
            fmt_shares(get("net_buy_dealer")),
            fmt_shares(get("net_buy_total")),
        ),
        format!(
            "Pressure {:+.1}% ({})",
            get("pressure_ratio") * 100.0,
            metrics
                .get("pressure_direction")
                .and_then(MetricValue::as_label)
                .unwrap_or("flat")
        ),
        format!(
            "Top-{} concentration {:.1}%",
            options.top_n,
            get(&format!("concentration_top{}", options.top_n)) * 100.0
        ),
    ];
    for w in &options.windows {
        lines.push(format!(
            "Trend {w}d: {} vs mean {} over {} days",
            fmt_shares(get(&format!("trend_delta_{w}d"))),
            fmt_shares(get(&format!("trend_mean_{w}d"))),
            get(&format!("trend_days_{w}d")) as usize
        ));
    }
    lines.join("\n")
}

/// Signed share count with thousands separators.
pub fn fmt_shares(v: f64) -> String {
    let rounded = v.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if rounded > 0 {
        "+"
    } else if rounded < 0 {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}")
}
