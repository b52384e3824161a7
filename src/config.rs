//! Typed configuration read from the environment (and `.env`, loaded by the
//! binary). Invalid values are `Configuration` errors; absent credentials only
//! disable the jobs that need them.

use crate::application::chip_analytics::AnalysisOptions;
use crate::application::orchestrator::PipelineSettings;
use crate::application::retry::RetryPolicy;
use crate::domain::entities::job_spec::JobKind;
use crate::domain::error::DomainError;
use crate::domain::values::cron_expr::CronExpr;
use crate::infrastructure::providers::{openrouter, twse};
use chrono_tz::Tz;
use regex::Regex;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "./marketpulse.db";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub timezone: Tz,
    pub chip_schedule: CronExpr,
    pub chip_autorun: bool,
    pub video_schedule: CronExpr,
    pub video_autorun: bool,
    pub watchlist: Vec<String>,
    /// Ranked stocks per side in the market overview; 0 turns the overview off.
    pub market_top_n: usize,
    pub video_channels: Vec<String>,
    pub title_pattern: Option<Regex>,
    pub video_topic: String,
    pub retry: RetryPolicy,
    pub analysis: AnalysisOptions,
    pub cache_enabled: bool,
    pub cache_ttl: chrono::Duration,
    pub concurrency: usize,
    pub twse_url: String,
    pub transcript_endpoint: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    pub discord_token: Option<String>,
    pub chip_channel: Option<String>,
    pub finance_channel: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timezone = match get("MARKETPULSE_TIMEZONE") {
            Some(v) => v
                .parse::<Tz>()
                .map_err(|_| invalid("MARKETPULSE_TIMEZONE", &v, "unknown IANA timezone"))?,
            None => chrono_tz::Asia::Taipei,
        };

        let title_pattern = match get("MARKETPULSE_VIDEO_TITLE_PATTERN") {
            Some(p) => Some(Regex::new(&p).map_err(|e| invalid("MARKETPULSE_VIDEO_TITLE_PATTERN", &p, &e.to_string()))?),
            None => None,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "MARKETPULSE_RETRY_MAX_ATTEMPTS", 3u32)?.max(1),
            malformed_max_attempts: parse_or(&get, "MARKETPULSE_RETRY_MALFORMED_MAX_ATTEMPTS", 2u32)?.max(1),
            base_delay: Duration::from_millis(parse_or(&get, "MARKETPULSE_RETRY_BASE_DELAY_MS", 1000u64)?),
            max_delay: Duration::from_millis(parse_or(&get, "MARKETPULSE_RETRY_MAX_DELAY_MS", 10_000u64)?),
            call_timeout: Duration::from_secs(parse_or(&get, "MARKETPULSE_CALL_TIMEOUT_SECS", 30u64)?.max(1)),
        };

        let windows = match get("MARKETPULSE_TREND_WINDOWS") {
            Some(v) => split_list(&v)
                .iter()
                .map(|w| match w.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(invalid("MARKETPULSE_TREND_WINDOWS", &v, "expected positive integers")),
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![5, 20],
        };

        Ok(Self {
            db_path: get("MARKETPULSE_DB").unwrap_or_else(|| DEFAULT_DB_PATH.into()),
            timezone,
            chip_schedule: cron_or(&get, "MARKETPULSE_CHIP_SCHEDULE", "0 16 * * 1-5")?,
            chip_autorun: parse_bool(&get, "MARKETPULSE_CHIP_AUTORUN", true)?,
            video_schedule: cron_or(&get, "MARKETPULSE_VIDEO_SCHEDULE", "0 8 * * *")?,
            video_autorun: parse_bool(&get, "MARKETPULSE_VIDEO_AUTORUN", true)?,
            watchlist: get("MARKETPULSE_CHIP_WATCHLIST")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| vec!["2330".into()]),
            market_top_n: parse_or(&get, "MARKETPULSE_MARKET_TOP_N", 10usize)?,
            video_channels: get("MARKETPULSE_VIDEO_CHANNELS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            title_pattern,
            video_topic: get("MARKETPULSE_VIDEO_TOPIC").unwrap_or_else(|| "daily_finance".into()),
            retry,
            analysis: AnalysisOptions {
                windows,
                top_n: parse_or(&get, "MARKETPULSE_CONCENTRATION_TOP_N", 5usize)?.max(1),
            },
            cache_enabled: parse_bool(&get, "MARKETPULSE_CACHE_ENABLED", false)?,
            cache_ttl: chrono::Duration::seconds(parse_or(&get, "MARKETPULSE_CACHE_TTL_SECS", 3600i64)?),
            concurrency: parse_or(&get, "MARKETPULSE_BATCH_CONCURRENCY", 3usize)?.max(1),
            twse_url: get("TWSE_API_URL").unwrap_or_else(|| twse::DEFAULT_BASE_URL.into()),
            transcript_endpoint: get("YOUTUBE_SOURCE_ENDPOINT"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            openrouter_base_url: get("OPENROUTER_BASE_URL").unwrap_or_else(|| openrouter::DEFAULT_BASE_URL.into()),
            discord_token: get("DISCORD_BOT_TOKEN"),
            chip_channel: get("CHIP_CHANNEL_ID"),
            finance_channel: get("FINANCE_CHANNEL_ID"),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            watchlist: self.watchlist.clone(),
            market_top_n: self.market_top_n,
            chip_channel: self.chip_channel.clone(),
            video_channels: self.video_channels.clone(),
            finance_channel: self.finance_channel.clone(),
            video_topic: self.video_topic.clone(),
            concurrency: self.concurrency,
            ..PipelineSettings::default()
        }
    }

    /// Why `kind` cannot run with this configuration, if it cannot.
    /// A dry run needs no sink credentials.
    pub fn missing_for(&self, kind: JobKind, dry_run: bool) -> Option<String> {
        let mut missing = Vec::new();
        if !dry_run && self.discord_token.is_none() {
            missing.push("DISCORD_BOT_TOKEN");
        }
        match kind {
            JobKind::ChipDaily => {
                if self.chip_channel.is_none() {
                    missing.push("CHIP_CHANNEL_ID");
                }
            }
            JobKind::VideoDigest => {
                if self.finance_channel.is_none() {
                    missing.push("FINANCE_CHANNEL_ID");
                }
                if self.transcript_endpoint.is_none() {
                    missing.push("YOUTUBE_SOURCE_ENDPOINT");
                }
                if self.openrouter_api_key.is_none() {
                    missing.push("OPENROUTER_API_KEY");
                }
            }
        }
        if missing.is_empty() {
            None
        } else {
            Some(format!("missing {}", missing.join(", ")))
        }
    }
}

fn invalid(key: &str, value: &str, why: &str) -> DomainError {
    DomainError::Configuration(format!("{key}='{value}': {why}"))
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, DomainError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.parse::<T>().map_err(|_| invalid(key, &v, "not a valid number")),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, DomainError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, &v, "expected true or false")),
        },
    }
}

fn cron_or<G>(get: &G, key: &str, default: &str) -> Result<CronExpr, DomainError>
where
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key).unwrap_or_else(|| default.to_string());
    raw.parse::<CronExpr>()
        .map_err(|e| invalid(key, &raw, &e.to_string()))
}
