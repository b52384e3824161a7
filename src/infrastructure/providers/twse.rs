//! TWSE T86 ("institutional investors net buy/sell by security") provider.
//!
//! One T86 request returns every listed stock for a date, so tables are kept
//! per date and shared by every stock of a batch.

use crate::domain::entities::chip_snapshot::{ChipSnapshot, ParticipantFlow};
use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::entities::market_flow::MarketFlow;
use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use crate::domain::ports::chip_provider::ChipDataProvider;
use crate::domain::values::investor_category::InvestorCategory;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.twse.com.tw/rwd/zh/fund";

/// Dates kept in memory.
const MAX_TABLES: usize = 64;

/// (participant, category, buy column, sell column) in a `selectType=ALL` row.
const COLUMNS: [(&str, InvestorCategory, usize, usize); 5] = [
    ("foreign_ex_dealer", InvestorCategory::Foreign, 2, 3),
    ("foreign_dealer", InvestorCategory::Foreign, 5, 6),
    ("investment_trust", InvestorCategory::Trust, 8, 9),
    ("dealer_proprietary", InvestorCategory::Dealer, 12, 13),
    ("dealer_hedge", InvestorCategory::Dealer, 15, 16),
];
const MIN_ROW_LEN: usize = 18;

#[derive(Debug, serde::Deserialize)]
struct T86Response {
    stat: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

/// Rows of one trading day keyed by stock code.
#[derive(Debug)]
struct T86Table {
    rows: HashMap<String, Vec<String>>,
}

pub struct TwseChipProvider {
    base_url: String,
    client: reqwest::Client,
    tables: Mutex<BTreeMap<NaiveDate, Arc<T86Table>>>,
}

impl TwseChipProvider {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0 (marketpulse)")
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            tables: Mutex::new(BTreeMap::new()),
        }
    }

    async fn table(&self, date: NaiveDate) -> Result<Arc<T86Table>, DomainError> {
        // Held across the request: TWSE throttles bursts, so one request at a time.
        let mut tables = self.tables.lock().await;
        if let Some(t) = tables.get(&date) {
            return Ok(t.clone());
        }

        let day = date.format("%Y%m%d").to_string();
        let url = format!("{}/T86", self.base_url);
        debug!(%date, "fetching T86 table");
        let resp = self
            .client
            .get(&url)
            .query(&[("response", "json"), ("date", day.as_str()), ("selectType", "ALL")])
            .send()
            .await
            .map_err(|e| DomainError::from_http("TWSE T86", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::from_status("TWSE T86", status, &body));
        }
        let parsed: T86Response = resp
            .json()
            .await
            .map_err(|e| DomainError::MalformedResponse(format!("TWSE T86: {e}")))?;

        let table = Arc::new(parse_table(&day, parsed)?);
        info!(%date, stocks = table.rows.len(), "T86 table loaded");

        tables.insert(date, table.clone());
        while tables.len() > MAX_TABLES {
            if let Some(oldest) = tables.keys().next().copied() {
                tables.remove(&oldest);
            }
        }
        Ok(table)
    }
}

fn cell(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn parse_table(requested: &str, resp: T86Response) -> Result<T86Table, DomainError> {
    if resp.stat != "OK" {
        return Err(DomainError::NotFound(format!("T86 {requested}: {}", resp.stat)));
    }
    // TWSE answers with the latest published day when the requested one is not out yet.
    if let Some(date) = resp.date.as_deref() {
        if date != requested {
            return Err(DomainError::NotFound(format!(
                "T86 {requested}: latest published day is {date}"
            )));
        }
    }
    let rows = resp
        .data
        .into_iter()
        .filter_map(|row| {
            let cells: Vec<String> = row.iter().map(cell).collect();
            let code = cells.first()?.clone();
            Some((code, cells))
        })
        .collect();
    Ok(T86Table { rows })
}

fn shares(raw: &str) -> Result<f64, DomainError> {
    raw.replace(',', "")
        .trim()
        .parse::<f64>()
        .map_err(|_| DomainError::MalformedResponse(format!("T86 share count '{raw}'")))
}

fn row_to_snapshot(stock_id: &str, date: NaiveDate, row: &[String]) -> Result<ChipSnapshot, DomainError> {
    if row.len() < MIN_ROW_LEN {
        return Err(DomainError::MalformedResponse(format!(
            "T86 row for {stock_id} has {} columns",
            row.len()
        )));
    }
    let participants = COLUMNS
        .iter()
        .map(|(name, category, buy, sell)| {
            Ok(ParticipantFlow::new(name, *category, shares(&row[*buy])?, shares(&row[*sell])?))
        })
        .collect::<Result<Vec<_>, DomainError>>()?;

    Ok(ChipSnapshot {
        stock_id: stock_id.to_string(),
        stock_name: row.get(1).filter(|n| !n.is_empty()).cloned(),
        date,
        participants,
    })
}

#[async_trait]
impl ChipDataProvider for TwseChipProvider {
    fn name(&self) -> &str {
        "twse"
    }

    async fn fetch_chip_data(&self, stock_id: &str, date: NaiveDate) -> Result<RawRecord, DomainError> {
        let table = self.table(date).await?;
        let row = table
            .rows
            .get(stock_id)
            .ok_or_else(|| DomainError::NotFound(format!("{stock_id} not in T86 for {date}")))?;
        let snapshot = row_to_snapshot(stock_id, date, row)?;
        Ok(RawRecord::new(DataSourceKey::chip(stock_id, date), snapshot.to_payload()))
    }

    async fn fetch_market_data(&self, date: NaiveDate) -> Result<MarketFlow, DomainError> {
        let table = self.table(date).await?;
        Ok(market_from_table(date, &table))
    }
}

/// Every parseable row of the table. Rows that do not parse are skipped.
fn market_from_table(date: NaiveDate, table: &T86Table) -> MarketFlow {
    let mut skipped = 0usize;
    let mut stocks: Vec<ChipSnapshot> = table
        .rows
        .iter()
        .filter_map(|(code, row)| match row_to_snapshot(code, date, row) {
            Ok(s) => Some(s),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        warn!(%date, skipped, "unparseable T86 rows left out of market table");
    }
    stocks.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
    MarketFlow { date, stocks }
}
