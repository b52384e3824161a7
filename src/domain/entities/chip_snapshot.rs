//! Normalized institutional flow for one stock on one trading day.
//!
//! Providers store this shape as the payload of a chip [`RawRecord`] so the
//! analytics engine never sees a vendor format.

use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use crate::domain::values::investor_category::InvestorCategory;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantFlow {
    /// Stable participant name, e.g. `foreign_ex_dealer`.
    pub name: String,
    pub category: InvestorCategory,
    /// Shares bought.
    pub buy: f64,
    /// Shares sold.
    pub sell: f64,
}

impl ParticipantFlow {
    pub fn new(name: &str, category: InvestorCategory, buy: f64, sell: f64) -> Self {
        Self {
            name: name.to_string(),
            category,
            buy,
            sell,
        }
    }

    pub fn net(&self) -> f64 {
        self.buy - self.sell
    }

    pub fn gross(&self) -> f64 {
        self.buy + self.sell
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipSnapshot {
    pub stock_id: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub date: NaiveDate,
    pub participants: Vec<ParticipantFlow>,
}

impl ChipSnapshot {
    pub fn from_record(record: &RawRecord) -> Result<Self, DomainError> {
        serde_json::from_value(record.payload.clone()).map_err(|e| {
            DomainError::MalformedResponse(format!("chip payload for {}: {e}", record.key))
        })
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn net_total(&self) -> f64 {
        self.participants.iter().map(ParticipantFlow::net).sum()
    }

    pub fn gross_total(&self) -> f64 {
        self.participants.iter().map(ParticipantFlow::gross).sum()
    }

    pub fn net_for(&self, category: InvestorCategory) -> f64 {
        self.participants
            .iter()
            .filter(|p| p.category == category)
            .map(ParticipantFlow::net)
            .sum()
    }
}
