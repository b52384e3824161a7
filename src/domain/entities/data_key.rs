use crate::domain::values::source_type::SourceType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one unit of fetchable data: one stock's chip data for one
/// trading day, or one item published by a video channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceKey {
    pub source_type: SourceType,
    pub identifier: String,
    pub period: String,
}

impl DataSourceKey {
    pub fn new(source_type: SourceType, identifier: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            source_type,
            identifier: identifier.into(),
            period: period.into(),
        }
    }

    pub fn chip(stock_id: &str, date: chrono::NaiveDate) -> Self {
        Self::new(SourceType::Chip, stock_id, date.format("%Y-%m-%d").to_string())
    }

    pub fn video(channel: &str, item_id: &str) -> Self {
        Self::new(SourceType::Video, channel, item_id)
    }

    /// Key used to serialize work on this unit.
    pub fn lock_key(&self) -> String {
        format!("{}:{}:{}", self.source_type, self.identifier, self.period)
    }
}

impl fmt::Display for DataSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source_type, self.identifier, self.period)
    }
}
