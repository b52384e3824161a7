use crate::domain::entities::data_key::DataSourceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: DataSourceKey,
    pub fetched_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(key: DataSourceKey, payload: serde_json::Value) -> Self {
        Self {
            key,
            fetched_at: Utc::now(),
            payload,
        }
    }
}
