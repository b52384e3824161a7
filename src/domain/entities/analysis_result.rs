use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::values::metric_value::MetricValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    /// Computed from less history than requested.
    Partial,
    /// No record exists for the period (holiday, not yet published).
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub key: DataSourceKey,
    pub computed_at: DateTime<Utc>,
    pub status: AnalysisStatus,
    pub metrics: BTreeMap<String, MetricValue>,
    pub summary: String,
    pub annotations: Vec<String>,
}

impl AnalysisResult {
    pub fn no_data(key: DataSourceKey, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            summary: format!("No data for {} on {}: {reason}", key.identifier, key.period),
            key,
            computed_at: Utc::now(),
            status: AnalysisStatus::NoData,
            metrics: BTreeMap::new(),
            annotations: vec![reason],
        }
    }

    pub fn has_data(&self) -> bool {
        self.status != AnalysisStatus::NoData
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::as_f64)
    }
}
