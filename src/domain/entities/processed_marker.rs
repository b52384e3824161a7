use crate::domain::values::source_type::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most recent key committed for a (source_type, identifier) pair.
/// `last_processed_at` never moves backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub source_type: SourceType,
    pub identifier: String,
    pub last_key: String,
    pub last_processed_at: DateTime<Utc>,
}
