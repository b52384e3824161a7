use crate::domain::entities::data_key::DataSourceKey;
use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use chrono::{DateTime, Utc};

pub trait RawCache: Send + Sync {
    /// Returns the cached record if it was fetched at or after `fresh_since`.
    fn get(&self, key: &DataSourceKey, fresh_since: Option<DateTime<Utc>>) -> Result<Option<RawRecord>, DomainError>;
    fn put(&self, record: &RawRecord) -> Result<(), DomainError>;
}
