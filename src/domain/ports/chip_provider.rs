use crate::domain::entities::market_flow::MarketFlow;
use crate::domain::entities::raw_record::RawRecord;
use crate::domain::error::DomainError;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Source of institutional flow records.
///
/// The returned payload is a serialized
/// [`ChipSnapshot`](crate::domain::entities::chip_snapshot::ChipSnapshot).
/// A date without published data is `DomainError::NotFound`.
#[async_trait]
pub trait ChipDataProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_chip_data(&self, stock_id: &str, date: NaiveDate) -> Result<RawRecord, DomainError>;

    /// Every stock's flow for `date`.
    async fn fetch_market_data(&self, date: NaiveDate) -> Result<MarketFlow, DomainError>;
}
