use crate::domain::entities::envelope::DeliveryRecord;
use crate::domain::error::DomainError;

pub trait DeliveryLog: Send + Sync {
    fn record(&self, record: &DeliveryRecord) -> Result<(), DomainError>;
    /// Most recent first.
    fn list(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DomainError>;
}
