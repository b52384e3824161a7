use crate::domain::entities::processed_marker::ProcessedMarker;
use crate::domain::error::DomainError;
use crate::domain::values::source_type::SourceType;
use chrono::{DateTime, Utc};

/// Durable record of committed work.
///
/// `mark_processed` is the commit point of the pipeline: it is only called
/// after a delivery has been confirmed. Callers serialize work on one key
/// through [`crate::application::key_locks::KeyLocks`].
pub trait IdempotencyStore: Send + Sync {
    fn has_processed(
        &self,
        source_type: SourceType,
        identifier: &str,
        candidate_key: &str,
    ) -> Result<bool, DomainError>;

    fn mark_processed(
        &self,
        source_type: SourceType,
        identifier: &str,
        candidate_key: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    fn marker(&self, source_type: SourceType, identifier: &str) -> Result<Option<ProcessedMarker>, DomainError>;

    fn markers(&self) -> Result<Vec<ProcessedMarker>, DomainError>;
}
