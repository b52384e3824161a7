use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// Expected absence (market holiday, no transcript). Never retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or rate limit.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The collaborator answered with an unusable payload.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dispatch failure: {0}")]
    Dispatch(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job '{0}' is already running")]
    JobBusy(String),
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::Transient(_) | DomainError::MalformedResponse(_) | DomainError::Dispatch(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }

    /// Classify a reqwest failure: timeouts and connection errors are transient.
    pub fn from_http(context: &str, e: reqwest::Error) -> Self {
        if e.is_decode() {
            DomainError::MalformedResponse(format!("{context}: {e}"))
        } else {
            DomainError::Transient(format!("{context}: {e}"))
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(context: &str, status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            DomainError::NotFound(format!("{context}: {status}"))
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            DomainError::Configuration(format!("{context}: {status} {body}"))
        } else {
            DomainError::Transient(format!("{context}: {status} {body}"))
        }
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(e: rusqlite::Error) -> Self {
        DomainError::Database(e.to_string())
    }
}
