use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct DispatchEnvelope {
    /// Logical topic; one discussion thread per topic and channel.
    pub topic: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub target_channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub thread_ref: Option<ThreadRef>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(thread_ref: ThreadRef) -> Self {
        Self {
            success: true,
            thread_ref: Some(thread_ref),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            thread_ref: None,
            error: Some(error.into()),
        }
    }
}

/// One row of the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub topic: String,
    pub target_channel: String,
    pub success: bool,
    pub thread_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn from_result(envelope: &DispatchEnvelope, result: &DeliveryResult, attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: envelope.topic.clone(),
            target_channel: envelope.target_channel.clone(),
            success: result.success,
            thread_id: result.thread_ref.as_ref().map(|t| t.id.clone()),
            attempts,
            error: result.error.clone(),
            delivered_at: Utc::now(),
        }
    }
}
