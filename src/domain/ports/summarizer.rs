use crate::domain::error::DomainError;
use crate::domain::values::prompt_contract::PromptContract;
use async_trait::async_trait;

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn model(&self) -> &str;

    /// Raw model output. Validation against the contract happens in the caller.
    async fn summarize(&self, text: &str, contract: &PromptContract) -> Result<String, DomainError>;
}
