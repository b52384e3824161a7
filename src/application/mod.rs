pub mod chip_analytics;
pub mod commands;
pub mod dispatcher;
pub mod key_locks;
pub mod media_summarizer;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
