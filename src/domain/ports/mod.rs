pub mod chip_provider;
pub mod delivery_log;
pub mod idempotency_store;
pub mod notification_sink;
pub mod raw_cache;
pub mod summarizer;
pub mod video_source;
