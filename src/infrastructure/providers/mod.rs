pub mod openrouter;
pub mod transcript_service;
pub mod twse;
