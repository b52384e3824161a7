pub mod analysis_result;
pub mod chip_snapshot;
pub mod data_key;
pub mod envelope;
pub mod job_spec;
pub mod market_flow;
pub mod media_item;
pub mod processed_marker;
pub mod raw_record;
