pub mod delivery_log;
pub mod marker_store;
pub mod migrations;
pub mod raw_cache;
pub mod thread_map;
