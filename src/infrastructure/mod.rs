pub mod providers;
pub mod sinks;
pub mod sqlite;
