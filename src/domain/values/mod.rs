pub mod cron_expr;
pub mod investor_category;
pub mod metric_value;
pub mod prompt_contract;
pub mod source_type;
