pub mod console;

pub use console::{format_metrics_table, format_prioritized};
