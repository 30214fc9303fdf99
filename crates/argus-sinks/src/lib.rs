//! Downstream sinks consuming only the engine's result payload.

pub mod notify;
pub mod sheets;
pub mod tabular;

pub use notify::format_summary;
pub use sheets::{SheetClient, SheetSyncPlan, plan_sync, sync_rows};
pub use tabular::{Row, flatten_rows, sanitize_cell, to_csv_string, write_csv};

use thiserror::Error;

/// Sink-level failures.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),
}
