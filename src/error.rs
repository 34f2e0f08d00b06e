use std::io;

use thiserror::Error;

/// Failures surfaced to whoever invoked a device action. Polling-path
/// network errors never appear here; they degrade to belief state instead.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no such device: {0}")]
    UnknownDevice(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("wake failed: {0}")]
    WakeFailed(#[from] io::Error),
}
