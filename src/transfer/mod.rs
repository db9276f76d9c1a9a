use std::path::PathBuf;
use thiserror::Error;

pub mod engine;
pub mod progress;
pub mod task;

pub use engine::{BatchReport, ChunkPolicy, TransferEngine};
pub use progress::{ProgressSink, ProgressThrottle, SpeedCalculator, TransferProgress};
pub use task::{TaskState, TransferTask};

use crate::remote::RemoteError;

/// Errors from the transfer engine
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}
