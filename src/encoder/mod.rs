use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod probe;
pub mod runner;

pub use probe::{probe_media, ProbeInfo};
pub use runner::TranscodeRunner;

/// Errors from the external encoder processes
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("probe failed for {path}: {detail}")]
    Probe { path: PathBuf, detail: String },

    #[error("encoder failed for {path}: {detail}")]
    Failed { path: PathBuf, detail: String },
}

/// Telemetry emitted while an encode runs.
///
/// Fields mirror what ffmpeg reports on its progress pipe; `percent` is
/// derived from the timemark against the known input duration and stays
/// `None` when that duration is unknown.
#[derive(Debug, Clone, Default)]
pub struct EncodeProgress {
    pub frames: u64,
    pub fps: f64,
    pub target_size_bytes: u64,
    pub out_time: Duration,
    pub percent: Option<f64>,
}
