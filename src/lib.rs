/// recpipe - personal media pipeline
///
/// Pulls recorded video segments from a remote NAS over SFTP, transcodes and
/// merges recording sessions with an external encoder, and files the results
/// into a self-hosted media catalog.
pub mod catalog;
pub mod check;
pub mod config;
pub mod encoder;
pub mod filename;
pub mod grouping;
pub mod instagram;
pub mod pipeline;
pub mod pull;
pub mod remote;
pub mod report;
pub mod stats;
pub mod transfer;

// Re-export main types for easy access
pub use crate::catalog::{CatalogClient, JobWaitOutcome};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::encoder::{probe_media, TranscodeRunner};
pub use crate::filename::{ExportPost, SegmentStamp};
pub use crate::grouping::{group_sessions, MediaSegment, SessionGroup};
pub use crate::remote::{RemoteFile, RemoteLister, RemoteStore, SftpStore};
pub use crate::report::Reporter;
pub use crate::transfer::{ChunkPolicy, TransferEngine, TransferTask};
