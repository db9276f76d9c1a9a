use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub mod lister;
pub mod sftp;

pub use lister::{FolderScan, RemoteLister};
pub use sftp::SftpStore;

/// Errors from the remote transport layer
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("remote list failed for {path}: {source}")]
    List {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("remote stat failed for {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("remote read failed for {path} at offset {offset}: {source}")]
    Read {
        path: String,
        offset: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("remote delete failed for {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// One entry of a remote directory listing
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modify_time: DateTime<Utc>,
}

/// A remote file queued for transfer. Identity is the remote path.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub remote_path: String,
    pub size: u64,
    pub modify_time: DateTime<Utc>,
    pub parent_folder: String,
}

impl RemoteFile {
    /// Whether the remote writer can be assumed done with this file.
    ///
    /// Ready means the modify time is strictly older than `now - staleness`;
    /// a file modified exactly at the threshold is still considered live.
    pub fn is_pull_ready(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.modify_time < now - staleness
    }

    /// Final path component of the remote path.
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_path)
    }
}

/// Seam between the transfer engine and the transport.
///
/// The production implementation speaks SFTP; tests drive the engine with an
/// in-memory store instead of a network.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List one directory level.
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Size of a remote file in bytes.
    async fn stat_size(&self, path: &str) -> Result<u64, RemoteError>;

    /// Read `len` bytes starting at `offset`. The final chunk of a file may
    /// be shorter than the requested length.
    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, RemoteError>;

    /// Delete a remote file.
    async fn remove(&self, path: &str) -> Result<(), RemoteError>;
}
