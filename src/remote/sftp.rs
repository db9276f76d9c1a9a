use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use openssh::{KnownHosts, SessionBuilder};
use openssh_sftp_client::file::TokioCompatFile;
use openssh_sftp_client::{Sftp, SftpOptions};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{RemoteEntry, RemoteError, RemoteStore};
use crate::config::RemoteConfig;

fn boxed<E: std::error::Error + Send + Sync + 'static>(
    e: E,
) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(e)
}

/// SFTP-backed [`RemoteStore`] over an openssh multiplexed session.
///
/// Authentication is key/agent based; the session is established once and
/// reused for every list/read/delete on the batch.
pub struct SftpStore {
    sftp: Sftp,
}

impl SftpStore {
    /// Connect to the configured host. Failure here is fatal to the run.
    pub async fn connect(config: &RemoteConfig) -> Result<Self, RemoteError> {
        debug!("connecting to {}:{}", config.host, config.port);

        let mut builder = SessionBuilder::default();
        builder.user(config.username.clone());
        builder.port(config.port);
        builder.known_hosts_check(KnownHosts::Accept);
        if let Some(identity) = &config.identity_file {
            builder.keyfile(identity);
        }

        let session = builder
            .connect_mux(&config.host)
            .await
            .map_err(|e| RemoteError::Connect {
                host: config.host.clone(),
                source: boxed(e),
            })?;

        let sftp = Sftp::from_session(session, SftpOptions::default())
            .await
            .map_err(|e| RemoteError::Connect {
                host: config.host.clone(),
                source: boxed(e),
            })?;

        Ok(Self { sftp })
    }

    /// Close the underlying session.
    pub async fn disconnect(self) -> Result<(), RemoteError> {
        self.sftp.close().await.map_err(|e| RemoteError::Connect {
            host: String::new(),
            source: boxed(e),
        })
    }
}

#[async_trait::async_trait]
impl RemoteStore for SftpStore {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let list_err = |e: openssh_sftp_client::Error| RemoteError::List {
            path: path.to_string(),
            source: boxed(e),
        };

        let dir = self.sftp.fs().open_dir(path).await.map_err(list_err)?;
        let mut read_dir = Box::pin(dir.read_dir());

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.try_next().await.map_err(list_err)? {
            let name = entry.filename().to_string_lossy().into_owned();
            if name == "." || name == ".." {
                continue;
            }

            let meta = entry.metadata();
            let modify_time = meta
                .modified()
                .map(|t| DateTime::<Utc>::from(t.as_system_time()))
                .unwrap_or_else(Utc::now);

            entries.push(RemoteEntry {
                name,
                is_dir: meta.file_type().map(|t| t.is_dir()).unwrap_or(false),
                size: meta.len().unwrap_or(0),
                modify_time,
            });
        }

        Ok(entries)
    }

    async fn stat_size(&self, path: &str) -> Result<u64, RemoteError> {
        let meta = self
            .sftp
            .fs()
            .metadata(path)
            .await
            .map_err(|e| RemoteError::Stat {
                path: path.to_string(),
                source: boxed(e),
            })?;
        Ok(meta.len().unwrap_or(0))
    }

    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, RemoteError> {
        let read_err = |source: Box<dyn std::error::Error + Send + Sync>| RemoteError::Read {
            path: path.to_string(),
            offset,
            source,
        };

        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| read_err(boxed(e)))?;

        let mut reader = Box::pin(TokioCompatFile::from(file));
        reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| read_err(boxed(e)))?;

        // The final chunk of a file may come up short; read whatever the
        // window holds rather than insisting on `len` bytes.
        let mut buf = Vec::with_capacity(len as usize);
        reader
            .take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| read_err(boxed(e)))?;

        Ok(Bytes::from(buf))
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        self.sftp
            .fs()
            .remove_file(path)
            .await
            .map_err(|e| RemoteError::Delete {
                path: path.to_string(),
                source: boxed(e),
            })
    }
}
