use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{RemoteError, RemoteFile, RemoteStore};

/// Name of the sentinel file that marks a folder as deferred because the
/// recorder was still writing into it at scan time.
pub const SKIP_SENTINEL: &str = ".skip";

/// Result of scanning the remote recording tree.
#[derive(Debug, Default)]
pub struct FolderScan {
    /// Pull-ready files in listing order.
    pub files: Vec<RemoteFile>,
    /// Sum of the ready files' sizes.
    pub total_bytes: u64,
    /// Folders that still contained live recordings.
    pub deferred_folders: usize,
}

/// Per-folder readiness view, for the read-only check mode.
#[derive(Debug)]
pub struct FolderSurvey {
    pub folder: String,
    pub ready: Vec<RemoteFile>,
    pub recording_in_progress: bool,
}

/// Enumerates remote recording folders and decides pull-readiness.
///
/// A file is ready once its modify time is older than the staleness window;
/// a folder holding any non-ready file is deferred for this run and marked
/// with a `.skip` sentinel in its local mirror so later stages pass it over
/// without re-querying remote state.
pub struct RemoteLister<'a> {
    store: &'a dyn RemoteStore,
    remote_root: String,
    staging_dir: PathBuf,
    staleness: Duration,
}

impl<'a> RemoteLister<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        remote_root: &str,
        staging_dir: &Path,
        staleness: Duration,
    ) -> Self {
        Self {
            store,
            remote_root: remote_root.trim_end_matches('/').to_string(),
            staging_dir: staging_dir.to_path_buf(),
            staleness,
        }
    }

    /// Scan the remote tree, maintain skip sentinels, and build the pull list.
    pub async fn scan(&self) -> Result<FolderScan, RemoteError> {
        let now = Utc::now();
        let mut scan = FolderScan::default();

        let folders = self.store.list_dir(&self.remote_root).await?;

        for folder in folders.iter().filter(|e| e.is_dir) {
            let folder_path = format!("{}/{}", self.remote_root, folder.name);
            debug!("listing {}", folder_path);

            let entries = self.store.list_dir(&folder_path).await?;

            let local_folder = self.staging_dir.join(&folder.name);
            let sentinel = local_folder.join(SKIP_SENTINEL);

            // A sentinel left by an earlier run no longer reflects remote
            // state; drop it before re-deciding.
            if sentinel.exists() {
                let _ = tokio::fs::remove_file(&sentinel).await;
            }

            let mut still_recording = false;

            for entry in entries.iter().filter(|e| !e.is_dir) {
                let file = RemoteFile {
                    remote_path: format!("{}/{}", folder_path, entry.name),
                    size: entry.size,
                    modify_time: entry.modify_time,
                    parent_folder: folder.name.clone(),
                };

                if file.is_pull_ready(now, self.staleness) {
                    scan.total_bytes += file.size;
                    scan.files.push(file);
                } else {
                    still_recording = true;
                }
            }

            if still_recording {
                info!(
                    "deferring {}: files are still being recorded",
                    folder.name
                );
                tokio::fs::create_dir_all(&local_folder)
                    .await
                    .map_err(|e| RemoteError::List {
                        path: folder_path.clone(),
                        source: Box::new(e),
                    })?;
                tokio::fs::write(&sentinel, b"")
                    .await
                    .map_err(|e| RemoteError::List {
                        path: folder_path.clone(),
                        source: Box::new(e),
                    })?;
                scan.deferred_folders += 1;
            }
        }

        info!(
            "{} files ready to pull, {} folders deferred",
            scan.files.len(),
            scan.deferred_folders
        );

        Ok(scan)
    }

    /// Read-only readiness survey; never touches local or remote state.
    pub async fn survey(&self) -> Result<Vec<FolderSurvey>, RemoteError> {
        let now = Utc::now();
        let mut surveys = Vec::new();

        let folders = self.store.list_dir(&self.remote_root).await?;

        for folder in folders.iter().filter(|e| e.is_dir) {
            let folder_path = format!("{}/{}", self.remote_root, folder.name);
            let entries = self.store.list_dir(&folder_path).await?;

            let mut ready = Vec::new();
            let mut recording_in_progress = false;

            for entry in entries.iter().filter(|e| !e.is_dir) {
                let file = RemoteFile {
                    remote_path: format!("{}/{}", folder_path, entry.name),
                    size: entry.size,
                    modify_time: entry.modify_time,
                    parent_folder: folder.name.clone(),
                };
                if file.is_pull_ready(now, self.staleness) {
                    ready.push(file);
                } else {
                    recording_in_progress = true;
                }
            }

            surveys.push(FolderSurvey {
                folder: folder.name.clone(),
                ready,
                recording_in_progress,
            });
        }

        Ok(surveys)
    }

    /// Local mirror path for a remote file, preserving the folder level.
    pub fn local_path_for(&self, file: &RemoteFile) -> PathBuf {
        self.staging_dir
            .join(&file.parent_folder)
            .join(file.file_name())
    }
}

/// Whether a local mirror folder was deferred by the last remote scan.
pub fn is_deferred(folder: &Path) -> bool {
    folder.join(SKIP_SENTINEL).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteEntry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Directory tree served from memory, keyed by path.
    struct FakeStore {
        dirs: BTreeMap<String, Vec<RemoteEntry>>,
    }

    #[async_trait]
    impl RemoteStore for FakeStore {
        async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
            Ok(self.dirs.get(path).cloned().unwrap_or_default())
        }

        async fn stat_size(&self, _path: &str) -> Result<u64, RemoteError> {
            Ok(0)
        }

        async fn read_chunk(
            &self,
            _path: &str,
            _offset: u64,
            _len: u64,
        ) -> Result<Bytes, RemoteError> {
            Ok(Bytes::new())
        }

        async fn remove(&self, _path: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn dir_entry(name: &str) -> RemoteEntry {
        RemoteEntry {
            name: name.into(),
            is_dir: true,
            size: 0,
            modify_time: Utc::now(),
        }
    }

    fn file_entry(name: &str, size: u64, modify_time: DateTime<Utc>) -> RemoteEntry {
        RemoteEntry {
            name: name.into(),
            is_dir: false,
            size,
            modify_time,
        }
    }

    fn fake_store(now: DateTime<Utc>) -> FakeStore {
        let old = now - Duration::minutes(30);
        let fresh = now - Duration::seconds(10);

        let mut dirs = BTreeMap::new();
        dirs.insert(
            "/rec".to_string(),
            vec![dir_entry("cam1"), dir_entry("cam2")],
        );
        // cam1 is fully flushed.
        dirs.insert(
            "/rec/cam1".to_string(),
            vec![
                file_entry("2023-01-15_18-30-00.mp4", 100, old),
                file_entry("2023-01-15_19-00-00.mp4", 200, old),
            ],
        );
        // cam2 still has a live recording.
        dirs.insert(
            "/rec/cam2".to_string(),
            vec![
                file_entry("2023-01-15_20-00-00.mp4", 300, old),
                file_entry("2023-01-15_20-30-00.mp4", 50, fresh),
            ],
        );
        FakeStore { dirs }
    }

    #[tokio::test]
    async fn scan_partitions_ready_files_and_defers_live_folders() {
        let staging = TempDir::new().unwrap();
        let store = fake_store(Utc::now());
        let lister = RemoteLister::new(&store, "/rec", staging.path(), Duration::minutes(5));

        let scan = lister.scan().await.unwrap();

        // All stale files are queued, including the one in the deferred folder.
        assert_eq!(scan.files.len(), 3);
        assert_eq!(scan.total_bytes, 600);
        assert_eq!(scan.deferred_folders, 1);

        assert!(is_deferred(&staging.path().join("cam2")));
        assert!(!is_deferred(&staging.path().join("cam1")));
    }

    #[tokio::test]
    async fn scan_clears_stale_sentinels() {
        let staging = TempDir::new().unwrap();

        // cam1 carries a sentinel from an earlier run.
        let cam1 = staging.path().join("cam1");
        std::fs::create_dir_all(&cam1).unwrap();
        std::fs::write(cam1.join(SKIP_SENTINEL), b"").unwrap();

        let store = fake_store(Utc::now());
        let lister = RemoteLister::new(&store, "/rec", staging.path(), Duration::minutes(5));
        lister.scan().await.unwrap();

        assert!(!is_deferred(&cam1));
    }

    #[tokio::test]
    async fn survey_is_read_only() {
        let staging = TempDir::new().unwrap();
        let store = fake_store(Utc::now());
        let lister = RemoteLister::new(&store, "/rec", staging.path(), Duration::minutes(5));

        let surveys = lister.survey().await.unwrap();

        assert_eq!(surveys.len(), 2);
        assert_eq!(surveys[0].ready.len(), 2);
        assert!(!surveys[0].recording_in_progress);
        assert_eq!(surveys[1].ready.len(), 1);
        assert!(surveys[1].recording_in_progress);

        // No sentinel or directory was created.
        assert!(!staging.path().join("cam2").exists());
    }

    #[tokio::test]
    async fn local_path_mirrors_remote_layout() {
        let staging = TempDir::new().unwrap();
        let store = fake_store(Utc::now());
        let lister = RemoteLister::new(&store, "/rec", staging.path(), Duration::minutes(5));

        let file = RemoteFile {
            remote_path: "/rec/cam1/2023-01-15_18-30-00.mp4".into(),
            size: 1,
            modify_time: Utc::now(),
            parent_folder: "cam1".into(),
        };

        assert_eq!(
            lister.local_path_for(&file),
            staging.path().join("cam1").join("2023-01-15_18-30-00.mp4")
        );
    }
}
