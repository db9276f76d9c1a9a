use futures::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::progress::{ProgressSink, ProgressThrottle, SpeedCalculator, TransferProgress};
use super::task::{TaskState, TransferTask};
use super::TransferError;
use crate::remote::RemoteStore;

/// Chunk-level concurrency policy.
///
/// The effective worker count backs off as more remote folders are observed
/// to still be recording, so an active recorder keeps most of the link.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub base_concurrency: usize,
}

impl ChunkPolicy {
    pub fn new(base_concurrency: usize) -> Self {
        Self { base_concurrency }
    }

    /// Concurrency for a batch given how many folders were deferred.
    pub fn effective(&self, deferred_folders: usize) -> usize {
        let divisor = match deferred_folders {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => 8,
        };
        (self.base_concurrency / divisor).max(1)
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            base_concurrency: 12,
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub tasks: Vec<TransferTask>,
    pub committed: usize,
    pub failed: usize,
    pub bytes_pulled: u64,
    pub elapsed: Duration,
}

struct BatchCtx {
    index: usize,
    count: usize,
    total_bytes: u64,
    done_before: u64,
    started: Instant,
}

/// Pulls remote files to local disk with safe commit semantics.
///
/// Files are processed strictly in input order, one at a time; within a file,
/// chunks are fetched with bounded concurrency and written at their own
/// offsets, so completion order never matters. A file is committed by
/// renaming its `.part` download to the final name; only after that rename
/// is the remote copy deleted. Any failure leaves both the `.part` file and
/// the remote original in place and moves on to the next file.
pub struct TransferEngine<'a> {
    store: &'a dyn RemoteStore,
    chunk_size: u64,
    policy: ChunkPolicy,
    progress_interval: Duration,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        chunk_size: u64,
        policy: ChunkPolicy,
        progress_interval: Duration,
    ) -> Self {
        Self {
            store,
            chunk_size,
            policy,
            progress_interval,
        }
    }

    /// Run the batch. Per-file failures are isolated; the report carries the
    /// terminal state of every task.
    pub async fn run(
        &self,
        mut tasks: Vec<TransferTask>,
        deferred_folders: usize,
        sink: &mut dyn ProgressSink,
    ) -> BatchReport {
        let concurrency = self.policy.effective(deferred_folders);
        let batch_total: u64 = tasks.iter().map(|t| t.total_bytes).sum();
        let batch_started = Instant::now();
        let count = tasks.len();

        info!(
            "pulling {} files ({} deferred folders, {} chunk workers)",
            count, deferred_folders, concurrency
        );

        let mut done_before = 0u64;
        let mut committed = 0usize;
        let mut failed = 0usize;

        for index in 0..count {
            let ctx = BatchCtx {
                index: index + 1,
                count,
                total_bytes: batch_total,
                done_before,
                started: batch_started,
            };

            let task = &mut tasks[index];
            task.state = TaskState::InFlight;
            task.started_at = Some(Instant::now());

            match self.pull_one(task, concurrency, &ctx, sink).await {
                Ok(()) => {
                    task.state = TaskState::Committed;
                    done_before += task.total_bytes;
                    committed += 1;

                    // The local rename is the authoritative commit; a failed
                    // remote delete only leaves a stale copy for a later run.
                    if let Err(e) = self.store.remove(&task.remote_file.remote_path).await {
                        warn!(
                            "remote delete failed for {} (local copy committed): {}",
                            task.remote_file.remote_path, e
                        );
                    }

                    info!("pulled {}", task.display_name());
                    sink.on_committed(task);
                }
                Err(e) => {
                    task.state = TaskState::Failed;
                    failed += 1;
                    warn!("pull failed for {}: {}", task.display_name(), e);
                    sink.on_failed(task, &e);
                }
            }
        }

        BatchReport {
            tasks,
            committed,
            failed,
            bytes_pulled: done_before,
            elapsed: batch_started.elapsed(),
        }
    }

    async fn pull_one(
        &self,
        task: &mut TransferTask,
        concurrency: usize,
        ctx: &BatchCtx,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), TransferError> {
        let remote_path = task.remote_file.remote_path.clone();
        let file_name = task.display_name();

        // The listing may be minutes old by now; re-stat for the real size.
        let total = self.store.stat_size(&remote_path).await?;
        task.total_bytes = total;

        if let Some(parent) = task.part_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let io_err = |path: &std::path::Path| {
            let path = path.to_path_buf();
            move |e: std::io::Error| TransferError::Io { path, source: e }
        };

        // Restart from zero: a leftover .part from an earlier run is truncated.
        let mut part = fs::File::create(&task.part_path)
            .await
            .map_err(io_err(&task.part_path))?;

        let mut offsets = Vec::new();
        let mut offset = 0u64;
        while offset < total {
            let len = self.chunk_size.min(total - offset);
            offsets.push((offset, len));
            offset += len;
        }
        debug!(
            "{}: {} bytes in {} chunks",
            file_name,
            total,
            offsets.len()
        );

        let store = self.store;
        let mut fetches = stream::iter(offsets.into_iter().map(|(chunk_offset, len)| {
            let path = remote_path.clone();
            async move {
                store
                    .read_chunk(&path, chunk_offset, len)
                    .await
                    .map(|bytes| (chunk_offset, bytes))
            }
        }))
        .buffer_unordered(concurrency.max(1));

        let started = Instant::now();
        let mut speed = SpeedCalculator::new(Duration::from_secs(5));
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        task.bytes_transferred = 0;

        while let Some(result) = fetches.next().await {
            let (chunk_offset, bytes) = result?;

            part.seek(SeekFrom::Start(chunk_offset))
                .await
                .map_err(io_err(&task.part_path))?;
            part.write_all(&bytes)
                .await
                .map_err(io_err(&task.part_path))?;

            task.bytes_transferred += bytes.len() as u64;
            speed.add_sample(bytes.len() as u64);

            if throttle.ready() {
                let batch_done = ctx.done_before + task.bytes_transferred;
                let update = TransferProgress {
                    file_index: ctx.index,
                    file_count: ctx.count,
                    file_name: file_name.clone(),
                    bytes_transferred: task.bytes_transferred,
                    total_bytes: total,
                    bytes_per_second: speed.bytes_per_second(),
                    elapsed: started.elapsed(),
                    eta: speed.eta(total.saturating_sub(task.bytes_transferred)),
                    batch_bytes_done: batch_done,
                    batch_total_bytes: ctx.total_bytes,
                    batch_elapsed: ctx.started.elapsed(),
                    batch_eta: speed.eta(ctx.total_bytes.saturating_sub(batch_done)),
                };
                sink.on_progress(&update);
            }
        }
        drop(fetches);

        // Only the aggregate byte count is authoritative; if the remote file
        // shrank under us, refuse to commit.
        if task.bytes_transferred != total {
            return Err(TransferError::SizeMismatch {
                path: task.part_path.clone(),
                expected: total,
                actual: task.bytes_transferred,
            });
        }

        part.sync_all().await.map_err(io_err(&task.part_path))?;
        drop(part);

        fs::rename(&task.part_path, &task.final_path)
            .await
            .map_err(io_err(&task.final_path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteEntry, RemoteError, RemoteFile};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::transfer::progress::NullSink;

    #[derive(Default)]
    struct MockStore {
        files: BTreeMap<String, Vec<u8>>,
        /// path -> offset at (or beyond) which reads start failing
        fail_reads_at: HashMap<String, u64>,
        fail_deletes: HashSet<String>,
        deleted: Mutex<Vec<String>>,
        read_order: Mutex<Vec<String>>,
    }

    impl MockStore {
        fn with_file(mut self, path: &str, content: Vec<u8>) -> Self {
            self.files.insert(path.to_string(), content);
            self
        }

        fn failing_from(mut self, path: &str, offset: u64) -> Self {
            self.fail_reads_at.insert(path.to_string(), offset);
            self
        }

        fn failing_delete(mut self, path: &str) -> Self {
            self.fail_deletes.insert(path.to_string());
            self
        }

        fn deleted_paths(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    fn not_found(path: &str) -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
    }

    #[async_trait]
    impl RemoteStore for MockStore {
        async fn list_dir(&self, _path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
            Ok(Vec::new())
        }

        async fn stat_size(&self, path: &str) -> Result<u64, RemoteError> {
            self.files
                .get(path)
                .map(|c| c.len() as u64)
                .ok_or_else(|| RemoteError::Stat {
                    path: path.to_string(),
                    source: not_found(path),
                })
        }

        async fn read_chunk(
            &self,
            path: &str,
            offset: u64,
            len: u64,
        ) -> Result<Bytes, RemoteError> {
            self.read_order.lock().unwrap().push(path.to_string());

            if let Some(fail_at) = self.fail_reads_at.get(path) {
                if offset >= *fail_at {
                    return Err(RemoteError::Read {
                        path: path.to_string(),
                        offset,
                        source: not_found("simulated network error"),
                    });
                }
            }

            let content = self.files.get(path).ok_or_else(|| RemoteError::Read {
                path: path.to_string(),
                offset,
                source: not_found(path),
            })?;

            let start = offset as usize;
            let end = (offset + len).min(content.len() as u64) as usize;
            Ok(Bytes::copy_from_slice(&content[start..end]))
        }

        async fn remove(&self, path: &str) -> Result<(), RemoteError> {
            if self.fail_deletes.contains(path) {
                return Err(RemoteError::Delete {
                    path: path.to_string(),
                    source: not_found("simulated delete failure"),
                });
            }
            self.deleted.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn task_for(store_path: &str, local_dir: &std::path::Path, size: u64) -> TransferTask {
        let name = store_path.rsplit('/').next().unwrap();
        let remote = RemoteFile {
            remote_path: store_path.to_string(),
            size,
            modify_time: Utc::now(),
            parent_folder: "cam1".into(),
        };
        TransferTask::new(remote, local_dir.join("cam1").join(name))
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn policy_backs_off_per_deferred_folder() {
        let policy = ChunkPolicy::new(12);
        assert_eq!(policy.effective(0), 12);
        assert_eq!(policy.effective(1), 6);
        assert_eq!(policy.effective(2), 3);
        assert_eq!(policy.effective(3), 1);
        assert_eq!(policy.effective(7), 1);
    }

    #[test]
    fn policy_never_drops_to_zero() {
        let policy = ChunkPolicy::new(2);
        assert_eq!(policy.effective(3), 1);
    }

    #[tokio::test]
    async fn commits_rename_then_delete() {
        let local = TempDir::new().unwrap();
        let data = content(2_500_000); // 3 chunks, last one short
        let store = MockStore::default().with_file("/rec/cam1/a.mp4", data.clone());

        let engine = TransferEngine::new(
            &store,
            1024 * 1024,
            ChunkPolicy::new(4),
            Duration::from_millis(20),
        );
        let tasks = vec![task_for("/rec/cam1/a.mp4", local.path(), data.len() as u64)];
        let report = engine.run(tasks, 0, &mut NullSink).await;

        assert_eq!(report.committed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes_pulled, data.len() as u64);

        let final_path = local.path().join("cam1/a.mp4");
        assert_eq!(std::fs::read(&final_path).unwrap(), data);
        assert!(!local.path().join("cam1/a.mp4.part").exists());
        assert_eq!(store.deleted_paths(), vec!["/rec/cam1/a.mp4".to_string()]);
    }

    #[tokio::test]
    async fn failed_file_leaves_part_and_remote_intact() {
        let local = TempDir::new().unwrap();
        let data = content(3_000_000);
        let store = MockStore::default()
            .with_file("/rec/cam1/a.mp4", data)
            .failing_from("/rec/cam1/a.mp4", 1024 * 1024);

        let engine = TransferEngine::new(
            &store,
            1024 * 1024,
            ChunkPolicy::new(1),
            Duration::from_millis(20),
        );
        let tasks = vec![task_for("/rec/cam1/a.mp4", local.path(), 3_000_000)];
        let report = engine.run(tasks, 0, &mut NullSink).await;

        assert_eq!(report.committed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.tasks[0].state, TaskState::Failed);

        assert!(local.path().join("cam1/a.mp4.part").exists());
        assert!(!local.path().join("cam1/a.mp4").exists());
        assert!(store.deleted_paths().is_empty());
    }

    #[tokio::test]
    async fn mid_batch_failure_does_not_abort_later_files() {
        let local = TempDir::new().unwrap();
        let mut store = MockStore::default();
        for i in 1..=5 {
            store = store.with_file(&format!("/rec/cam1/f{i}.mp4"), content(64 * 1024));
        }
        let store = store.failing_from("/rec/cam1/f3.mp4", 0);

        let engine = TransferEngine::new(
            &store,
            16 * 1024,
            ChunkPolicy::new(4),
            Duration::from_millis(20),
        );
        let tasks = (1..=5)
            .map(|i| task_for(&format!("/rec/cam1/f{i}.mp4"), local.path(), 64 * 1024))
            .collect();
        let report = engine.run(tasks, 0, &mut NullSink).await;

        assert_eq!(report.committed, 4);
        assert_eq!(report.failed, 1);

        for i in [1, 2, 4, 5] {
            assert!(local.path().join(format!("cam1/f{i}.mp4")).exists());
        }
        assert!(local.path().join("cam1/f3.mp4.part").exists());
        assert!(!local.path().join("cam1/f3.mp4").exists());

        let deleted = store.deleted_paths();
        assert_eq!(deleted.len(), 4);
        assert!(!deleted.contains(&"/rec/cam1/f3.mp4".to_string()));
    }

    #[tokio::test]
    async fn files_are_pulled_in_input_order() {
        let local = TempDir::new().unwrap();
        let mut store = MockStore::default();
        for name in ["z.mp4", "a.mp4", "m.mp4"] {
            store = store.with_file(&format!("/rec/cam1/{name}"), content(1024));
        }

        let engine = TransferEngine::new(
            &store,
            1024 * 1024,
            ChunkPolicy::new(4),
            Duration::from_millis(20),
        );
        let tasks = ["z.mp4", "a.mp4", "m.mp4"]
            .iter()
            .map(|n| task_for(&format!("/rec/cam1/{n}"), local.path(), 1024))
            .collect();
        engine.run(tasks, 0, &mut NullSink).await;

        let order = store.read_order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![
                "/rec/cam1/z.mp4".to_string(),
                "/rec/cam1/a.mp4".to_string(),
                "/rec/cam1/m.mp4".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn remote_delete_failure_does_not_unseat_the_commit() {
        let local = TempDir::new().unwrap();
        let data = content(1024);
        let store = MockStore::default()
            .with_file("/rec/cam1/a.mp4", data.clone())
            .failing_delete("/rec/cam1/a.mp4");

        let engine = TransferEngine::new(
            &store,
            1024 * 1024,
            ChunkPolicy::new(4),
            Duration::from_millis(20),
        );
        let tasks = vec![task_for("/rec/cam1/a.mp4", local.path(), 1024)];
        let report = engine.run(tasks, 0, &mut NullSink).await;

        assert_eq!(report.committed, 1);
        assert_eq!(report.tasks[0].state, TaskState::Committed);
        assert_eq!(
            std::fs::read(local.path().join("cam1/a.mp4")).unwrap(),
            data
        );
    }

    #[tokio::test]
    async fn leftover_part_file_is_restarted_from_zero() {
        let local = TempDir::new().unwrap();
        let data = content(2048);
        let store = MockStore::default().with_file("/rec/cam1/a.mp4", data.clone());

        // Simulate a crashed earlier run.
        let cam1 = local.path().join("cam1");
        std::fs::create_dir_all(&cam1).unwrap();
        std::fs::write(cam1.join("a.mp4.part"), vec![0xFFu8; 10_000]).unwrap();

        let engine = TransferEngine::new(
            &store,
            512,
            ChunkPolicy::new(2),
            Duration::from_millis(20),
        );
        let tasks = vec![task_for("/rec/cam1/a.mp4", local.path(), 2048)];
        let report = engine.run(tasks, 0, &mut NullSink).await;

        assert_eq!(report.committed, 1);
        assert_eq!(std::fs::read(cam1.join("a.mp4")).unwrap(), data);
    }

    struct RecordingSink {
        updates: Vec<TransferProgress>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&mut self, update: &TransferProgress) {
            self.updates.push(update.clone());
        }
    }

    #[tokio::test]
    async fn progress_updates_carry_batch_totals() {
        let local = TempDir::new().unwrap();
        let store = MockStore::default()
            .with_file("/rec/cam1/a.mp4", content(4096))
            .with_file("/rec/cam1/b.mp4", content(4096));

        let engine = TransferEngine::new(
            &store,
            1024,
            ChunkPolicy::new(2),
            Duration::ZERO, // emit on every chunk
        );
        let tasks = vec![
            task_for("/rec/cam1/a.mp4", local.path(), 4096),
            task_for("/rec/cam1/b.mp4", local.path(), 4096),
        ];
        let mut sink = RecordingSink { updates: Vec::new() };
        engine.run(tasks, 0, &mut sink).await;

        assert!(!sink.updates.is_empty());
        let last = sink.updates.last().unwrap();
        assert_eq!(last.file_index, 2);
        assert_eq!(last.file_count, 2);
        assert_eq!(last.batch_total_bytes, 8192);
        assert_eq!(last.batch_bytes_done, 8192);

        // Batch byte counts never go backwards.
        for pair in sink.updates.windows(2) {
            assert!(pair[1].batch_bytes_done >= pair[0].batch_bytes_done);
        }
    }
}
