use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::remote::{RemoteLister, SftpStore};
use crate::report::{human_bytes, human_duration, Reporter};
use crate::transfer::{BatchReport, ChunkPolicy, TransferEngine, TransferTask};

/// Pull mode: scan the remote recording tree and bring every flushed file
/// into the local staging mirror.
///
/// A connection failure here aborts the run; everything after that is
/// per-file and isolated.
pub async fn run_pull(config: &Config, reporter: &mut Reporter) -> Result<BatchReport> {
    reporter.note(&format!("connecting to {}...", config.remote.host));

    let store = SftpStore::connect(&config.remote)
        .await
        .with_context(|| format!("cannot connect to {}", config.remote.host))?;

    let lister = RemoteLister::new(
        &store,
        &config.remote.root_path,
        &config.library.staging_dir,
        config.remote.staleness(),
    );

    reporter.note("loading folders...");
    let scan = lister.scan().await.context("remote listing failed")?;

    if scan.files.is_empty() {
        reporter.note("nothing to pull");
        return Ok(BatchReport {
            tasks: Vec::new(),
            committed: 0,
            failed: 0,
            bytes_pulled: 0,
            elapsed: std::time::Duration::ZERO,
        });
    }

    reporter.note(&format!(
        "{} files queued ({}), {} folders still recording",
        scan.files.len(),
        human_bytes(scan.total_bytes),
        scan.deferred_folders
    ));

    let tasks: Vec<TransferTask> = scan
        .files
        .iter()
        .map(|file| TransferTask::new(file.clone(), lister.local_path_for(file)))
        .collect();

    let engine = TransferEngine::new(
        &store,
        config.transfer.chunk_size,
        ChunkPolicy::new(config.transfer.base_concurrency),
        config.transfer.progress_interval(),
    );

    let report = engine.run(tasks, scan.deferred_folders, reporter).await;

    info!(
        "pull finished: {} committed, {} failed, {} in {}",
        report.committed,
        report.failed,
        human_bytes(report.bytes_pulled),
        human_duration(report.elapsed)
    );
    reporter.note(&format!(
        "finished pulling: {}/{} files ({})",
        report.committed,
        report.committed + report.failed,
        human_bytes(report.bytes_pulled)
    ));

    store.disconnect().await.ok();

    Ok(report)
}
