use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog::{CatalogClient, FindFilter, SceneUpdateInput};
use crate::config::Config;
use crate::encoder::{probe_media, TranscodeRunner};
use crate::filename::SegmentStamp;
use crate::grouping::{group_sessions, MediaSegment, SessionGroup};
use crate::remote::lister::is_deferred;
use crate::report::{human_bytes, Reporter};

/// Counters for one process-mode run.
#[derive(Debug, Default)]
pub struct ProcessSummary {
    pub folders: usize,
    pub skipped_folders: usize,
    pub transcoded: usize,
    pub transcode_failures: usize,
    pub merged_groups: usize,
    pub linked_scenes: usize,
    pub link_failures: usize,
}

/// Process mode: transcode staged pulls, merge recording sessions, and file
/// the results into the catalog.
///
/// Every per-file and per-group failure is logged and skipped; only setup
/// errors (no staging dir) abort the run.
pub async fn run_process(config: &Config, page: &str, reporter: &mut Reporter) -> Result<ProcessSummary> {
    let staging = &config.library.staging_dir;
    if !staging.exists() {
        anyhow::bail!("staging directory {} does not exist", staging.display());
    }

    let catalog = CatalogClient::new(config.catalog.clone());
    let runner = TranscodeRunner::new(config.encoder.clone());

    let folders: Vec<PathBuf> = WalkDir::new(staging)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    let mut summary = ProcessSummary::default();

    for folder in folders {
        summary.folders += 1;

        if is_deferred(&folder) {
            info!("skipping {}: recorder was still writing", folder.display());
            summary.skipped_folders += 1;
            continue;
        }

        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(e) = process_folder(
            config, &catalog, &runner, reporter, &folder, &name, page, &mut summary,
        )
        .await
        {
            warn!("processing {} failed: {:#}", name, e);
        }
    }

    info!(
        "process finished: {} transcoded, {} merged groups, {} scenes linked",
        summary.transcoded, summary.merged_groups, summary.linked_scenes
    );

    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn process_folder(
    config: &Config,
    catalog: &CatalogClient,
    runner: &TranscodeRunner,
    reporter: &mut Reporter,
    folder: &Path,
    name: &str,
    page: &str,
    summary: &mut ProcessSummary,
) -> Result<()> {
    let inputs = segment_files(folder);
    if inputs.is_empty() {
        return Ok(());
    }

    let total_size: u64 = inputs
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
    reporter.note(&format!(
        "processing {} => {} files ({})",
        name,
        inputs.len(),
        human_bytes(total_size)
    ));

    let output_folder = config.library.output_root.join(page).join(name);
    tokio::fs::create_dir_all(&output_folder)
        .await
        .with_context(|| format!("cannot create {}", output_folder.display()))?;

    // Stage 1: transcode every raw segment.
    let mut produced: Vec<PathBuf> = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("segment-{index}"));
        let output = output_folder.join(format!("{stem}.mp4"));

        let bar = reporter.spinner(&format!(
            "[{}/{}] transcoding {}",
            index + 1,
            inputs.len(),
            stem
        ));
        let mut on_progress = |p: &crate::encoder::EncodeProgress| {
            reporter.encode_tick(&bar, p);
        };

        match runner.transcode_one(input, &output, &mut on_progress).await {
            Ok(()) => {
                bar.finish_and_clear();
                summary.transcoded += 1;
                // The raw segment is consumed once its transcode exists.
                if let Err(e) = tokio::fs::remove_file(input).await {
                    warn!("cannot remove {}: {}", input.display(), e);
                }
                produced.push(output);
            }
            Err(e) => {
                bar.finish_and_clear();
                summary.transcode_failures += 1;
                reporter.failure(&format!("transcode failed for {}: {}", stem, e));
            }
        }
    }

    if produced.is_empty() {
        return Ok(());
    }

    // Stage 2: probe and cluster into sessions.
    let mut segments = Vec::new();
    for path in &produced {
        let stamp = SegmentStamp::parse_path(path).ok();
        if stamp.is_none() {
            warn!(
                "{} has no parsable timestamp, it will not be merged",
                path.display()
            );
        }

        let (duration, size_bytes) = match probe_media(&config.encoder.ffprobe_bin, path).await {
            Ok(info) => (info.duration, info.size_bytes),
            Err(e) => {
                warn!("probe failed for {}: {}", path.display(), e);
                (std::time::Duration::ZERO, 0)
            }
        };

        segments.push(MediaSegment::new(
            path.clone(),
            stamp.map(|s| s.recorded_at),
            duration,
            size_bytes,
        ));
    }

    let groups = group_sessions(segments, config.grouping.gap_tolerance());

    // Stage 3: merge multi-segment sessions.
    let mut artifacts: Vec<PathBuf> = Vec::new();
    for group in &groups {
        if !group.is_merge_candidate() {
            artifacts.extend(group.segments().iter().map(|s| s.local_path.clone()));
            continue;
        }

        match merge_session(runner, reporter, group).await {
            Ok(merged) => {
                summary.merged_groups += 1;
                artifacts.push(merged);
            }
            Err(e) => {
                reporter.failure(&format!("merge failed: {e}"));
                // Unmerged members still get cataloged individually.
                artifacts.extend(group.segments().iter().map(|s| s.local_path.clone()));
            }
        }
    }

    // Stage 4: let the catalog ingest the folder, then wait for its queue.
    let library_folder = absolute(&output_folder);
    reporter.note("scan and auto tag");
    tokio::time::sleep(config.catalog.settle_delay()).await;

    if let Err(e) = catalog.scan_folder(&library_folder).await {
        warn!("scan request failed: {}", e);
    }
    if let Err(e) = catalog.auto_tag(&library_folder).await {
        warn!("auto-tag request failed: {}", e);
    }

    let jobs_bar = reporter.spinner("waiting for catalog jobs");
    let mut on_tick = |jobs: &[crate::catalog::Job]| {
        if let Some(job) = jobs.iter().find(|j| j.status == crate::catalog::JobStatus::Running) {
            let percent = (job.progress.unwrap_or(0.0) * 100.0).round();
            jobs_bar.set_message(format!("{} {percent}%", job.description));
        }
    };
    if let Err(e) = catalog.wait_for_jobs(&mut on_tick).await {
        warn!("job wait failed: {}", e);
    }
    jobs_bar.finish_and_clear();

    // Stage 5: link each artifact to its catalog scene.
    for artifact in &artifacts {
        match link_artifact(config, catalog, artifact, name, page).await {
            Ok(true) => summary.linked_scenes += 1,
            Ok(false) => summary.link_failures += 1,
            Err(e) => {
                summary.link_failures += 1;
                warn!("linking {} failed: {}", artifact.display(), e);
            }
        }
    }

    // A fully drained source folder disappears from the mirror.
    if segment_files(folder).is_empty() {
        let _ = tokio::fs::remove_dir(folder).await;
    }

    reporter.success(&format!("processed {name}"));
    Ok(())
}

async fn merge_session(
    runner: &TranscodeRunner,
    reporter: &mut Reporter,
    group: &SessionGroup,
) -> Result<PathBuf> {
    let merged_path = group.merged_output_path();
    let inputs: Vec<PathBuf> = group
        .segments()
        .iter()
        .map(|s| s.local_path.clone())
        .collect();

    let bar = reporter.spinner(&format!(
        "merging {} segments => {}",
        inputs.len(),
        merged_path.display()
    ));
    let mut on_progress = |p: &crate::encoder::EncodeProgress| {
        reporter.encode_tick(&bar, p);
    };

    let result = runner
        .merge_group(&inputs, &merged_path, group.total_duration(), &mut on_progress)
        .await;
    bar.finish_and_clear();
    result?;

    // Members are consumed only after the merge reported success.
    for input in &inputs {
        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!("cannot remove merged input {}: {}", input.display(), e);
        }
    }

    Ok(merged_path)
}

/// Find the scene for one produced file and write its metadata.
///
/// Returns Ok(false) when the catalog had no unambiguous match; that is a
/// skip, not an error.
async fn link_artifact(
    config: &Config,
    catalog: &CatalogClient,
    artifact: &Path,
    name: &str,
    page: &str,
) -> Result<bool> {
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let result = catalog
        .find_scenes(
            FindFilter::with_query(format!("{file_name} {name}")),
            serde_json::json!({}),
        )
        .await;

    let scenes = match result {
        Ok(found) if found.scenes.len() == 1 => found.scenes,
        Ok(found) => {
            warn!(
                "scene lookup for {} matched {} entries, skipping",
                file_name,
                found.scenes.len()
            );
            return Ok(false);
        }
        Err(e) => {
            warn!("scene lookup for {} failed: {}", file_name, e);
            return Ok(false);
        }
    };
    let scene = &scenes[0];

    let performer = catalog.find_performer(name).await.unwrap_or(None);

    let stamp = SegmentStamp::parse(&file_name).ok();
    let title = match &stamp {
        Some(stamp) => format!("{} - {}", stamp.title_string(), name),
        None => format!("{file_name} - {name}"),
    };

    let input = SceneUpdateInput {
        id: scene.id.clone(),
        title: Some(title),
        url: Some(format!("https://{page}.com/{name}/")),
        date: stamp.map(|s| s.date_string()),
        studio_id: Some(
            scene
                .studio
                .as_ref()
                .map(|s| s.id.clone())
                .unwrap_or_else(|| config.catalog.default_studio_id.clone()),
        ),
        tag_ids: Some(scene.tags.iter().map(|t| t.id.clone()).collect()),
        performer_ids: Some(match &performer {
            Some(p) => vec![p.id.clone()],
            None => scene.performers.iter().map(|p| p.id.clone()).collect(),
        }),
        ..Default::default()
    };

    match catalog.update_scene(input).await {
        Ok(_) => {
            info!("linked {} to scene {}", file_name, scene.id);
            Ok(true)
        }
        Err(e) => {
            warn!("scene update for {} failed: {}", file_name, e);
            Ok(false)
        }
    }
}

/// Raw segment files in one staging folder (one level, .ts/.mp4 only).
fn segment_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("ts") | Some("mp4")
            )
        })
        .collect();
    files.sort();
    files
}

fn absolute(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
