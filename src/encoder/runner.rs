use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use super::probe::probe_media;
use super::{EncodeProgress, EncoderError};
use crate::config::EncoderConfig;

/// Callback invoked as the encoder reports progress.
pub type ProgressFn<'a> = &'a mut dyn FnMut(&EncodeProgress);

/// Drives ffmpeg for per-file transcodes and session merges.
///
/// Output is always written under a `.tmp` name and renamed only after the
/// process exits cleanly, so a crashed or failed encode can never leave
/// something that looks like a finished artifact.
pub struct TranscodeRunner {
    config: EncoderConfig,
}

impl TranscodeRunner {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Transcode a single segment into `output`.
    pub async fn transcode_one(
        &self,
        input: &Path,
        output: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), EncoderError> {
        let total = match probe_media(&self.config.ffprobe_bin, input).await {
            Ok(info) => Some(info.duration),
            Err(e) => {
                warn!("cannot probe {} before transcode: {}", input.display(), e);
                None
            }
        };

        let mut command = tokio::process::Command::new(&self.config.ffmpeg_bin);
        command.args(["-hide_banner", "-y", "-loglevel", "error"]);
        if let Some(hwaccel) = &self.config.hwaccel {
            command.args(["-hwaccel", hwaccel, "-hwaccel_output_format", hwaccel]);
        }
        command.arg("-i").arg(input);
        command.args(["-c:v", &self.config.video_codec]);
        command.args(["-c:a", &self.config.audio_codec]);
        for arg in &self.config.extra_args {
            command.arg(arg);
        }

        self.run_to_completion(command, output, total, on_progress)
            .await
    }

    /// Concatenate an ordered session into `output` without re-encoding.
    ///
    /// `total_duration` is the summed duration of the inputs; the percent in
    /// progress events is the cumulative timemark against it.
    pub async fn merge_group(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        total_duration: Duration,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), EncoderError> {
        let list_path = output.with_extension("concat.txt");
        let mut list = String::new();
        for input in inputs {
            // concat demuxer syntax; single quotes in paths are escaped.
            let escaped = input.display().to_string().replace('\'', "'\\''");
            list.push_str(&format!("file '{escaped}'\n"));
        }
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|e| EncoderError::Io {
                path: list_path.clone(),
                source: e,
            })?;

        let mut command = tokio::process::Command::new(&self.config.ffmpeg_bin);
        command.args(["-hide_banner", "-y", "-loglevel", "error"]);
        command.args(["-f", "concat", "-safe", "0"]);
        command.arg("-i").arg(&list_path);
        command.args(["-c", "copy"]);

        let result = self
            .run_to_completion(command, output, Some(total_duration), on_progress)
            .await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    /// Start ffmpeg against a tmp output, stream its progress pipe, and
    /// rename the tmp into place only on a clean exit.
    async fn run_to_completion(
        &self,
        mut command: tokio::process::Command,
        output: &Path,
        total_duration: Option<Duration>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), EncoderError> {
        let tmp_path = tmp_output_path(output);

        command.args(["-progress", "pipe:1", "-nostats", "-f", "mp4"]);
        command.arg(&tmp_path);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());

        debug!("running {:?}", command.as_std());

        let mut child = command.spawn().map_err(|e| EncoderError::Spawn {
            program: self.config.ffmpeg_bin.clone(),
            source: e,
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        // Drain stderr concurrently so a chatty encoder cannot deadlock on a
        // full pipe; keep it for the error report.
        let stderr_task = tokio::spawn(async move {
            let mut detail = String::new();
            let _ = stderr.read_to_string(&mut detail).await;
            detail
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = EncodeProgress::default();
        while let Ok(Some(line)) = lines.next_line().await {
            if apply_progress_line(&mut state, &line, total_duration) {
                on_progress(&state);
            }
        }

        let status = child.wait().await.map_err(|e| EncoderError::Spawn {
            program: self.config.ffmpeg_bin.clone(),
            source: e,
        })?;

        if !status.success() {
            let detail = stderr_task.await.unwrap_or_default();
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(EncoderError::Failed {
                path: output.to_path_buf(),
                detail: if detail.trim().is_empty() {
                    format!("ffmpeg exited with {status}")
                } else {
                    detail.trim().to_string()
                },
            });
        }

        tokio::fs::rename(&tmp_path, output)
            .await
            .map_err(|e| EncoderError::Io {
                path: output.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }
}

fn tmp_output_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output.with_file_name(name)
}

/// Fold one `key=value` progress line into the running state.
///
/// Returns true when a block is complete (`progress=continue|end`) and the
/// state should be reported.
fn apply_progress_line(
    state: &mut EncodeProgress,
    line: &str,
    total_duration: Option<Duration>,
) -> bool {
    let Some((key, value)) = line.split_once('=') else {
        return false;
    };
    let value = value.trim();

    match key.trim() {
        "frame" => {
            state.frames = value.parse().unwrap_or(state.frames);
        }
        "fps" => {
            state.fps = value.parse().unwrap_or(state.fps);
        }
        "total_size" => {
            state.target_size_bytes = value.parse().unwrap_or(state.target_size_bytes);
        }
        "out_time_us" => {
            if let Ok(us) = value.parse::<u64>() {
                state.out_time = Duration::from_micros(us);
            }
        }
        "progress" => {
            state.percent = total_duration.and_then(|total| {
                if total.is_zero() {
                    return None;
                }
                Some(
                    (state.out_time.as_secs_f64() / total.as_secs_f64() * 100.0)
                        .clamp(0.0, 100.0),
                )
            });
            return true;
        }
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_output_path(Path::new("out/2023-01-15_18-00-00.mp4")),
            PathBuf::from("out/2023-01-15_18-00-00.mp4.tmp")
        );
    }

    #[test]
    fn progress_block_accumulates_and_reports() {
        let mut state = EncodeProgress::default();
        let total = Some(Duration::from_secs(100));

        assert!(!apply_progress_line(&mut state, "frame=250", total));
        assert!(!apply_progress_line(&mut state, "fps=62.5", total));
        assert!(!apply_progress_line(&mut state, "total_size=1048576", total));
        assert!(!apply_progress_line(
            &mut state,
            "out_time_us=25000000",
            total
        ));
        assert!(apply_progress_line(&mut state, "progress=continue", total));

        assert_eq!(state.frames, 250);
        assert_eq!(state.fps, 62.5);
        assert_eq!(state.target_size_bytes, 1_048_576);
        assert_eq!(state.out_time, Duration::from_secs(25));
        assert_eq!(state.percent, Some(25.0));
    }

    #[test]
    fn percent_is_none_without_a_known_duration() {
        let mut state = EncodeProgress::default();
        apply_progress_line(&mut state, "out_time_us=5000000", None);
        assert!(apply_progress_line(&mut state, "progress=continue", None));
        assert!(state.percent.is_none());
    }

    #[test]
    fn percent_is_clamped_past_the_end() {
        let mut state = EncodeProgress::default();
        let total = Some(Duration::from_secs(10));
        apply_progress_line(&mut state, "out_time_us=15000000", total);
        apply_progress_line(&mut state, "progress=end", total);
        assert_eq!(state.percent, Some(100.0));
    }

    #[test]
    fn malformed_values_keep_previous_state() {
        let mut state = EncodeProgress::default();
        let total = Some(Duration::from_secs(10));
        apply_progress_line(&mut state, "frame=100", total);
        apply_progress_line(&mut state, "frame=N/A", total);
        assert_eq!(state.frames, 100);

        assert!(!apply_progress_line(&mut state, "not a progress line", total));
    }
}
