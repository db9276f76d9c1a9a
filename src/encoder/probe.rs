use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::EncoderError;

/// Duration and size of a media file as reported by ffprobe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeInfo {
    pub duration: Duration,
    pub size_bytes: u64,
}

/// Probe a media file with ffprobe.
///
/// A file ffprobe cannot read is an error; a readable file without a
/// duration field reports a zero duration, which the grouping layer treats
/// as "no forward tolerance".
pub async fn probe_media(ffprobe_bin: &str, path: &Path) -> Result<ProbeInfo, EncoderError> {
    let output = tokio::process::Command::new(ffprobe_bin)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| EncoderError::Spawn {
            program: ffprobe_bin.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(EncoderError::Probe {
            path: path.to_path_buf(),
            detail: format!("ffprobe exited with {}", output.status),
        });
    }

    let data: serde_json::Value =
        serde_json::from_slice(&output.stdout).map_err(|e| EncoderError::Probe {
            path: path.to_path_buf(),
            detail: format!("unparsable ffprobe output: {e}"),
        })?;

    let format = &data["format"];
    let duration_seconds: f64 = format["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let size_bytes = match format["size"].as_str().and_then(|s| s.parse().ok()) {
        Some(size) => size,
        None => tokio::fs::metadata(path)
            .await
            .map_err(|e| EncoderError::Io {
                path: path.to_path_buf(),
                source: e,
            })?
            .len(),
    };

    debug!(
        "probed {}: {:.1}s, {} bytes",
        path.display(),
        duration_seconds,
        size_bytes
    );

    Ok(ProbeInfo {
        duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
        size_bytes,
    })
}
