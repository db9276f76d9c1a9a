use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::encoder::EncodeProgress;
use crate::transfer::{ProgressSink, TransferError, TransferProgress, TransferTask};

const FILE_BAR_TEMPLATE: &str =
    "{prefix:.bold.dim} ▕{bar:30.green}▏ {percent:>3}% {bytes}/{total_bytes} {msg}";
const BATCH_BAR_TEMPLATE: &str =
    "{prefix:.bold.dim} ▕{bar:30.cyan}▏ {percent:>3}% {bytes}/{total_bytes} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.yellow} {wide_msg}";

/// Terminal renderer for the pipeline.
///
/// Owns all render state explicitly: the bars live here and are driven only
/// through `&mut self`, so there is exactly one writer. Wrapping in a mutex
/// or a channel is required before sharing across threads.
pub struct Reporter {
    multi: MultiProgress,
    file_bar: Option<ProgressBar>,
    batch_bar: Option<ProgressBar>,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            file_bar: None,
            batch_bar: None,
        }
    }

    /// One-off status line above the bars.
    pub fn note(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    pub fn success(&self, message: &str) {
        let _ = self
            .multi
            .println(format!("{} {}", style("✓").green().bright(), message));
    }

    pub fn failure(&self, message: &str) {
        let _ = self
            .multi
            .println(format!("{} {}", style("✗").red().bright(), message));
    }

    fn bar(&mut self, template: &str, which: Bar) -> &ProgressBar {
        let slot = match which {
            Bar::File => &mut self.file_bar,
            Bar::Batch => &mut self.batch_bar,
        };
        if slot.is_none() {
            let pb = self.multi.add(ProgressBar::new(0));
            pb.set_style(
                ProgressStyle::with_template(template)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            *slot = Some(pb);
        }
        slot.as_ref().expect("bar was just created")
    }

    fn clear_bars(&mut self) {
        if let Some(pb) = self.file_bar.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.batch_bar.take() {
            pb.finish_and_clear();
        }
    }

    /// Spinner for indeterminate work (encodes without a known duration,
    /// job-queue waits).
    pub fn spinner(&self, message: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Render one encode progress event onto a bar.
    pub fn encode_tick(&self, bar: &ProgressBar, progress: &EncodeProgress) {
        if let Some(percent) = progress.percent {
            bar.set_length(100);
            bar.set_position(percent.round() as u64);
        }
        bar.set_message(format!(
            "{} frames | {:.0} fps | {}",
            progress.frames,
            progress.fps,
            human_bytes(progress.target_size_bytes)
        ));
    }
}

enum Bar {
    File,
    Batch,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for Reporter {
    fn on_progress(&mut self, update: &TransferProgress) {
        let file_prefix = format!("[{}/{}]", update.file_index, update.file_count);
        let file_message = format!(
            "{}/s | ETA {}",
            human_bytes(update.bytes_per_second as u64),
            human_eta(update.eta)
        );
        let file_name = update.file_name.clone();
        let (transferred, total) = (update.bytes_transferred, update.total_bytes);

        let bar = self.bar(FILE_BAR_TEMPLATE, Bar::File);
        bar.set_prefix(format!("{file_prefix} {file_name}"));
        bar.set_length(total);
        bar.set_position(transferred);
        bar.set_message(file_message);

        let batch_message = format!("ETA {}", human_eta(update.batch_eta));
        let (batch_done, batch_total) = (update.batch_bytes_done, update.batch_total_bytes);
        let batch = self.bar(BATCH_BAR_TEMPLATE, Bar::Batch);
        batch.set_prefix("total".to_string());
        batch.set_length(batch_total);
        batch.set_position(batch_done);
        batch.set_message(batch_message);
    }

    fn on_committed(&mut self, task: &TransferTask) {
        self.success(&format!(
            "pulled {} ({})",
            task.display_name(),
            human_bytes(task.total_bytes)
        ));
        if let Some(pb) = self.file_bar.take() {
            pb.finish_and_clear();
        }
    }

    fn on_failed(&mut self, task: &TransferTask, error: &TransferError) {
        self.failure(&format!("pull failed {}: {}", task.display_name(), error));
        if let Some(pb) = self.file_bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.clear_bars();
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

/// `1536` -> `1.50 kB`
pub fn human_bytes(size: u64) -> String {
    if size == 0 {
        return "0.00 B".to_string();
    }
    let exponent = ((size as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = size as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2} {}", value, UNITS[exponent])
}

/// `3725s` -> `1h 2m 5s`; always carries hours so columns line up.
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

pub fn human_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(eta) => human_duration(eta),
        None => "--".to_string(),
    }
}
