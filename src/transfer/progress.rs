use std::time::{Duration, Instant};

use super::task::TransferTask;
use super::TransferError;

/// Snapshot handed to the progress sink after a chunk completes.
///
/// Carries both the current file's view and the cumulative batch view so the
/// renderer never has to keep its own counters.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// 1-based position of the current file in the batch.
    pub file_index: usize,
    pub file_count: usize,
    /// `folder/name` of the current file.
    pub file_name: String,

    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,

    pub batch_bytes_done: u64,
    pub batch_total_bytes: u64,
    pub batch_elapsed: Duration,
    pub batch_eta: Option<Duration>,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn batch_percent(&self) -> f64 {
        if self.batch_total_bytes == 0 {
            return 0.0;
        }
        (self.batch_bytes_done as f64 / self.batch_total_bytes as f64) * 100.0
    }
}

/// Observer of transfer lifecycle events. All methods default to no-ops so
/// callers only implement what they render.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, _update: &TransferProgress) {}
    fn on_committed(&mut self, _task: &TransferTask) {}
    fn on_failed(&mut self, _task: &TransferTask, _error: &TransferError) {}
}

/// Sink that ignores everything.
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Rate limiter for progress renders.
///
/// Chunk completions arrive far faster than a terminal can usefully repaint;
/// `ready()` answers whether enough time has passed since the last emit.
/// This is deliberately an explicit value owned by the engine loop, not
/// process-global state.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    /// True (and arms the timer) if an emit is due.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Sliding-window transfer speed, in bytes per second.
pub struct SpeedCalculator {
    samples: Vec<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: Vec::new(),
            window,
            max_samples: 100,
        }
    }

    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push((now, bytes));

        let cutoff = now - self.window;
        self.samples.retain(|(t, _)| *t >= cutoff);
        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Average speed over the window; 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let first = self.samples[0].0;
        let last = self.samples[self.samples.len() - 1].0;
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|(_, b)| b).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes; `None` when speed is zero.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_first_call_is_ready() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(20));
        assert!(throttle.ready());
    }

    #[test]
    fn throttle_suppresses_rapid_calls() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn throttle_reopens_after_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(5));
        assert!(throttle.ready());
        std::thread::sleep(Duration::from_millis(10));
        assert!(throttle.ready());
    }

    #[test]
    fn speed_needs_two_samples() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(5));
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(1024);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1024).is_none());
    }

    #[test]
    fn speed_and_eta_with_samples() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(10));
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(20));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
        assert!(calc.eta(10_000).unwrap().as_secs_f64() > 0.0);
    }

    #[test]
    fn speed_reset_clears_window() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(10));
        calc.add_sample(500);
        calc.add_sample(500);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn percent_math() {
        let progress = TransferProgress {
            file_index: 1,
            file_count: 2,
            file_name: "cam1/a.mp4".into(),
            bytes_transferred: 256,
            total_bytes: 1024,
            bytes_per_second: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            batch_bytes_done: 512,
            batch_total_bytes: 2048,
            batch_elapsed: Duration::ZERO,
            batch_eta: None,
        };
        assert_eq!(progress.percent(), 25.0);
        assert_eq!(progress.batch_percent(), 25.0);
    }

    #[test]
    fn percent_of_empty_file_is_zero() {
        let progress = TransferProgress {
            file_index: 1,
            file_count: 1,
            file_name: "cam1/a.mp4".into(),
            bytes_transferred: 0,
            total_bytes: 0,
            bytes_per_second: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            batch_bytes_done: 0,
            batch_total_bytes: 0,
            batch_elapsed: Duration::ZERO,
            batch_eta: None,
        };
        assert_eq!(progress.percent(), 0.0);
        assert_eq!(progress.batch_percent(), 0.0);
    }
}
