use tracing::{debug, warn};

use super::client::CatalogClient;
use super::types::Job;
use super::CatalogError;

/// How a wait on the job queue ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobWaitOutcome {
    /// The queue reported empty.
    Drained,
    /// The attempt budget ran out while jobs were still listed.
    TimedOut,
}

impl CatalogClient {
    /// Poll the job queue until it drains or the attempt budget runs out.
    ///
    /// A failed poll counts as an attempt and is treated as "still busy";
    /// the queue belongs to the server, all we do is watch it. `on_tick`
    /// receives every successful snapshot for rendering.
    pub async fn wait_for_jobs(
        &self,
        on_tick: &mut dyn FnMut(&[Job]),
    ) -> Result<JobWaitOutcome, CatalogError> {
        let interval = self.config().poll_interval();
        let max_attempts = self.config().max_poll_attempts;

        for attempt in 0..max_attempts {
            match self.job_queue().await {
                Ok(jobs) => {
                    if jobs.is_empty() {
                        debug!("job queue drained after {} polls", attempt);
                        return Ok(JobWaitOutcome::Drained);
                    }
                    on_tick(&jobs);
                }
                Err(e) => {
                    warn!("job queue poll failed: {}", e);
                }
            }

            tokio::time::sleep(interval).await;
        }

        warn!(
            "job queue still busy after {} polls, giving up the wait",
            max_attempts
        );
        Ok(JobWaitOutcome::TimedOut)
    }
}
