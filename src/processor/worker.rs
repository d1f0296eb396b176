//! One polling cycle for one worker directory.

use anyhow::{Context, Result};
use std::path::Path;

use crate::assignment::status::build_report;
use crate::processor::coordinator::Coordinator;

/// What one cycle did for a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub results_sent: usize,
    pub fetched: usize,
    pub queued: usize,
}

impl Coordinator {
    /// Submits finished results, pushes progress, tops up the queue and logs
    /// the queue status. Progress is pushed a second time when new work
    /// arrived so the server learns the new estimates right away.
    pub async fn run_worker_cycle(&self, cpu: usize, dir: &Path) -> Result<CycleSummary> {
        let results_sent = self
            .submit_results(cpu, dir)
            .await
            .with_context(|| format!("worker {cpu}: result submission failed"))?;

        let mut progress = self
            .update_progress(cpu, dir)
            .await
            .with_context(|| format!("worker {cpu}: progress update failed"))?;

        let time_left = progress.as_ref().map(|progress| progress.time_left_secs);
        let fetched = self
            .fetch_assignments(cpu, dir, time_left)
            .await
            .with_context(|| format!("worker {cpu}: fetching assignments failed"))?;
        if fetched > 0 {
            progress = self
                .update_progress(cpu, dir)
                .await
                .with_context(|| format!("worker {cpu}: progress update failed"))?;
        }

        let items = progress
            .map(|progress| progress.status_items())
            .unwrap_or_default();
        build_report(&items).log(cpu);

        let summary = CycleSummary {
            results_sent,
            fetched,
            queued: items.len(),
        };
        tracing::debug!(worker = cpu, ?summary, "worker cycle finished");
        Ok(summary)
    }
}
