//! Progress push (`ap`) for every tracked assignment of a worker.

use anyhow::Result;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::assignment::model::Assignment;
use crate::assignment::queue::WorkQueue;
use crate::processor::coordinator::{Call, Coordinator};
use crate::progress::estimator::{estimate, Estimate, EstimatorInputs};
use crate::progress::sample::{ProgressSample, SpeedReference};
use crate::transport::args::{Transaction, TransactionArgs};
use crate::transport::retry::PROGRESS_RETRY;

/// Placeholder time left when an entry cannot be estimated.
pub const UNKNOWN_TIME_LEFT: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_CHECK_IN: Duration = Duration::from_secs(24 * 60 * 60);

/// Estimates for one worker's queue, in queue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueProgress {
    pub entries: Vec<(Assignment, Estimate)>,
    /// Seconds until the whole queue is done, with unknown entries counted
    /// as [`UNKNOWN_TIME_LEFT`].
    pub time_left_secs: f64,
}

impl QueueProgress {
    /// Pairs for the status report: each entry with its own time left.
    pub fn status_items(&self) -> Vec<(Assignment, Option<f64>)> {
        self.entries
            .iter()
            .map(|(assignment, estimate)| (assignment.clone(), estimate.eta_secs))
            .collect()
    }
}

pub(crate) fn progress_args(
    guid: &str,
    cpu: usize,
    key: &str,
    estimate: &Estimate,
    time_left_secs: f64,
    check_in: Duration,
    fft_length: Option<u64>,
) -> TransactionArgs {
    TransactionArgs::new(Transaction::AssignmentProgress)
        .with("g", guid)
        .with("k", key)
        .with("p", format!("{:.4}", estimate.percent_done * 100.0))
        .with("d", check_in.as_secs())
        .with("e", time_left_secs as u64)
        .with("c", cpu)
        .with_opt("stage", estimate.stage.map(|stage| stage.as_str()))
        .with_opt("fftlen", fft_length)
}

/// Speed reference for this cycle: a fresh measurement on the head of the
/// queue replaces the stored one.
pub fn select_reference(
    head: &Assignment,
    head_sample: &ProgressSample,
    stored: Option<SpeedReference>,
) -> Option<SpeedReference> {
    match head_sample.ms_per_iter {
        Some(ms_per_iter) if ms_per_iter > 0.0 => Some(SpeedReference {
            exponent: head.exponent(),
            ms_per_iter,
        }),
        _ => stored,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl Coordinator {
    /// Estimates every tracked entry of the queue in `dir` and reports each
    /// one to the server with the cumulative time left.
    ///
    /// Nothing is sent before the machine is registered; the estimates are
    /// still returned so the caller can size the cache.
    pub async fn update_progress(&self, cpu: usize, dir: &Path) -> Result<Option<QueueProgress>> {
        let config = self.config();
        let work_path = dir.join(config.work_file());
        let tracked = WorkQueue::load(&work_path).await?.tracked();
        let Some(head) = tracked.first() else {
            return Ok(None);
        };

        let head_sample = self.read_sample(dir, head.exponent()).await;
        let stored = self.state().snapshot().await.speed.get(&cpu).copied();
        let reference = select_reference(head, &head_sample, stored);
        if reference != stored {
            if let Some(reference) = reference {
                self.state()
                    .update(|state| {
                        state.speed.insert(cpu, reference);
                    })
                    .await?;
            }
        }

        let inputs = EstimatorInputs {
            reference,
            cpu_hours: config.cpu_hours(),
            rolling_average: config.rolling_average(),
            stage2_override: config.stage2_timeout(),
        };
        let guid = self.session().guid();
        if guid.is_none() {
            tracing::error!(worker = cpu, "cannot send progress before the computer is registered");
        }
        let check_in = match config.poll_interval() {
            interval if interval.is_zero() => DEFAULT_CHECK_IN,
            interval => interval,
        };

        let mut progress = QueueProgress::default();
        let mut time_left = 0.0;
        for (index, assignment) in tracked.iter().enumerate() {
            let sample = if index == 0 {
                head_sample
            } else {
                self.read_sample(dir, assignment.exponent()).await
            };
            let estimate = estimate(assignment, &sample, &inputs);
            time_left += estimate
                .eta_secs
                .unwrap_or(UNKNOWN_TIME_LEFT.as_secs_f64());
            tracing::debug!(
                worker = cpu,
                exponent = assignment.exponent(),
                percent = estimate.percent_done * 100.0,
                iteration = sample.iteration,
                eta_secs = ?estimate.eta_secs,
                "estimated progress"
            );

            if guid.is_some() {
                if let Some(key) = assignment.id() {
                    self.send_progress(cpu, dir, assignment, key, &estimate, time_left, check_in, sample.fft_length)
                        .await?;
                }
            }
            progress.entries.push((assignment.clone(), estimate));
        }
        progress.time_left_secs = time_left;

        if guid.is_some() {
            let now = unix_now();
            self.state()
                .update(|state| state.last_progress_push = Some(now))
                .await?;
        }
        Ok(Some(progress))
    }

    async fn read_sample(&self, dir: &Path, exponent: u64) -> ProgressSample {
        match self.progress_source().read_sample(dir, exponent).await {
            Ok(sample) => sample,
            Err(err) => {
                tracing::warn!(exponent, error = %format!("{err:#}"), "failed to read engine progress");
                ProgressSample::idle()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_progress(
        &self,
        cpu: usize,
        dir: &Path,
        assignment: &Assignment,
        key: &str,
        estimate: &Estimate,
        time_left_secs: f64,
        check_in: Duration,
        fft_length: Option<u64>,
    ) -> Result<()> {
        let exponent = assignment.exponent();
        tracing::info!(
            worker = cpu,
            exponent,
            eta_secs = time_left_secs as u64,
            "sending expected completion date"
        );
        let response = self
            .transact(Call::new(&PROGRESS_RETRY).exponent(exponent), |guid| {
                progress_args(guid, cpu, key, estimate, time_left_secs, check_in, fft_length)
            })
            .await?;
        let Some(response) = response else {
            return Ok(());
        };

        if response.is_ok() {
            self.telemetry().record_progress_update();
            tracing::debug!(exponent, "progress update accepted");
        } else if response.code.releases_assignment() {
            tracing::warn!(exponent, key, "server dropped the assignment: {}", response.code);
            let work_path = dir.join(self.config().work_file());
            WorkQueue::remove_by_id(&work_path, key).await?;
        } else {
            tracing::warn!(exponent, code = response.code.code(), "progress update rejected: {}", response.code);
        }
        Ok(())
    }
}
