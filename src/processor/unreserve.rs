//! Returning assignments to the server (`au`).

use anyhow::Result;
use std::path::Path;

use crate::assignment::model::Assignment;
use crate::assignment::queue::WorkQueue;
use crate::processor::coordinator::{Call, Coordinator};
use crate::processor::lifecycle::AssignmentState;
use crate::transport::args::{Transaction, TransactionArgs};
use crate::transport::codes::PrimeNetCode;
use crate::transport::retry::UNRESERVE_RETRY;

pub(crate) fn unreserve_args(guid: &str, key: &str) -> TransactionArgs {
    TransactionArgs::new(Transaction::AssignmentUnreserve)
        .with("g", guid)
        .with("k", key)
}

/// `au` is idempotent: a key the server no longer knows is already released.
pub fn unreserve_succeeded(code: PrimeNetCode) -> bool {
    matches!(code, PrimeNetCode::Ok | PrimeNetCode::InvalidAssignmentKey)
}

impl Coordinator {
    /// Releases one assignment and drops it from the queue in `dir`.
    /// Returns whether it was released.
    pub async fn unreserve(&self, dir: &Path, assignment: &Assignment) -> Result<bool> {
        let exponent = assignment.exponent();
        let Some(key) = assignment.id() else {
            tracing::error!(exponent, "cannot unreserve an assignment without a key");
            return Ok(false);
        };
        if self.session().guid().is_none() {
            tracing::error!(exponent, "cannot unreserve before the computer is registered");
            return Ok(false);
        }

        let work_path = dir.join(self.config().work_file());
        let queue = WorkQueue::load(&work_path).await?;
        let Some(from) = AssignmentState::in_queue(&queue, key) else {
            tracing::error!(exponent, key, path = %work_path.display(), "assignment is not queued here");
            return Ok(false);
        };
        let unreserved = match from.transition(AssignmentState::Unreserved) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(exponent, key, error = %err, "refusing to unreserve");
                return Ok(false);
            }
        };

        let response = self
            .transact(Call::new(&UNRESERVE_RETRY).exponent(exponent), |guid| {
                unreserve_args(guid, key)
            })
            .await?;
        let Some(response) = response else {
            return Ok(false);
        };
        if !unreserve_succeeded(response.code) {
            tracing::error!(
                exponent,
                code = response.code.code(),
                "unreserve rejected: {}",
                response.code
            );
            return Ok(false);
        }

        WorkQueue::remove_by_id(&work_path, key).await?;
        self.telemetry().record_unreserved();
        tracing::info!(exponent, key, from = %from, state = %unreserved, "assignment unreserved");
        Ok(true)
    }

    /// Releases every queued assignment for `exponent` across all workers.
    /// Returns how many were released.
    pub async fn unreserve_exponent(&self, exponent: u64) -> Result<usize> {
        let mut released = 0;
        let mut found = false;
        for dir in self.config().worker_dirs() {
            let queue = WorkQueue::load(dir.join(self.config().work_file())).await?;
            for assignment in queue.tracked() {
                if assignment.exponent() != exponent {
                    continue;
                }
                found = true;
                if self.unreserve(dir, &assignment).await? {
                    released += 1;
                }
            }
        }
        if !found {
            tracing::error!(exponent, "no queued assignment for exponent");
        }
        Ok(released)
    }

    /// Releases everything in every worker's queue and stops further fetches.
    pub async fn unreserve_all(&self) -> Result<usize> {
        self.set_no_more_work(true).await?;
        let mut released = 0;
        for (cpu, dir) in self.config().worker_dirs().iter().enumerate() {
            let queue = WorkQueue::load(dir.join(self.config().work_file())).await?;
            let tracked = queue.tracked();
            tracing::info!(worker = cpu, count = tracked.len(), "unreserving queued work");
            for assignment in &tracked {
                if self.unreserve(dir, assignment).await? {
                    released += 1;
                }
            }
        }
        Ok(released)
    }
}
