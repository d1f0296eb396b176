use crate::transport::metrics::TransportMetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(15 * 60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters for what the agent did with the server.
#[derive(Default, Debug)]
pub struct Telemetry {
    retries: AtomicU64,
    reregistrations: AtomicU64,
    assignments_fetched: AtomicU64,
    assignments_unreserved: AtomicU64,
    progress_updates: AtomicU64,
    results_submitted: AtomicU64,
    proofs_uploaded: AtomicU64,
    entries_discarded: AtomicU64,
}

impl Telemetry {
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reregistration(&self) {
        self.reregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_assignments_fetched(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.assignments_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unreserved(&self) {
        self.assignments_unreserved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress_update(&self) {
        self.progress_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_submitted(&self) {
        self.results_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proof_uploaded(&self) {
        self.proofs_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// A queue line, grant, or result line that was logged and skipped.
    pub fn record_discarded(&self) {
        self.entries_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            reregistrations: self.reregistrations.load(Ordering::Relaxed),
            assignments_fetched: self.assignments_fetched.load(Ordering::Relaxed),
            assignments_unreserved: self.assignments_unreserved.load(Ordering::Relaxed),
            progress_updates: self.progress_updates.load(Ordering::Relaxed),
            results_submitted: self.results_submitted.load(Ordering::Relaxed),
            proofs_uploaded: self.proofs_uploaded.load(Ordering::Relaxed),
            entries_discarded: self.entries_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub retries: u64,
    pub reregistrations: u64,
    pub assignments_fetched: u64,
    pub assignments_unreserved: u64,
    pub progress_updates: u64,
    pub results_submitted: u64,
    pub proofs_uploaded: u64,
    pub entries_discarded: u64,
}

/// Source of transport-level counters for the reporter.
pub type TransportMetricsFn = Arc<dyn Fn() -> TransportMetricsSnapshot + Send + Sync>;

/// Spawns a background task that periodically logs agent and transport counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    transport: TransportMetricsFn,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing has happened yet.
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "primenet_agent::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let agent = telemetry.snapshot();
                    let wire = transport();

                    tracing::info!(
                        target: "primenet_agent::metrics",
                        requests = wire.total_requests,
                        errors = wire.total_errors,
                        server_errors = wire.total_server_errors,
                        timeouts = wire.total_timeouts,
                        error_rate = format!("{:.3}", wire.error_rate),
                        avg_latency_ms = format!("{:.1}", wire.average_latency_ms),
                        retries = agent.retries,
                        reregistrations = agent.reregistrations,
                        fetched = agent.assignments_fetched,
                        unreserved = agent.assignments_unreserved,
                        progress_updates = agent.progress_updates,
                        results = agent.results_submitted,
                        proofs = agent.proofs_uploaded,
                        discarded = agent.entries_discarded,
                        "agent metrics snapshot"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_retry();
        telemetry.record_retry();
        telemetry.record_reregistration();
        telemetry.record_assignments_fetched(3);
        telemetry.record_assignments_fetched(0);
        telemetry.record_result_submitted();
        telemetry.record_discarded();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.reregistrations, 1);
        assert_eq!(snapshot.assignments_fetched, 3);
        assert_eq!(snapshot.results_submitted, 1);
        assert_eq!(snapshot.entries_discarded, 1);
        assert_eq!(snapshot.proofs_uploaded, 0);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_progress_update();
        let transport: TransportMetricsFn = Arc::new(TransportMetricsSnapshot::default);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(
            telemetry,
            transport,
            shutdown.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(25)).await;
        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
