use crate::processor::{Coordinator, CycleSummary};
use crate::runtime::config::AgentConfig;
use crate::runtime::state::StateStore;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry, TransportMetricsFn};
use crate::upload::ProofUploader;
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives the polling loop for every worker and handles OS signals for
/// graceful shutdowns.
pub struct Runner {
    coordinator: Arc<Coordinator>,
    uploader: Option<ProofUploader>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Loads the persisted state and wires a root [`CancellationToken`] that
    /// interrupts retry backoffs and the poll sleep.
    pub async fn new(config: AgentConfig) -> Result<Self> {
        let config = Arc::new(config);
        let state = Arc::new(StateStore::load(config.state_file()).await?);
        let telemetry = Arc::new(Telemetry::default());
        let shutdown = CancellationToken::new();
        let coordinator = Coordinator::new(config, state, telemetry, shutdown.clone()).await?;
        Self::from_coordinator(coordinator)
    }

    /// Wraps an existing coordinator; the runner shares its shutdown token.
    pub fn from_coordinator(coordinator: Coordinator) -> Result<Self> {
        let config = coordinator.config();
        let uploader = if config.proof_uploads() {
            Some(
                ProofUploader::new(
                    config.site_url(),
                    coordinator.website().http().clone(),
                    config.username(),
                    config.request_timeout(),
                )?
                .with_telemetry(Arc::clone(coordinator.telemetry())),
            )
        } else {
            None
        };
        let shutdown = coordinator.shutdown_token().clone();
        Ok(Self {
            coordinator: Arc::new(coordinator),
            uploader,
            shutdown,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Logs in (manual mode) or makes sure the machine is registered.
    pub async fn prepare(&self) -> Result<()> {
        let config = self.coordinator.config();
        if config.password().is_some() {
            self.coordinator.ensure_logged_in().await?;
        }
        if !config.is_manual_mode() {
            self.coordinator.ensure_registered().await?;
        }
        Ok(())
    }

    /// One cycle for every worker, run concurrently. A failing worker is
    /// logged and does not stop the others.
    pub async fn run_cycle(&self) -> Vec<CycleSummary> {
        let dirs = self.coordinator.config().worker_dirs();
        let cycles = dirs
            .iter()
            .enumerate()
            .map(|(cpu, dir)| self.coordinator.run_worker_cycle(cpu, dir));
        let mut summaries = Vec::with_capacity(dirs.len());
        for (cpu, outcome) in join_all(cycles).await.into_iter().enumerate() {
            match outcome {
                Ok(summary) => summaries.push(summary),
                Err(err) => tracing::error!(worker = cpu, error = %format!("{err:#}"), "worker cycle failed"),
            }
        }
        summaries
    }

    /// Polls until the shutdown token fires, or once when the poll interval
    /// is zero. Proof uploads run in the background between cycles and are
    /// always joined before the next cycle and before returning.
    pub async fn run(&self) -> Result<()> {
        self.prepare().await?;

        let config = Arc::clone(self.coordinator.config());
        let metrics_token = self.shutdown.child_token();
        let v5 = self.coordinator.v5().clone();
        let transport: TransportMetricsFn = Arc::new(move || v5.metrics());
        let metrics_handle = spawn_metrics_reporter(
            Arc::clone(self.coordinator.telemetry()),
            transport,
            metrics_token.clone(),
            config.metrics_interval(),
        );

        let mut uploads: Option<JoinHandle<()>> = None;
        loop {
            join_uploads(uploads.take()).await;
            let summaries = self.run_cycle().await;
            tracing::info!(
                workers = summaries.len(),
                results = summaries.iter().map(|s| s.results_sent).sum::<usize>(),
                fetched = summaries.iter().map(|s| s.fetched).sum::<usize>(),
                "polling cycle finished"
            );
            uploads = self.spawn_uploads();

            let interval = config.poll_interval();
            if interval.is_zero() || self.shutdown.is_cancelled() {
                break;
            }
            tracing::debug!(secs = interval.as_secs(), "sleeping until next cycle");
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested; leaving polling loop");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        join_uploads(uploads).await;
        metrics_token.cancel();
        if let Err(err) = metrics_handle.await {
            tracing::warn!(error = %err, "metrics reporter ended abnormally");
        }
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Ctrl-C received; finishing the current cycle"),
                        Err(err) => tracing::error!(error = %err, "failed to listen for Ctrl-C"),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let outcome = self.run().await;
        signal_task.abort();
        outcome
    }

    fn spawn_uploads(&self) -> Option<JoinHandle<()>> {
        let uploader = self.uploader.clone()?;
        let config = self.coordinator.config();
        let dirs = config.worker_dirs().to_vec();
        let archive = config.archive_dir().cloned();
        Some(tokio::spawn(async move {
            for dir in dirs {
                if let Err(err) = uploader.upload_dir(&dir, archive.as_deref()).await {
                    tracing::error!(dir = %dir.display(), error = %format!("{err:#}"), "proof uploads failed");
                }
            }
        }))
    }
}

async fn join_uploads(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "proof upload task panicked");
        }
    }
}
