//! Shared handle behind every per-worker flow.
//!
//! One HTTP client (and with it one cookie jar) serves both the v5 endpoint
//! and the website, one [`Session`] carries the identity, and every v5 call
//! goes through [`Coordinator::transact`], the bounded retry loop that also
//! repairs the registration when the server asks for it.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::processor::backoff::{retry_with_backoff, AttemptOutcome, RetryBackoff};
use crate::progress::engine::ProgressSource;
use crate::runtime::config::AgentConfig;
use crate::runtime::state::StateStore;
use crate::runtime::telemetry::Telemetry;
use crate::transport::args::TransactionArgs;
use crate::transport::codes::Reregistration;
use crate::transport::manual::WebsiteClient;
use crate::transport::response::V5Response;
use crate::transport::retry::{RetryContext, RetryMessages};
use crate::transport::session::Session;
use crate::transport::V5Client;

/// What a call does with codes asking for a fresh registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// Hand the code back to the caller.
    Report,
    Reregister,
    /// Also re-register on a configuration mismatch; only `ga` does this.
    ReregisterOnMismatch,
}

#[derive(Clone, Copy)]
pub(crate) struct Call {
    pub messages: &'static RetryMessages,
    pub exponent: Option<u64>,
    pub recovery: Recovery,
}

impl Call {
    pub(crate) fn new(messages: &'static RetryMessages) -> Self {
        Self {
            messages,
            exponent: None,
            recovery: Recovery::Reregister,
        }
    }

    pub(crate) fn exponent(mut self, exponent: u64) -> Self {
        self.exponent = Some(exponent);
        self
    }

    pub(crate) fn recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    fn context(&self) -> RetryContext<'static> {
        match self.exponent {
            Some(exponent) => RetryContext::with_exponent(self.messages, exponent),
            None => RetryContext::new(self.messages),
        }
    }
}

pub struct Coordinator {
    config: Arc<AgentConfig>,
    v5: V5Client,
    website: WebsiteClient,
    state: Arc<StateStore>,
    telemetry: Arc<Telemetry>,
    progress: Arc<dyn ProgressSource>,
    pub(crate) registration: Mutex<()>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub async fn new(
        config: Arc<AgentConfig>,
        state: Arc<StateStore>,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let guid = state.snapshot().await.guid;
        let session = Arc::new(Session::new(guid, config.signing_mode()));
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        let v5 = V5Client::with_http(
            config.v5_url(),
            Arc::clone(&session),
            config.transport_options(),
            http.clone(),
        )?;
        let website = WebsiteClient::new(config.site_url(), http, session)?;
        let progress: Arc<dyn ProgressSource> = Arc::new(config.engine().clone());

        Ok(Self {
            config,
            v5,
            website,
            state,
            telemetry,
            progress,
            registration: Mutex::new(()),
            shutdown,
        })
    }

    /// Replaces the engine log reader.
    pub fn with_progress_source(mut self, source: Arc<dyn ProgressSource>) -> Self {
        self.progress = source;
        self
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn v5(&self) -> &V5Client {
        &self.v5
    }

    pub fn website(&self) -> &WebsiteClient {
        &self.website
    }

    pub fn session(&self) -> &Arc<Session> {
        self.v5.session()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn progress_source(&self) -> &dyn ProgressSource {
        self.progress.as_ref()
    }

    /// Sends one logical v5 operation, repeating it on transport failures,
    /// busy replies and repaired registrations.
    ///
    /// `build` receives the current machine identifier on every attempt so a
    /// re-registration that issued a new one is picked up. Returns `Ok(None)`
    /// once the attempt budget is spent; any other code comes back as the
    /// response for the caller to interpret.
    pub(crate) async fn transact<B>(&self, call: Call, build: B) -> Result<Option<V5Response>>
    where
        B: Fn(&str) -> TransactionArgs + Send + Sync,
    {
        let ctx = call.context();
        ctx.log_start();
        let backoff = RetryBackoff::new(
            self.config.initial_backoff(),
            self.config.max_backoff(),
            self.config.max_attempts(),
        )
        .with_cancellation(&self.shutdown);

        let build = &build;
        let ctx_ref = &ctx;
        let recovery = call.recovery;
        retry_with_backoff(
            backoff,
            |attempt| async move {
                let guid = self.session().guid().unwrap_or_default();
                let args = build(&guid);
                self.attempt(ctx_ref, attempt, recovery, &args).await
            },
            |attempt, delay, reason, will_retry| {
                if will_retry {
                    self.telemetry.record_retry();
                    ctx.log_retry(attempt, delay, reason);
                } else {
                    ctx.log_exhausted(attempt, reason);
                }
            },
        )
        .await
    }

    async fn attempt(
        &self,
        ctx: &RetryContext<'_>,
        attempt: usize,
        recovery: Recovery,
        args: &TransactionArgs,
    ) -> AttemptOutcome<V5Response> {
        let response = match self.v5.send(args).await {
            Ok(response) => response,
            Err(err) => return AttemptOutcome::Retry(err.to_string()),
        };

        if response.code.is_transient() {
            return AttemptOutcome::Retry(response.code.to_string());
        }

        let reregistration = match recovery {
            Recovery::Report => None,
            Recovery::Reregister => response.code.reregistration(false),
            Recovery::ReregisterOnMismatch => response.code.reregistration(true),
        };
        if let Some(kind) = reregistration {
            ctx.log_reregister(attempt, response.code.code());
            self.telemetry.record_reregistration();
            if let Err(err) = self.register(kind == Reregistration::SameGuid).await {
                return AttemptOutcome::Retry(format!("re-registration failed: {err:#}"));
            }
            return AttemptOutcome::Retry(response.code.to_string());
        }

        AttemptOutcome::Finished(response)
    }

    /// Website counterpart of [`Coordinator::transact`], bounded by the
    /// separate manual-mode attempt budget.
    pub(crate) async fn with_website_retry<T, F, Fut>(
        &self,
        messages: &'static RetryMessages,
        exponent: Option<u64>,
        mut operation: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = match exponent {
            Some(exponent) => RetryContext::with_exponent(messages, exponent),
            None => RetryContext::new(messages),
        };
        ctx.log_start();
        let backoff = RetryBackoff::new(
            self.config.initial_backoff(),
            self.config.max_backoff(),
            self.config.manual_max_attempts(),
        )
        .with_cancellation(&self.shutdown);

        retry_with_backoff(
            backoff,
            |_| {
                let pending = operation();
                async move {
                    match pending.await {
                        Ok(value) => AttemptOutcome::Finished(value),
                        Err(err) => AttemptOutcome::Retry(format!("{err:#}")),
                    }
                }
            },
            |attempt, delay, reason, will_retry| {
                if will_retry {
                    self.telemetry.record_retry();
                    ctx.log_retry(attempt, delay, reason);
                } else {
                    ctx.log_exhausted(attempt, reason);
                }
            },
        )
        .await
    }

    /// Logs in to the website once per process in manual mode.
    pub(crate) async fn ensure_logged_in(&self) -> Result<bool> {
        let Some(password) = self.config.password() else {
            return Ok(false);
        };
        if self.session().is_logged_in() {
            return Ok(true);
        }
        self.website.login(self.config.username(), password).await
    }
}
