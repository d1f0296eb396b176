//! HTTP client for the v5 endpoint. One call, one outcome: retries belong to
//! the orchestrator.

use anyhow::{anyhow, Context, Result};
use std::{fmt, sync::Arc};
use tokio::time::{timeout, Instant};
use url::Url;

use crate::transport::args::TransactionArgs;
use crate::transport::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::transport::options::TransportOptions;
use crate::transport::response::V5Response;
use crate::transport::session::Session;
use crate::transport::signing::{self, SigningMode};

#[derive(Debug)]
pub enum TransportError {
    Timeout { transaction: String },
    Connection { transaction: String, message: String },
    Status { transaction: String, status: u16 },
    MissingField { field: &'static str },
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { transaction } => write!(f, "v5 transaction {transaction} timed out"),
            Self::Connection {
                transaction,
                message,
            } => write!(f, "v5 transaction {transaction} failed: {message}"),
            Self::Status {
                transaction,
                status,
            } => write!(f, "v5 transaction {transaction} returned HTTP {status}"),
            Self::MissingField { field } => write!(f, "response is missing field {field}"),
            Self::InvalidField { field, value } => {
                write!(f, "response field {field} has invalid value {value:?}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone)]
pub struct V5Client {
    endpoint: Arc<Url>,
    http: reqwest::Client,
    session: Arc<Session>,
    options: TransportOptions,
    metrics: Arc<TransportMetrics>,
}

impl V5Client {
    pub fn new(endpoint: &str, session: Arc<Session>, options: TransportOptions) -> Result<Self> {
        options.validate()?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;
        Self::with_http(endpoint, session, options, http)
    }

    /// Shares an existing HTTP client, and with it the cookie jar used by
    /// the website endpoints.
    pub fn with_http(
        endpoint: &str,
        session: Arc<Session>,
        options: TransportOptions,
        http: reqwest::Client,
    ) -> Result<Self> {
        options.validate()?;
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid v5 endpoint {endpoint:?}"))?;
        Ok(Self {
            endpoint: Arc::new(endpoint),
            http,
            session,
            options,
            metrics: Arc::new(TransportMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Signs and sends one request.
    ///
    /// The signing identity is the `g` argument when present, which lets a
    /// registration sign with the identifier it is about to claim.
    pub async fn send(&self, args: &TransactionArgs) -> Result<V5Response, TransportError> {
        let transaction = args.transaction().to_owned();
        let signed = match self.session.signing_mode() {
            SigningMode::Signed => {
                let guid = args
                    .get("g")
                    .map(str::to_owned)
                    .or_else(|| self.session.guid())
                    .unwrap_or_default();
                signing::sign(&guid, self.session.next_salt(), args)
            }
            SigningMode::UntrustedClient => signing::untrusted(args),
        };

        let mut url = (*self.endpoint).clone();
        url.set_query(Some(&signed.query));
        tracing::debug!(transaction = %transaction, "sending v5 request");

        let started = Instant::now();
        let exchange = async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match timeout(self.options.request_timeout, exchange).await {
            Err(_) => {
                self.metrics.record_timeout(started.elapsed());
                return Err(TransportError::Timeout { transaction });
            }
            Ok(Err(err)) if err.is_timeout() => {
                self.metrics.record_timeout(started.elapsed());
                return Err(TransportError::Timeout { transaction });
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(started.elapsed());
                return Err(TransportError::Connection {
                    transaction,
                    message: err.to_string(),
                });
            }
            Ok(Ok(pair)) => pair,
        };

        if !status.is_success() {
            self.metrics.record_failure(started.elapsed());
            return Err(TransportError::Status {
                transaction,
                status: status.as_u16(),
            });
        }

        let response = match V5Response::from_body(&body) {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_failure(started.elapsed());
                tracing::error!(transaction = %transaction, body = %body, error = %err, "malformed v5 response");
                return Err(err);
            }
        };

        if response.is_ok() {
            self.metrics.record_success(started.elapsed());
            if let Some(detail) = response.notable_detail() {
                tracing::info!(transaction = %transaction, detail, "PrimeNet server message");
            }
        } else {
            self.metrics.record_server_error(started.elapsed());
            tracing::warn!(
                transaction = %transaction,
                code = response.code.code(),
                description = response.code.description(),
                detail = %response.detail,
                "PrimeNet returned an error"
            );
        }
        Ok(response)
    }
}
