use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use primenet_agent::{AgentConfig, AgentConfigBuilder, AgentState, Coordinator, StateStore, Telemetry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::support::mock_primenet::{MockPrimeNetServer, GUID};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Config pointed at the mock, one worker in `dir`, running a single cycle
/// with fast retries.
pub fn config_builder(server: &MockPrimeNetServer, dir: &Path) -> AgentConfigBuilder {
    AgentConfig::builder()
        .v5_url(server.v5_url())
        .site_url(server.site_url())
        .worker_dir(dir)
        .state_file(dir.join("local.json"))
        .poll_interval(Duration::ZERO)
        .max_attempts(3)
        .backoff(Duration::from_millis(5), Duration::from_millis(20))
        .request_timeout(Duration::from_secs(5))
}

pub fn registered_state() -> AgentState {
    AgentState {
        guid: Some(GUID.to_owned()),
        user_id: Some("tester".to_owned()),
        options_counter: Some(1),
        ..AgentState::default()
    }
}

pub async fn coordinator(config: AgentConfig, state: AgentState) -> Result<Coordinator> {
    let store = Arc::new(StateStore::in_memory(config.state_file().clone(), state));
    Coordinator::new(
        Arc::new(config),
        store,
        Arc::new(Telemetry::default()),
        CancellationToken::new(),
    )
    .await
}

pub async fn read(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}
