use anyhow::Result;
use primenet_agent::{AgentState, Runner, WorkQueue};
use tempfile::tempdir;

use crate::support::{
    helpers::{config_builder, coordinator, init_tracing, read, registered_state},
    mock_primenet::{MockPrimeNet, MockPrimeNetServer, GUID, KEY},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_run_registers_fetches_and_reports_progress() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;

    let config = config_builder(&server, dir.path()).build()?;
    let runner = Runner::new(config).await?;
    runner.run().await?;

    assert_eq!(mock.transactions(), vec!["uc", "po", "po", "ga", "ap"]);

    let queue = WorkQueue::load(dir.path().join("worktodo.ini")).await?;
    assert_eq!(
        queue.lines(),
        &[format!("PRP={KEY},1,2,110000017,-1,77,1,3,1")]
    );

    let progress = &mock.requests_for("ap")[0];
    assert_eq!(progress.param("g"), Some(GUID));
    assert_eq!(progress.param("k"), Some(KEY));
    assert_eq!(progress.param("p"), Some("0.0000"));

    let state: AgentState = serde_json::from_str(&read(&dir.path().join("local.json")).await)?;
    assert_eq!(state.guid.as_deref(), Some(GUID));
    assert_eq!(state.work_preference, Some(150));
    assert_eq!(state.options_counter, Some(1));
    assert!(state.last_progress_push.is_some());

    let telemetry = runner.coordinator().telemetry().snapshot();
    assert_eq!(telemetry.assignments_fetched, 1);
    assert_eq!(telemetry.progress_updates, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregistered_cpu_triggers_reregistration_then_retry() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_v5("ap", 30, &[]);
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    tokio::fs::write(
        dir.path().join("worktodo.ini"),
        format!("PRP={KEY},1,2,110000017,-1,77,0\n"),
    )
    .await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    coordinator.update_progress(0, dir.path()).await?;

    let transactions = mock.transactions();
    assert_eq!(transactions.first().map(String::as_str), Some("ap"));
    assert_eq!(transactions.get(1).map(String::as_str), Some("uc"));
    assert_eq!(transactions.last().map(String::as_str), Some("ap"));
    assert_eq!(mock.requests_for("ap").len(), 2);

    let telemetry = coordinator.telemetry().snapshot();
    assert_eq!(telemetry.reregistrations, 1);
    assert_eq!(telemetry.progress_updates, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_for_dropped_assignment_removes_it() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_v5("ap", 47, &[]);
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    tokio::fs::write(&work, format!("PRP={KEY},1,2,110000017,-1,77,0\nTest=110000039,74,1\n")).await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    let progress = coordinator
        .update_progress(0, dir.path())
        .await?
        .expect("queue has work");
    assert_eq!(progress.entries.len(), 2);

    // Only keyed entries are reported.
    assert_eq!(mock.requests_for("ap").len(), 1);
    assert_eq!(read(&work).await, "Test=110000039,74,1\n");

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_server_is_retried_until_budget_runs_out() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    for _ in 0..3 {
        mock.script_v5("ga", 3, &[]);
    }
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    let fetched = coordinator.fetch_assignments(0, dir.path(), None).await?;

    assert_eq!(fetched, 0);
    assert_eq!(mock.requests_for("ga").len(), 3);
    assert_eq!(coordinator.telemetry().snapshot().retries, 2);
    assert!(read(&dir.path().join("worktodo.ini")).await.is_empty());

    server.shutdown().await;
    Ok(())
}
