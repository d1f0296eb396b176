use anyhow::Result;
use primenet_agent::parse_line;
use tempfile::tempdir;

use crate::support::{
    helpers::{config_builder, coordinator, init_tracing, read, registered_state},
    mock_primenet::{MockPrimeNet, MockPrimeNetServer, KEY},
};

const OTHER_KEY: &str = "FEDCBA9876543210FEDCBA9876543210";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreserve_all_releases_queue_and_stops_fetching() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_v5("au", 0, &[]);
    // Already released on the server side: still counts.
    mock.script_v5("au", 43, &[]);
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    tokio::fs::write(
        &work,
        format!("PRP={KEY},1,2,110000017,-1,77,0\nDoubleCheck={OTHER_KEY},110000039,74,1\n"),
    )
    .await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.unreserve_all().await?, 2);

    let keys: Vec<String> = mock
        .requests_for("au")
        .iter()
        .filter_map(|request| request.param("k").map(str::to_owned))
        .collect();
    assert_eq!(keys, vec![KEY.to_owned(), OTHER_KEY.to_owned()]);
    assert!(read(&work).await.is_empty());
    assert!(coordinator.state().snapshot().await.no_more_work);
    assert_eq!(coordinator.telemetry().snapshot().assignments_unreserved, 2);

    assert_eq!(coordinator.fetch_assignments(0, dir.path(), None).await?, 0);
    assert!(mock.requests_for("ga").is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreserve_exponent_leaves_other_work() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    tokio::fs::write(
        &work,
        format!("PRP={KEY},1,2,110000017,-1,77,0\nDoubleCheck={OTHER_KEY},110000039,74,1\n"),
    )
    .await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.unreserve_exponent(110_000_039).await?, 1);
    assert_eq!(read(&work).await, format!("PRP={KEY},1,2,110000017,-1,77,0\n"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn assignment_missing_from_queue_is_not_released() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    tokio::fs::write(&work, format!("PRP={KEY},1,2,110000017,-1,77,0\n")).await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    let elsewhere = parse_line(&format!("DoubleCheck={OTHER_KEY},110000039,74,1"))?;
    assert!(!coordinator.unreserve(dir.path(), &elsewhere).await?);

    assert!(mock.requests_for("au").is_empty());
    assert_eq!(read(&work).await, format!("PRP={KEY},1,2,110000017,-1,77,0\n"));
    assert_eq!(coordinator.telemetry().snapshot().assignments_unreserved, 0);

    server.shutdown().await;
    Ok(())
}
