use anyhow::Result;
use tempfile::tempdir;

use crate::support::{
    helpers::{config_builder, coordinator, init_tracing, read, registered_state},
    mock_primenet::{MockPrimeNet, MockPrimeNetServer, GUID, KEY},
};

fn prp_result() -> String {
    format!(
        r#"{{"status":"C", "exponent":110000017, "worktype":"PRP-3", "res64":"1C5E7A4B2F0D3E61", "residue-type":1, "fft-length":6291456, "program":{{"name":"Mlucas", "version":"20.1.1"}}, "aid":"{KEY}"}}"#
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn results_are_submitted_once() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let line = prp_result();
    tokio::fs::write(
        dir.path().join("results.txt"),
        format!("Iter# = 10000 [ 0.01% complete]\n{line}\n"),
    )
    .await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 1);
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 0);

    let submissions = mock.requests_for("ar");
    assert_eq!(submissions.len(), 1);
    let ar = &submissions[0];
    assert_eq!(ar.param("g"), Some(GUID));
    assert_eq!(ar.param("k"), Some(KEY));
    assert_eq!(ar.param("r"), Some("150"));
    assert_eq!(ar.param("n"), Some("110000017"));
    assert_eq!(ar.param("rd"), Some("1C5E7A4B2F0D3E61"));
    assert_eq!(ar.param("base"), Some("3"));
    assert_eq!(ar.param("m"), Some(line.as_str()));

    assert_eq!(read(&dir.path().join("results_sent.txt")).await, format!("{line}\n"));
    let state = coordinator.state().snapshot().await;
    assert_eq!(state.program.as_deref(), Some("Mlucas 20.1.1"));
    assert_eq!(coordinator.telemetry().snapshot().results_submitted, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_parameter_is_not_retried_or_marked_sent() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_v5("ar", 7, &[]);
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    tokio::fs::write(dir.path().join("results.txt"), format!("{}\n", prp_result())).await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 0);

    assert_eq!(mock.requests_for("ar").len(), 1);
    assert!(read(&dir.path().join("results_sent.txt")).await.is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_for_dropped_assignment_clears_queue_entry() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_v5("ar", 43, &[]);
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    tokio::fs::write(&work, format!("PRP={KEY},1,2,110000017,-1,77,0\n")).await?;
    tokio::fs::write(dir.path().join("results.txt"), format!("{}\n", prp_result())).await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 1);
    assert!(read(&work).await.is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_mode_submits_through_the_website() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let line = prp_result();
    tokio::fs::write(dir.path().join("results.txt"), format!("{line}\n")).await?;

    let config = config_builder(&server, dir.path())
        .username("tester")
        .password("secret")
        .build()?;
    let coordinator = coordinator(config, Default::default()).await?;
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 1);

    assert!(mock.requests_for("ar").is_empty());
    let posts = mock.requests_to("/manual_result/default.php");
    assert_eq!(posts.len(), 1);
    assert!(String::from_utf8_lossy(&posts[0].body).starts_with("data="));
    assert_eq!(read(&dir.path().join("results_sent.txt")).await, format!("{line}\n"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_for_work_not_yet_started_is_held() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let work = dir.path().join("worktodo.ini");
    let queue = format!(
        "PRP=FEDCBA9876543210FEDCBA9876543210,1,2,110000039,-1,77,0\nPRP={KEY},1,2,110000017,-1,77,0\n"
    );
    tokio::fs::write(&work, &queue).await?;
    tokio::fs::write(dir.path().join("results.txt"), format!("{}\n", prp_result())).await?;

    let config = config_builder(&server, dir.path()).build()?;
    let coordinator = coordinator(config, registered_state()).await?;
    assert_eq!(coordinator.submit_results(0, dir.path()).await?, 0);

    assert!(mock.requests_for("ar").is_empty());
    assert!(read(&dir.path().join("results_sent.txt")).await.is_empty());
    assert_eq!(read(&work).await, queue);

    server.shutdown().await;
    Ok(())
}
