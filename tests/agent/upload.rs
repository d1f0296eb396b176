use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use primenet_agent::upload::proof::PROOF_DIR;
use primenet_agent::ProofUploader;
use serde_json::json;
use tempfile::tempdir;

use crate::support::{
    helpers::init_tracing,
    mock_primenet::{MockPrimeNet, MockPrimeNetServer},
};

const PROOF_SIZE: usize = 1000;

async fn write_proof(dir: &Path, name: &str) -> Result<PathBuf> {
    let proofs = dir.join(PROOF_DIR);
    tokio::fs::create_dir_all(&proofs).await?;
    let mut contents = b"PRP PROOF\nVERSION=2\nHASHSIZE=64\nPOWER=8\nN=M110000017\n".to_vec();
    contents.resize(PROOF_SIZE, 0xA5);
    let path = proofs.join(name);
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

fn uploader(server: &MockPrimeNetServer) -> Result<ProofUploader> {
    ProofUploader::new(
        &server.site_url(),
        reqwest::Client::new(),
        "tester",
        Duration::from_secs(5),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn needed_range_is_sent_in_one_chunk() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    mock.script_announce(json!({
        "URLToUse": format!("{}upload/chunk", server.site_url()),
        "need": {"0": 999}
    }));
    let dir = tempdir()?;
    let proof = write_proof(dir.path(), "110000017-8.proof").await?;

    let uploaded = uploader(&server)?
        .upload_dir(dir.path(), Some(Path::new("archive")))
        .await?;
    assert_eq!(uploaded, 1);

    let announces = mock.requests_to("/proof_upload/");
    let announce = &announces[0];
    assert_eq!(announce.param("UserID"), Some("tester"));
    assert_eq!(announce.param("Exponent"), Some("110000017"));
    assert_eq!(announce.param("FileSize"), Some("1000"));

    let chunks = mock.requests_to("/upload/chunk");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].param("DataOffset"), Some("0"));
    assert_eq!(chunks[0].param("DataSize"), Some("1000"));
    assert_eq!(chunks[0].param("FileMD5"), announce.param("FileMD5"));
    assert!(chunks[0].body.len() > PROOF_SIZE);

    assert!(!proof.exists());
    assert!(dir.path().join("archive").join("110000017-8.proof").exists());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resumes_from_server_offset_in_bounded_chunks() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let target = format!("{}upload/chunk", server.site_url());
    mock.script_announce(json!({"URLToUse": target, "need": {"200": 999}}));
    mock.script_chunk(json!({"need": {"600": 999}}));
    mock.script_chunk(json!({"FileUploaded": 1}));
    let dir = tempdir()?;
    let proof = write_proof(dir.path(), "a.proof").await?;

    let uploaded = uploader(&server)?
        .with_chunk_size(400)
        .upload(&proof)
        .await?;
    assert!(uploaded);

    let offsets: Vec<(String, String)> = mock
        .requests_to("/upload/chunk")
        .iter()
        .map(|chunk| {
            (
                chunk.param("DataOffset").unwrap_or_default().to_owned(),
                chunk.param("DataSize").unwrap_or_default().to_owned(),
            )
        })
        .collect();
    assert_eq!(
        offsets,
        vec![
            ("200".to_owned(), "400".to_owned()),
            ("600".to_owned(), "400".to_owned())
        ]
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn already_uploaded_proof_is_removed() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    mock.script_announce(json!({"error_status": 409, "error_description": "Proof already uploaded"}));
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let dir = tempdir()?;
    let proof = write_proof(dir.path(), "b.proof").await?;

    assert_eq!(uploader(&server)?.upload_dir(dir.path(), None).await?, 1);
    assert!(!proof.exists());
    assert!(mock.requests_to("/upload/chunk").is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_upload_keeps_the_file() -> Result<()> {
    init_tracing();
    let mock = MockPrimeNet::new();
    let server = MockPrimeNetServer::start(mock.clone()).await?;
    let target = format!("{}upload/chunk", server.site_url());
    for _ in 0..2 {
        mock.script_announce(json!({"URLToUse": target, "need": {"0": 999}}));
        mock.script_chunk(json!({"need": {"0": 999}}));
    }
    let dir = tempdir()?;
    let proof = write_proof(dir.path(), "c.proof").await?;

    let err = uploader(&server)?
        .upload(&proof)
        .await
        .expect_err("no forward progress");
    assert!(format!("{err:#}").contains("did not advance"));

    assert_eq!(uploader(&server)?.upload_dir(dir.path(), None).await?, 0);
    assert!(proof.exists());

    server.shutdown().await;
    Ok(())
}
