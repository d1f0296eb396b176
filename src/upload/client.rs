//! HTTP side of the proof upload: announce, then POST chunks until the
//! server reports the file complete.

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use crate::runtime::telemetry::Telemetry;
use crate::upload::proof::{dispose, file_digest, proof_files, read_header};
use crate::upload::protocol::{
    upgrade_to_https, AnnounceReply, ChunkReply, NeedInterval, UploadError, CHUNK_SIZE,
};

#[derive(Debug, Clone)]
pub struct ProofUploader {
    http: reqwest::Client,
    site: Url,
    user_id: String,
    timeout: Duration,
    chunk_size: u64,
    telemetry: Option<Arc<Telemetry>>,
}

impl ProofUploader {
    pub fn new(
        site_url: &str,
        http: reqwest::Client,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let site = Url::parse(site_url).with_context(|| format!("invalid site URL {site_url}"))?;
        Ok(Self {
            http,
            site,
            user_id: user_id.into(),
            timeout,
            chunk_size: CHUNK_SIZE,
            telemetry: None,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Uploads every proof in `<dir>/proof`, archiving or removing each one
    /// that made it. Failures are logged and the file stays for a later
    /// cycle. Returns how many were uploaded.
    pub async fn upload_dir(&self, dir: &Path, archive: Option<&Path>) -> Result<usize> {
        let files = proof_files(dir).await?;
        if files.is_empty() {
            tracing::debug!(dir = %dir.display(), "no proof files to upload");
            return Ok(0);
        }

        let mut uploaded = 0;
        for path in files {
            match self.upload(&path).await {
                Ok(true) => {
                    dispose(&path, dir, archive).await?;
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_proof_uploaded();
                    }
                    uploaded += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %format!("{err:#}"), "proof upload failed");
                }
            }
        }
        Ok(uploaded)
    }

    /// Uploads one proof. `Ok(false)` means the file is not a PRP proof.
    pub async fn upload(&self, path: &Path) -> Result<bool> {
        let Some(exponent) = read_header(path).await? else {
            tracing::warn!(path = %path.display(), "not a PRP proof file; skipping");
            return Ok(false);
        };
        let (file_md5, size) = file_digest(path).await?;
        tracing::info!(path = %path.display(), exponent, md5 = %file_md5, size, "uploading proof");

        let reply = self.announce(exponent, size, &file_md5).await?;
        let (target, mut need) = match AnnounceReply::decode(&reply, size)? {
            AnnounceReply::AlreadyUploaded => {
                tracing::warn!(path = %path.display(), reply = %reply, "proof already uploaded");
                return Ok(true);
            }
            AnnounceReply::Upload { url, need } => (url, need),
        };
        let target = self.chunk_target(&target)?;
        if need.pos > 0 {
            tracing::info!(path = %path.display(), offset = need.pos, "resuming proof upload");
        }

        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        loop {
            let len = need.chunk_len(self.chunk_size);
            let mut chunk = vec![0u8; usize::try_from(len).context("chunk too large")?];
            file.seek(SeekFrom::Start(need.pos)).await?;
            file.read_exact(&mut chunk)
                .await
                .with_context(|| format!("failed to read {} at offset {}", path.display(), need.pos))?;

            let reply = self.send_chunk(&target, &file_md5, need.pos, chunk).await?;
            match ChunkReply::decode(&reply)? {
                ChunkReply::Uploaded => {
                    tracing::info!(path = %path.display(), exponent, "proof uploaded");
                    return Ok(true);
                }
                ChunkReply::Need(next) => {
                    need = NeedInterval::advance(need.pos, next, size)?;
                    tracing::debug!(path = %path.display(), pos = need.pos, end = need.end, "chunk accepted");
                }
            }
        }
    }

    /// Chunks follow the site onto TLS: plain-http targets are upgraded
    /// whenever the site itself is reached over https.
    fn chunk_target(&self, target: &str) -> Result<Url> {
        let target = if self.site.scheme() == "https" {
            upgrade_to_https(target)
        } else {
            target.to_owned()
        };
        Url::parse(&target).with_context(|| format!("invalid upload URL {target}"))
    }

    async fn announce(&self, exponent: u64, size: u64, file_md5: &str) -> Result<Value> {
        let url = self
            .site
            .join("proof_upload/")
            .context("failed to build proof upload URL")?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("UserID", self.user_id.clone()),
                ("Exponent", exponent.to_string()),
                ("FileSize", size.to_string()),
                ("FileMD5", file_md5.to_owned()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .context("proof announce request failed")?;
        read_reply(response).await
    }

    async fn send_chunk(&self, target: &Url, file_md5: &str, pos: u64, chunk: Vec<u8>) -> Result<Value> {
        let data_md5 = hex::encode(Md5::digest(&chunk));
        let len = chunk.len();
        let form = Form::new().part("Data", Part::bytes(chunk));
        let response = self
            .http
            .post(target.clone())
            .query(&[
                ("FileMD5", file_md5.to_owned()),
                ("DataOffset", pos.to_string()),
                ("DataSize", len.to_string()),
                ("DataMD5", data_md5),
            ])
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("proof chunk at offset {pos} failed"))?;
        read_reply(response).await
    }
}

/// JSON body of an upload reply. An `error_status` body is returned as is
/// so the decoders can classify it; otherwise an HTTP error wins.
async fn read_reply(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.context("failed to read upload reply")?;
    match serde_json::from_str::<Value>(&body) {
        Ok(value) if value.get("error_status").is_some() => Ok(value),
        _ if !status.is_success() => Err(UploadError::Http {
            status: status.as_u16(),
        }
        .into()),
        Ok(value) => Ok(value),
        Err(err) => Err(UploadError::Malformed {
            message: format!("{err}: {body}"),
        }
        .into()),
    }
}
