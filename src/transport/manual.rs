//! Website endpoints used when the operator supplies a password: login,
//! manual assignment requests and manual result submission. Work done this
//! way is credited to "Manual Testing" rather than to a registered machine.

use anyhow::{Context, Result};
use std::sync::Arc;
use url::Url;

use crate::transport::session::Session;

const BEGIN_ASSIGNMENTS: &str = "<!--BEGIN_ASSIGNMENTS_BLOCK-->";
const END_ASSIGNMENTS: &str = "<!--END_ASSIGNMENTS_BLOCK-->";
const ERROR_MARKER: &str = "Error code";
const ALREADY_SENT_MARKER: &str = "Error code: 40";
const ACCEPTED_MARKER: &str = "Accepted";
const CREDIT_MARKER: &str = "CPU credit is";
const SECTION_END: &str = "</div>";

#[derive(Debug, Clone)]
pub struct WebsiteClient {
    base: Arc<Url>,
    http: reqwest::Client,
    session: Arc<Session>,
}

/// Form fields of a manual assignment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualFetch {
    pub cores: u32,
    pub count: usize,
    pub work_preference: u32,
    pub min_exponent: Option<u64>,
    pub max_exponent: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualSubmission {
    Accepted { credit: Option<String> },
    Rejected { message: String, already_sent: bool },
    Unrecognized,
}

impl WebsiteClient {
    pub fn new(base_url: &str, http: reqwest::Client, session: Arc<Session>) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("invalid website base URL {base_url:?}"))?;
        Ok(Self {
            base: Arc::new(base),
            http,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("failed to build website URL for {path}"))
    }

    /// Logs in and records the outcome on the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        let url = self.endpoint("default.php")?;
        let body = self
            .http
            .post(url)
            .form(&[("user_login", username), ("user_password", password)])
            .send()
            .await
            .context("login request failed")?
            .error_for_status()
            .context("login request rejected")?
            .text()
            .await
            .context("failed to read login response")?;

        let logged_in = body.contains(&format!("{username}<br>logged in"));
        self.session.set_logged_in(logged_in);
        if logged_in {
            tracing::info!(username, "logged in to website");
        } else {
            tracing::error!(username, "login failed");
        }
        Ok(logged_in)
    }

    pub async fn fetch_assignments(&self, request: &ManualFetch) -> Result<Vec<String>> {
        let url = self.endpoint("manual_assignment/")?;
        let form = [
            ("cores", request.cores.to_string()),
            ("num_to_get", request.count.to_string()),
            ("pref", request.work_preference.to_string()),
            (
                "exp_lo",
                request.min_exponent.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "exp_hi",
                request.max_exponent.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("B1", "Get Assignments".to_owned()),
        ];
        tracing::debug!(count = request.count, "fetching manual assignments");
        let body = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .context("manual assignment request failed")?
            .error_for_status()
            .context("manual assignment request rejected")?
            .text()
            .await
            .context("failed to read manual assignment response")?;
        Ok(extract_assignment_block(&body))
    }

    pub async fn submit_result(&self, line: &str) -> Result<ManualSubmission> {
        let url = self.endpoint("manual_result/default.php")?;
        let body = self
            .http
            .post(url)
            .form(&[("data", line)])
            .send()
            .await
            .context("manual result request failed")?
            .error_for_status()
            .context("manual result request rejected")?
            .text()
            .await
            .context("failed to read manual result response")?;
        Ok(classify_submission(&body))
    }
}

/// Lines between the assignment block markers, or nothing if either is missing.
pub fn extract_assignment_block(html: &str) -> Vec<String> {
    let Some(begin) = html.find(BEGIN_ASSIGNMENTS) else {
        return Vec::new();
    };
    let rest = &html[begin + BEGIN_ASSIGNMENTS.len()..];
    let Some(end) = rest.find(END_ASSIGNMENTS) else {
        return Vec::new();
    };
    rest[..end]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn classify_submission(html: &str) -> ManualSubmission {
    if let Some(begin) = html.find(ERROR_MARKER) {
        let message = section_from(html, begin);
        return ManualSubmission::Rejected {
            already_sent: message.starts_with(ALREADY_SENT_MARKER),
            message,
        };
    }
    if html.contains(ACCEPTED_MARKER) {
        let credit = html
            .find(CREDIT_MARKER)
            .map(|begin| section_from(html, begin));
        return ManualSubmission::Accepted { credit };
    }
    ManualSubmission::Unrecognized
}

fn section_from(html: &str, begin: usize) -> String {
    let rest = &html[begin..];
    let end = rest.find(SECTION_END).unwrap_or(rest.len());
    rest[..end].trim().to_owned()
}
