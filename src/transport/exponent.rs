//! Exponent status report, used to look up P-1 bounds already run on an
//! exponent before deciding whether to redo them.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::transport::manual::WebsiteClient;

#[derive(Debug, Clone, Deserialize)]
pub struct ExponentReport {
    #[serde(default)]
    pub results: Vec<ExponentStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExponentStatus {
    pub exponent: u64,
    #[serde(rename = "Pm1_bound1", default)]
    pub pm1_bound1: Option<u64>,
    #[serde(rename = "Pm1_bound2", default)]
    pub pm1_bound2: Option<u64>,
}

impl ExponentReport {
    /// Prior P-1 bounds for `exponent`, when the report covers it and both
    /// bounds are non-zero.
    pub fn prior_bounds(&self, exponent: u64) -> Option<(u64, u64)> {
        let status = self.results.first()?;
        if status.exponent != exponent {
            return None;
        }
        match (status.pm1_bound1, status.pm1_bound2) {
            (Some(b1), Some(b2)) if b1 > 0 && b2 > 0 => Some((b1, b2)),
            _ => None,
        }
    }
}

impl WebsiteClient {
    pub async fn exponent_report(&self, exponent: u64) -> Result<ExponentReport> {
        let mut url = self.endpoint("report_exponent_simple/")?;
        url.query_pairs_mut()
            .append_pair("exp_lo", &exponent.to_string())
            .append_pair("faclim", "1")
            .append_pair("json", "1");
        self.http()
            .get(url)
            .send()
            .await
            .context("exponent report request failed")?
            .error_for_status()
            .context("exponent report request rejected")?
            .json::<ExponentReport>()
            .await
            .with_context(|| format!("failed to decode exponent report for {exponent}"))
    }
}
