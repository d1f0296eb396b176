//! Result submission (`ar`, or the website in manual mode).
//!
//! Lines the engine appended to its results file are submitted one at a
//! time. A line counts as sent once the server gave a definitive answer,
//! and sent lines are recorded in `results_sent.txt` so they are never
//! offered twice.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::assignment::primes::{digits, divides_mersenne, is_known_mersenne_prime};
use crate::assignment::queue::{append_lines, read_lines, WorkQueue};
use crate::processor::coordinator::{Call, Coordinator};
use crate::processor::lifecycle::AssignmentState;
use crate::transport::args::{Transaction, TransactionArgs};
use crate::transport::codes::PrimeNetCode;
use crate::transport::manual::ManualSubmission;
use crate::transport::retry::{MANUAL_RESULT_RETRY, RESULT_RETRY};

pub const RESULTS_SENT_FILE: &str = "results_sent.txt";
const NO_ERRORS: &str = "00000000";
const HUNDRED_MILLION_DIGITS: u64 = 100_000_000;

static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Program: E|Mlucas|CUDALucas v|gpuowl").expect("result line pattern compiles")
});

static CUDALUCAS_RESULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^M\( ([0-9]{7,}) \)(P|C, (0x[0-9a-f]{16})), offset = ([0-9]+), n = ([0-9]{3,})K, (CUDALucas v[^\s,]+)(?:, AID: ([0-9A-F]{32}))?$",
    )
    .expect("CUDALucas result pattern compiles")
});

/// Whether a results file line is a completed result worth submitting.
pub fn is_result_line(line: &str) -> bool {
    RESULT_LINE.is_match(line)
}

/// A JSON value that engines write either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(u64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl fmt::Display for ProgramInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProofInfo {
    pub power: Scalar,
    pub md5: String,
}

/// One completion record as written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompletionRecord {
    pub worktype: String,
    pub status: String,
    pub exponent: u64,
    #[serde(default)]
    pub aid: Option<String>,
    #[serde(default)]
    pub res64: Option<String>,
    #[serde(rename = "residue-type", default)]
    pub residue_type: Option<Scalar>,
    #[serde(rename = "shift-count", default)]
    pub shift_count: Option<Scalar>,
    #[serde(rename = "error-code", default)]
    pub error_code: Option<String>,
    #[serde(rename = "fft-length", default)]
    pub fft_length: Option<Scalar>,
    #[serde(rename = "known-factors", default)]
    pub known_factors: Option<Vec<Scalar>>,
    #[serde(default)]
    pub proof: Option<ProofInfo>,
    #[serde(rename = "B1", default)]
    pub b1: Option<Scalar>,
    #[serde(rename = "B2", default)]
    pub b2: Option<Scalar>,
    #[serde(default)]
    pub factors: Vec<Scalar>,
    #[serde(default)]
    pub program: Option<ProgramInfo>,
}

impl CompletionRecord {
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Parses the one-line summary CUDALucas writes, e.g.
    /// `M( 108928711 )C, 0x810d83b6917d846c, offset = 106008371, n = 6272K, CUDALucas v2.06, AID: ...`.
    pub fn from_cudalucas(line: &str) -> Option<Self> {
        let captures = CUDALUCAS_RESULT.captures(line)?;
        let exponent = captures.get(1)?.as_str().parse().ok()?;
        let prime = captures.get(2)?.as_str().starts_with('P');
        let res64 = if prime {
            "0".repeat(16)
        } else {
            captures.get(3)?.as_str().trim_start_matches("0x").to_owned()
        };
        let fft_k: u64 = captures.get(5)?.as_str().parse().ok()?;
        let mut program = captures.get(6)?.as_str().split_whitespace();
        let program = ProgramInfo {
            name: program.next()?.to_owned(),
            version: program.next().map(str::to_owned),
        };

        Some(Self {
            worktype: "LL".to_owned(),
            status: if prime { "P" } else { "C" }.to_owned(),
            exponent,
            aid: captures.get(7).map(|m| m.as_str().to_owned()),
            res64: Some(res64),
            residue_type: None,
            shift_count: Some(Scalar::Text(captures.get(4)?.as_str().to_owned())),
            error_code: None,
            fft_length: Some(Scalar::Number(fft_k * 1024)),
            known_factors: None,
            proof: None,
            b1: None,
            b2: None,
            factors: Vec::new(),
            program: Some(program),
        })
    }
}

/// `r` codes of the `ar` transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    P1Factor,
    P1NoFactor,
    LlResult,
    LlPrime,
    PrpResult,
    PrpPrime,
}

impl ResultType {
    pub fn for_record(record: &CompletionRecord) -> Option<Self> {
        let status = record.status.as_str();
        match record.worktype.as_str() {
            "LL" if status == "P" => Some(Self::LlPrime),
            "LL" => Some(Self::LlResult),
            kind if kind.starts_with("PRP") && status == "P" => Some(Self::PrpPrime),
            kind if kind.starts_with("PRP") => Some(Self::PrpResult),
            "PM1" if status == "F" => Some(Self::P1Factor),
            "PM1" => Some(Self::P1NoFactor),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::P1Factor => 2,
            Self::P1NoFactor => 5,
            Self::LlResult => 100,
            Self::LlPrime => 101,
            Self::PrpResult => 150,
            Self::PrpPrime => 151,
        }
    }

    pub fn is_prime(self) -> bool {
        matches!(self, Self::LlPrime | Self::PrpPrime)
    }
}

fn residue(record: &CompletionRecord) -> String {
    let res64 = record.res64.as_deref().unwrap_or("").trim();
    format!("{res64:0>16}")
}

/// `ar` arguments. `in_workfile` tells whether the exponent is still queued,
/// which decides if a P-1 run without a factor closes the assignment.
pub(crate) fn result_args(
    guid: &str,
    record: &CompletionRecord,
    line: &str,
    result_type: ResultType,
    in_workfile: bool,
) -> TransactionArgs {
    let mut args = TransactionArgs::new(Transaction::AssignmentResult)
        .with("g", guid)
        .with("k", record.aid.as_deref().unwrap_or("0"))
        .with("m", line)
        .with("r", result_type.code())
        .with("n", record.exponent);
    let error_code = record.error_code.as_deref().unwrap_or(NO_ERRORS);

    match result_type {
        ResultType::LlResult | ResultType::LlPrime => {
            args = args.with("d", 1);
            if result_type == ResultType::LlResult {
                args = args.with("rd", residue(record));
            }
            args = args
                .with_opt("sc", record.shift_count.as_ref())
                .with("ec", error_code);
        }
        ResultType::PrpResult | ResultType::PrpPrime => {
            args = args.with("d", 1).with("A", 1).with("b", 2).with("c", -1);
            if result_type == ResultType::PrpResult {
                args = args
                    .with("rd", residue(record))
                    .with_opt("rt", record.residue_type.as_ref());
            }
            args = args
                .with("ec", error_code)
                .with_opt("nkf", record.known_factors.as_ref().map(Vec::len))
                .with("base", record.worktype.get(4..).unwrap_or(""))
                .with_opt("sc", record.shift_count.as_ref())
                .with("gbz", 1);
            if let Some(proof) = &record.proof {
                args = args.with("pp", &proof.power).with("ph", &proof.md5);
            }
        }
        ResultType::P1Factor | ResultType::P1NoFactor => {
            let done = result_type == ResultType::P1Factor || !in_workfile;
            args = args
                .with("d", u8::from(done))
                .with("A", 1)
                .with("b", 2)
                .with("c", -1)
                .with_opt("B1", record.b1.as_ref())
                .with_opt("B2", record.b2.as_ref());
            if result_type == ResultType::P1Factor {
                args = args.with_opt("f", record.factors.first());
            }
        }
    }
    args.with_opt("fftlen", record.fft_length.as_ref())
}

/// How the server answered one `ar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultDisposition {
    Accepted,
    /// The server no longer tracks the assignment; drop it locally.
    Released,
    /// Answered but not creditable; resubmitting would not help.
    Ignored,
    /// Not sent; offer the line again on a later cycle.
    Retry,
}

pub fn result_disposition(code: PrimeNetCode) -> ResultDisposition {
    match code {
        PrimeNetCode::Ok => ResultDisposition::Accepted,
        code if code.releases_assignment() => ResultDisposition::Released,
        PrimeNetCode::InvalidResultType => ResultDisposition::Ignored,
        _ => ResultDisposition::Retry,
    }
}

impl Coordinator {
    /// Submits new lines from the results file in `dir`. Returns how many
    /// were marked as sent.
    pub async fn submit_results(&self, cpu: usize, dir: &Path) -> Result<usize> {
        let results_path = dir.join(self.config().results_file());
        let sent_path = dir.join(RESULTS_SENT_FILE);
        let already_sent: HashSet<String> = read_lines(&sent_path).await?.into_iter().collect();
        let pending: Vec<String> = read_lines(&results_path)
            .await?
            .into_iter()
            .filter(|line| is_result_line(line) && !already_sent.contains(line))
            .collect();
        if pending.is_empty() {
            tracing::debug!(worker = cpu, path = %results_path.display(), "no new results");
            return Ok(0);
        }
        tracing::info!(worker = cpu, count = pending.len(), "found new results to report");

        let mut sent = 0;
        for line in pending {
            if self.submit_line(dir, &line).await? {
                append_lines(&sent_path, std::slice::from_ref(&line)).await?;
                self.telemetry().record_result_submitted();
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn submit_line(&self, dir: &Path, line: &str) -> Result<bool> {
        let config = self.config();
        if config.is_manual_mode() {
            return self.submit_manually(line).await;
        }

        let record = if config.engine().writes_legacy_results() {
            let record = CompletionRecord::from_cudalucas(line);
            if record.is_none() {
                tracing::error!(line, "unable to parse result line");
            }
            record
        } else {
            match CompletionRecord::from_json(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::error!(line, error = %err, "unable to decode result line");
                    if line.contains("Program: E") {
                        tracing::info!("please upgrade to Mlucas v19 or greater");
                    }
                    None
                }
            }
        };

        match record {
            Some(record) if self.session().guid().is_some() => {
                self.report_result(dir, line, &record).await
            }
            _ => self.submit_manually(line).await,
        }
    }

    /// `ar` for one decoded record.
    pub async fn report_result(&self, dir: &Path, line: &str, record: &CompletionRecord) -> Result<bool> {
        let exponent = record.exponent;
        let Some(result_type) = ResultType::for_record(record) else {
            tracing::error!(exponent, worktype = %record.worktype, "unsupported result work type");
            return Ok(false);
        };

        if let Some(program) = &record.program {
            let program = program.to_string();
            self.state()
                .update(|state| state.program = Some(program))
                .await?;
        }

        if result_type.is_prime() {
            self.announce_prime(exponent, &record.worktype);
            if self.config().no_report_100m() && digits(exponent) >= HUNDRED_MILLION_DIGITS {
                tracing::warn!(exponent, "not reporting a 100 million digit prime");
                return Ok(true);
            }
        }

        let work_path = dir.join(self.config().work_file());
        let queue = WorkQueue::load(&work_path).await?;
        let in_workfile = queue.contains_exponent(exponent);
        // The engine drops the entry it finished, so a key no longer queued
        // belongs to the work that was running.
        let from = record
            .aid
            .as_deref()
            .and_then(|aid| AssignmentState::in_queue(&queue, aid))
            .unwrap_or(AssignmentState::InProgress);
        let completed = match from.transition(AssignmentState::Completed) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(
                    exponent,
                    line,
                    error = %err,
                    "result names work the engine has not started; holding it"
                );
                return Ok(false);
            }
        };
        if result_type == ResultType::P1Factor {
            for factor in &record.factors {
                let factor = factor.to_string();
                if divides_mersenne(exponent, &factor) == Some(false) {
                    tracing::warn!(exponent, factor = %factor, "factor does not divide the Mersenne number");
                }
            }
        }

        tracing::info!(exponent, result_type = result_type.code(), "sending result to server");
        let response = self
            .transact(Call::new(&RESULT_RETRY).exponent(exponent), |guid| {
                result_args(guid, record, line, result_type, in_workfile)
            })
            .await?;
        let Some(response) = response else {
            return Ok(false);
        };

        match result_disposition(response.code) {
            ResultDisposition::Accepted => {
                tracing::info!(exponent, state = %completed, "result accepted by server");
                Ok(true)
            }
            ResultDisposition::Released => {
                tracing::warn!(exponent, "server no longer tracks the assignment: {}", response.code);
                if let Some(aid) = record.aid.as_deref() {
                    WorkQueue::remove_by_id(&work_path, aid).await?;
                }
                Ok(true)
            }
            ResultDisposition::Ignored => {
                tracing::warn!(exponent, "server ignored the result: {}", response.code);
                Ok(true)
            }
            ResultDisposition::Retry if response.code == PrimeNetCode::InvalidParameter => {
                tracing::error!(
                    exponent,
                    line,
                    "server rejected the result as an invalid parameter; not retrying"
                );
                Ok(false)
            }
            ResultDisposition::Retry => {
                tracing::error!(exponent, code = response.code.code(), "result not accepted: {}", response.code);
                Ok(false)
            }
        }
    }

    /// Website submission; the result is credited to manual testing.
    async fn submit_manually(&self, line: &str) -> Result<bool> {
        let website = self.website();
        let outcome = self
            .with_website_retry(&MANUAL_RESULT_RETRY, None, || website.submit_result(line))
            .await?;
        let Some(outcome) = outcome else {
            return Ok(false);
        };
        match outcome {
            ManualSubmission::Accepted { credit } => {
                tracing::info!(line, credit = credit.as_deref().unwrap_or(""), "result accepted");
            }
            ManualSubmission::Rejected {
                message,
                already_sent,
            } => {
                tracing::error!(line, message = %message, "submission failed");
                if already_sent {
                    tracing::error!(line, "already sent, will not retry");
                }
            }
            ManualSubmission::Unrecognized => {
                tracing::error!(line, "submission failed for unknown reasons; please resubmit manually");
            }
        }
        Ok(true)
    }

    fn announce_prime(&self, exponent: u64, worktype: &str) {
        if self.config().silent_victory() || is_known_mersenne_prime(exponent) {
            return;
        }
        if worktype == "LL" {
            tracing::warn!(exponent, "New Mersenne Prime!!!! M{exponent} is prime!");
        } else {
            tracing::warn!(exponent, "New Probable Prime!!!! M{exponent} is a probable prime!");
        }
        tracing::warn!("Please send e-mail to woltman@alum.mit.edu and ewmayer@aol.com.");
    }
}
