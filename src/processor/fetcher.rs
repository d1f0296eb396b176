//! Keeps every worker's queue filled to its target depth.
//!
//! Fetched work is checked against what the local engine can run, then
//! normalized (PRP to LL under an LL preference, P-1 requested when prior
//! bounds fall short) before it is appended to the queue file.

use anyhow::Result;
use std::fmt;
use std::path::Path;

use crate::assignment::codec::{format_line, parse_line, ParseError};
use crate::assignment::model::{Assignment, WorkType, DEFAULT_SIEVE_DEPTH};
use crate::assignment::queue::WorkQueue;
use crate::pminus1::recommend_bounds;
use crate::processor::coordinator::{Call, Coordinator, Recovery};
use crate::progress::engine::EngineLog;
use crate::runtime::config::{AgentConfig, LL_WORK_PREFERENCES};
use crate::runtime::state::AgentState;
use crate::transport::args::{Transaction, TransactionArgs};
use crate::transport::manual::ManualFetch;
use crate::transport::replies::AssignmentGrant;
use crate::transport::retry::{GET_ASSIGNMENT_RETRY, MANUAL_FETCH_RETRY};

/// Smallest exponent the server may hand out for LL and P-1 work.
pub const MIN_SERVER_EXPONENT: u64 = 15_000_000;
const SECS_PER_DAY: f64 = 86_400.0;

/// Inputs of the target depth computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    pub num_cache: usize,
    pub max_exponents: usize,
    pub manual_mode: bool,
    pub days_of_work: f64,
}

impl CacheSettings {
    /// Configured values, with the look-ahead the server last sent taking
    /// precedence.
    pub fn new(config: &AgentConfig, state: &AgentState) -> Self {
        Self {
            num_cache: config.num_cache(),
            max_exponents: config.max_exponents(),
            manual_mode: config.is_manual_mode(),
            days_of_work: state.days_of_work.unwrap_or(config.days_of_work()),
        }
    }
}

/// Number of tracked assignments a worker should hold, given the estimated
/// time left on its current queue.
pub fn target_depth(settings: &CacheSettings, time_left_secs: Option<f64>) -> usize {
    let mut depth = settings.num_cache + 1;
    if settings.manual_mode {
        depth += 1;
    }
    if let Some(time_left) = time_left_secs {
        if time_left <= settings.days_of_work * SECS_PER_DAY {
            depth += 1;
        }
    }
    depth.min(settings.max_exponents)
}

/// Why a granted assignment was not queued.
#[derive(Debug)]
pub enum GrantRejection {
    ExponentTooSmall { exponent: u64 },
    UnsupportedWorkType { work_type: u32, program: &'static str },
    Invalid(ParseError),
}

impl fmt::Display for GrantRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExponentTooSmall { exponent } => {
                write!(f, "server sent bad exponent {exponent}")
            }
            Self::UnsupportedWorkType { work_type, program } => {
                write!(f, "work type {work_type} is not supported by {program}")
            }
            Self::Invalid(err) => write!(f, "granted assignment is invalid: {err}"),
        }
    }
}

impl std::error::Error for GrantRejection {}

pub(crate) fn get_assignment_args(config: &AgentConfig, guid: &str, cpu: usize) -> TransactionArgs {
    TransactionArgs::new(Transaction::GetAssignment)
        .with("g", guid)
        .with("c", cpu)
        .with("a", "")
        .with_opt("min", config.min_exponent())
        .with_opt("max", config.max_exponent())
}

/// Turns a `ga` grant into a queue entry the local engine can run.
pub fn assignment_from_grant(
    grant: &AssignmentGrant,
    engine: &EngineLog,
) -> Result<Assignment, GrantRejection> {
    if grant.exponent < MIN_SERVER_EXPONENT && matches!(grant.work_type, 2 | 4 | 100 | 101) {
        return Err(GrantRejection::ExponentTooSmall {
            exponent: grant.exponent,
        });
    }
    let unsupported = || GrantRejection::UnsupportedWorkType {
        work_type: grant.work_type,
        program: engine.program_name(),
    };
    if !engine.supports_work_type(grant.work_type) {
        return Err(unsupported());
    }
    let work_type = WorkType::from_code(grant.work_type).ok_or_else(unsupported)?;

    let builder = Assignment::builder(work_type, grant.exponent)
        .id(grant.key.clone())
        .sieve_depth(grant.sieve_depth.unwrap_or(DEFAULT_SIEVE_DEPTH));
    let candidate = |builder: crate::assignment::AssignmentBuilder| {
        builder.candidate(
            grant.k.unwrap_or(1.0),
            grant.base.unwrap_or(2),
            grant.c.unwrap_or(-1),
        )
    };
    let builder = match work_type {
        WorkType::FirstLl | WorkType::DoubleCheckLl => {
            builder.pminus1_done(grant.pminus1_done.map_or(true, |done| done != 0))
        }
        WorkType::Prp => {
            if *engine == EngineLog::Mlucas
                && (grant.prp_base.is_some() || grant.residue_type.is_some())
                && (grant.prp_base != Some(3) || !matches!(grant.residue_type, Some(1 | 5)))
            {
                tracing::error!(
                    exponent = grant.exponent,
                    prp_base = ?grant.prp_base,
                    residue_type = ?grant.residue_type,
                    "PRP base is not 3 or residue type is not 1 or 5"
                );
            }
            candidate(builder)
                .tests_saved(grant.tests_saved.unwrap_or(0.0))
                .prp_options(grant.prp_base.unwrap_or(0), grant.residue_type.unwrap_or(0))
                .known_factors(grant.known_factors.clone())
                .prp_double_check(grant.double_check)
        }
        WorkType::PFactor => candidate(builder).tests_saved(grant.tests_saved.unwrap_or(0.0)),
        WorkType::Cert => candidate(builder).cert_squarings(grant.squarings.unwrap_or(0)),
        WorkType::PMinus1 => return Err(unsupported()),
    };
    builder.build().map_err(GrantRejection::Invalid)
}

/// A first-time PRP test rewritten as an LL test. P-1 is still owed when
/// the server expected it to save tests.
pub fn as_lucas_lehmer(assignment: &Assignment) -> Assignment {
    assignment
        .with_work_type(WorkType::FirstLl)
        .with_pminus1_done(assignment.tests_saved() == 0.0)
}

/// Whether the redo decision has to consult the bounds already run on the
/// exponent instead of redoing P-1 outright.
pub fn needs_prior_bounds(assignment: &Assignment, tests_saved: f64, multiplier: Option<f64>) -> bool {
    if tests_saved == 0.0 || multiplier.is_none() {
        return false;
    }
    match assignment.work_type() {
        WorkType::FirstLl | WorkType::DoubleCheckLl => assignment.pminus1_done(),
        WorkType::Prp => assignment.tests_saved() == 0.0,
        _ => false,
    }
}

/// Prior B2 below `multiplier` times the balanced recommendation.
pub fn prior_bounds_fall_short(assignment: &Assignment, prior: (u64, u64), multiplier: f64) -> bool {
    let recommended = recommend_bounds(assignment.exponent(), assignment.sieve_depth()).balanced;
    let threshold = recommended.b2 as f64 * multiplier;
    let short = (prior.1 as f64) < threshold;
    tracing::debug!(
        exponent = assignment.exponent(),
        prior_b1 = prior.0,
        prior_b2 = prior.1,
        recommended_b1 = recommended.b1,
        recommended_b2 = recommended.b2,
        short,
        "compared prior P-1 bounds"
    );
    short
}

/// The assignment with P-1 requested according to `tests_saved`.
pub fn request_pminus1(assignment: &Assignment, tests_saved: f64) -> Assignment {
    match assignment.work_type() {
        WorkType::FirstLl | WorkType::DoubleCheckLl => {
            assignment.with_pminus1_done(tests_saved == 0.0)
        }
        WorkType::Prp => assignment.with_tests_saved(tests_saved),
        _ => assignment.clone(),
    }
}

impl Coordinator {
    /// Fills the queue in `dir` up to its target depth. Returns how many
    /// assignments were appended.
    pub async fn fetch_assignments(
        &self,
        cpu: usize,
        dir: &Path,
        time_left_secs: Option<f64>,
    ) -> Result<usize> {
        let config = self.config();
        let state = self.state().snapshot().await;
        if state.no_more_work {
            tracing::debug!(worker = cpu, "no more work requested; not fetching");
            return Ok(0);
        }

        let work_path = dir.join(config.work_file());
        let existing = WorkQueue::load(&work_path).await?.tracked().len();
        let target = target_depth(&CacheSettings::new(config, &state), time_left_secs);
        let to_get = target.saturating_sub(existing);
        if to_get == 0 {
            tracing::debug!(worker = cpu, existing, target, "queue is deep enough");
            return Ok(0);
        }
        tracing::info!(worker = cpu, existing, target, to_get, "requesting new assignments");

        let fetched = if config.is_manual_mode() {
            self.fetch_manual(to_get).await?
        } else {
            self.fetch_v5(cpu, to_get).await?
        };

        let preference = state.work_preference.unwrap_or(config.work_preference());
        let mut lines = Vec::with_capacity(fetched.len());
        for assignment in &fetched {
            let normalized = self.normalize(assignment, preference).await;
            if normalized != *assignment {
                tracing::debug!(
                    original = %format_line(assignment),
                    rewritten = %format_line(&normalized),
                    "rewrote fetched assignment"
                );
            }
            lines.push(format_line(&normalized));
        }
        WorkQueue::append(&work_path, &lines).await?;
        self.telemetry().record_assignments_fetched(lines.len() as u64);

        if lines.len() < to_get {
            tracing::error!(
                worker = cpu,
                requested = to_get,
                fetched = lines.len(),
                "failed to get requested number of new assignments"
            );
        }
        Ok(lines.len())
    }

    async fn fetch_v5(&self, cpu: usize, count: usize) -> Result<Vec<Assignment>> {
        let mut fetched = Vec::with_capacity(count);
        for _ in 0..count {
            match self.get_assignment(cpu).await? {
                Some(assignment) => fetched.push(assignment),
                None => break,
            }
        }
        Ok(fetched)
    }

    /// `ga`: one assignment for worker `cpu`, or `None` when the server had
    /// nothing usable.
    pub async fn get_assignment(&self, cpu: usize) -> Result<Option<Assignment>> {
        let config = self.config();
        let response = self
            .transact(
                Call::new(&GET_ASSIGNMENT_RETRY).recovery(Recovery::ReregisterOnMismatch),
                |guid| get_assignment_args(config, guid, cpu),
            )
            .await?;
        let Some(response) = response else {
            return Ok(None);
        };
        if !response.is_ok() {
            tracing::warn!(worker = cpu, code = response.code.code(), "no assignment granted: {}", response.code);
            return Ok(None);
        }

        let grant = match AssignmentGrant::decode(&response.fields) {
            Ok(grant) => grant,
            Err(err) => {
                self.telemetry().record_discarded();
                tracing::error!(worker = cpu, fields = ?response.fields, error = %err, "discarding malformed assignment grant");
                return Ok(None);
            }
        };
        match assignment_from_grant(&grant, config.engine()) {
            Ok(assignment) => {
                tracing::info!(
                    worker = cpu,
                    key = %grant.key,
                    exponent = grant.exponent,
                    work = assignment.work_type().label(),
                    "got assignment"
                );
                Ok(Some(assignment))
            }
            Err(rejection) => {
                self.telemetry().record_discarded();
                tracing::error!(worker = cpu, grant = ?grant, "discarding assignment: {rejection}");
                Ok(None)
            }
        }
    }

    async fn fetch_manual(&self, count: usize) -> Result<Vec<Assignment>> {
        if !self.ensure_logged_in().await? {
            tracing::error!("manual assignment fetch needs a successful website login");
            return Ok(Vec::new());
        }
        let config = self.config();
        let request = ManualFetch {
            cores: u32::try_from(config.worker_dirs().len()).unwrap_or(u32::MAX),
            count,
            work_preference: config.work_preference(),
            min_exponent: config.min_exponent(),
            max_exponent: config.max_exponent(),
        };
        let website = self.website();
        let lines = self
            .with_website_retry(&MANUAL_FETCH_RETRY, None, || website.fetch_assignments(&request))
            .await?
            .unwrap_or_default();

        let mut assignments = Vec::with_capacity(lines.len());
        for line in lines {
            match parse_line(&line) {
                Ok(assignment) => assignments.push(assignment),
                Err(err) => {
                    self.telemetry().record_discarded();
                    tracing::error!(line = %line, error = %err, "discarding invalid manual assignment");
                }
            }
        }
        Ok(assignments)
    }

    /// Applies the operator's LL preference and P-1 policy to a fetched
    /// assignment.
    pub async fn normalize(&self, assignment: &Assignment, work_preference: u32) -> Assignment {
        let config = self.config();
        let mut current = assignment.clone();

        if current.work_type() == WorkType::Prp
            && !current.is_prp_double_check()
            && LL_WORK_PREFERENCES.contains(&work_preference)
        {
            current = as_lucas_lehmer(&current);
        }

        let Some(tests_saved) = config.tests_saved() else {
            return current;
        };
        if !current.work_type().is_primality_test() {
            return current;
        }

        let redo = match config.pm1_multiplier() {
            Some(multiplier) if needs_prior_bounds(&current, tests_saved, Some(multiplier)) => {
                let exponent = current.exponent();
                match self.website().exponent_report(exponent).await {
                    Ok(report) => report
                        .prior_bounds(exponent)
                        .is_some_and(|prior| prior_bounds_fall_short(&current, prior, multiplier)),
                    Err(err) => {
                        tracing::warn!(exponent, error = %format!("{err:#}"), "could not look up prior P-1 bounds");
                        false
                    }
                }
            }
            _ => true,
        };
        if redo {
            current = request_pminus1(&current, tests_saved);
        }
        current
    }

    /// Stops (or resumes) fetching for every worker.
    pub async fn set_no_more_work(&self, no_more_work: bool) -> Result<()> {
        self.state()
            .update(|state| state.no_more_work = no_more_work)
            .await?;
        tracing::info!(no_more_work, "updated fetch policy");
        Ok(())
    }
}
