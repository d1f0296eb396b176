//! Queue status summary: what is queued, cumulative completion estimates and
//! the odds of a new prime.

use crate::assignment::model::{Assignment, WorkType};
use crate::assignment::primes::digits;

const LL_ERROR_RATE: f64 = 0.018;
const PRP_ERROR_RATE: f64 = 0.0001;
const MIN_FACTORED_BITS: f64 = 32.0;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub exponent: u64,
    pub label: String,
    /// Seconds until this entry finishes, counting everything queued before it.
    pub cumulative_eta_secs: Option<f64>,
    pub prime_chance: Option<f64>,
    pub decimal_digits: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    pub combined_chance: Option<f64>,
    pub all_mersenne: bool,
}

pub fn work_label(assignment: &Assignment) -> String {
    match assignment.work_type() {
        WorkType::FirstLl => "Lucas-Lehmer test".to_owned(),
        WorkType::DoubleCheckLl => "Double-check".to_owned(),
        WorkType::Prp if assignment.is_prp_double_check() => "PRPDC".to_owned(),
        WorkType::Prp => "PRP".to_owned(),
        WorkType::PMinus1 => format!("P-1 B1={}", assignment.b1()),
        WorkType::PFactor => "P-1".to_owned(),
        WorkType::Cert => "Certify".to_owned(),
    }
}

/// Heuristic chance that a primality test of this candidate finds a prime,
/// scaled down for double checks by the odds the first test was wrong.
pub fn prime_chance(assignment: &Assignment) -> Option<f64> {
    let work_type = assignment.work_type();
    if !work_type.is_primality_test() {
        return None;
    }
    let bits = assignment.sieve_depth().trunc().max(MIN_FACTORED_BITS);
    let pminus1 = if assignment.pminus1_done() { 1.04 } else { 1.0 };
    let size = assignment.k().log2() + f64::from(assignment.base()).log2() * assignment.exponent() as f64;
    let error_rate = match work_type {
        WorkType::DoubleCheckLl => LL_ERROR_RATE,
        WorkType::Prp if assignment.is_prp_double_check() => PRP_ERROR_RATE,
        _ => 1.0,
    };
    Some((bits - 1.0) * 1.733 * error_rate * pminus1 / size)
}

/// `time_left` per entry is that entry's own remaining time, if known.
pub fn build_report(items: &[(Assignment, Option<f64>)]) -> StatusReport {
    let mut report = StatusReport {
        all_mersenne: true,
        ..StatusReport::default()
    };
    let mut elapsed = 0.0;
    let mut total_chance = 0.0;
    let mut tests = 0usize;

    for (assignment, time_left) in items {
        let cumulative_eta_secs = time_left.map(|secs| {
            elapsed += secs;
            elapsed
        });
        let chance = prime_chance(assignment);
        if let Some(chance) = chance {
            total_chance += chance;
            tests += 1;
        }
        let mersenne = assignment.is_mersenne() && assignment.known_factors().is_none();
        report.all_mersenne &= mersenne;
        report.entries.push(StatusEntry {
            exponent: assignment.exponent(),
            label: work_label(assignment),
            cumulative_eta_secs,
            prime_chance: chance,
            decimal_digits: assignment.is_mersenne().then(|| digits(assignment.exponent())),
        });
    }

    report.combined_chance = (tests > 1).then_some(total_chance);
    report
}

impl StatusReport {
    pub fn log(&self, worker: usize) {
        if self.entries.is_empty() {
            tracing::info!(worker, "no work queued up");
            return;
        }
        for entry in &self.entries {
            match entry.cumulative_eta_secs {
                Some(secs) => tracing::info!(
                    worker,
                    exponent = entry.exponent,
                    work = %entry.label,
                    eta_secs = secs.round() as u64,
                    "queued work"
                ),
                None => tracing::info!(
                    worker,
                    exponent = entry.exponent,
                    work = %entry.label,
                    "queued work; finish cannot be estimated"
                ),
            }
            if let Some(chance) = entry.prime_chance.filter(|c| *c > 0.0) {
                tracing::info!(
                    worker,
                    exponent = entry.exponent,
                    one_in = (1.0 / chance) as u64,
                    "chance this test yields a prime"
                );
            }
            if let Some(digits) = entry.decimal_digits {
                tracing::debug!(worker, exponent = entry.exponent, digits, "decimal digits");
            }
        }
        if let Some(chance) = self.combined_chance.filter(|c| *c > 0.0) {
            tracing::info!(
                worker,
                tests = self.entries.iter().filter(|e| e.prime_chance.is_some()).count(),
                mersenne = self.all_mersenne,
                one_in = (1.0 / chance) as u64,
                "chance one of the queued tests yields a prime"
            );
        }
    }
}
