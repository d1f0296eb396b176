//! Percent-done and time-left estimation. Pure and deterministic.

use std::time::Duration;

use crate::assignment::model::{Assignment, WorkType};
use crate::progress::sample::{ProgressSample, SpeedReference};

/// Share of stage 1 added to cover the engine's stage 1 finishing work.
const STAGE1_OVERHEAD: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorInputs {
    pub reference: Option<SpeedReference>,
    pub cpu_hours: f64,
    pub rolling_average: f64,
    /// Fixed stage 2 duration for engines whose stage 2 counter cannot be extrapolated.
    pub stage2_override: Option<Duration>,
}

impl Default for EstimatorInputs {
    fn default() -> Self {
        Self {
            reference: None,
            cpu_hours: 24.0,
            rolling_average: 1000.0,
            stage2_override: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    S1,
    S2,
    Ll,
    Prp,
    Cert,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::S1 => "S1",
            Stage::S2 => "S2",
            Stage::Ll => "LL",
            Stage::Prp => "PRP",
            Stage::Cert => "CERT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub percent_done: f64,
    pub eta_secs: Option<f64>,
    pub adjusted_ms_per_iter: Option<f64>,
    pub stage: Option<Stage>,
}

/// `n·log2(n)·log2(log2(n))`, proportional to the cost of one iteration.
pub fn fft_cost(exponent: u64) -> f64 {
    let n = exponent as f64;
    let log_n = n.log2();
    n * log_n * log_n.log2()
}

/// Iterations a full run of this assignment takes, absent stage counters.
pub fn full_run_iterations(assignment: &Assignment) -> u64 {
    match assignment.work_type() {
        WorkType::Prp | WorkType::Cert => assignment.exponent(),
        _ => assignment.exponent().saturating_sub(2),
    }
}

fn denominator(assignment: &Assignment, sample: &ProgressSample) -> u64 {
    if sample.stage2_units > 0 {
        sample.stage2_units
    } else if sample.stage1_bits > 0 {
        sample.stage1_bits
    } else {
        full_run_iterations(assignment)
    }
}

/// Iteration speed for `exponent`, rescaled from the reference exponent.
pub fn scaled_speed(reference: SpeedReference, exponent: u64) -> f64 {
    if reference.exponent == exponent {
        return reference.ms_per_iter;
    }
    let reference_cost = fft_cost(reference.exponent);
    let target_cost = fft_cost(exponent);
    if reference_cost.is_finite() && reference_cost > 0.0 && target_cost.is_finite() && target_cost > 0.0 {
        reference.ms_per_iter * target_cost / reference_cost
    } else {
        reference.ms_per_iter
    }
}

pub fn estimate(
    assignment: &Assignment,
    sample: &ProgressSample,
    inputs: &EstimatorInputs,
) -> Estimate {
    let total = denominator(assignment, sample);
    let iteration = sample.iteration.min(total);
    let percent_done = if total == 0 {
        0.0
    } else {
        (iteration as f64 / total as f64).clamp(0.0, 1.0)
    };
    let stage = stage(assignment, sample, percent_done);

    let Some(reference) = inputs.reference else {
        return Estimate {
            percent_done,
            eta_secs: None,
            adjusted_ms_per_iter: None,
            stage,
        };
    };

    let ms = scaled_speed(reference, assignment.exponent());
    let exponent = assignment.exponent() as f64;
    let final_pass = if assignment.work_type().is_primality_test() {
        ms * exponent
    } else {
        0.0
    };
    let remaining = (total - iteration) as f64;

    let mut time_left_ms = if sample.stage1_bits > 0 {
        ms * remaining + ms * sample.stage1_bits as f64 * STAGE1_OVERHEAD + final_pass
    } else if sample.stage2_units > 0 {
        let stage2 = match inputs.stage2_override {
            Some(fixed) => fixed.as_secs_f64() * 1000.0,
            None => ms * remaining,
        };
        stage2 + final_pass
    } else {
        ms * remaining
    };

    let cpu_hours = if inputs.cpu_hours > 0.0 { inputs.cpu_hours } else { 24.0 };
    let rolling_average = if inputs.rolling_average > 0.0 {
        inputs.rolling_average
    } else {
        1000.0
    };
    time_left_ms *= (24.0 / cpu_hours) * (1000.0 / rolling_average);

    Estimate {
        percent_done,
        eta_secs: Some((time_left_ms / 1000.0).max(0.0)),
        adjusted_ms_per_iter: Some(ms),
        stage,
    }
}

fn stage(assignment: &Assignment, sample: &ProgressSample, percent_done: f64) -> Option<Stage> {
    if percent_done <= 0.0 {
        return None;
    }
    if sample.stage1_bits > 0 {
        return Some(Stage::S1);
    }
    if sample.stage2_units > 0 {
        return Some(Stage::S2);
    }
    match assignment.work_type() {
        WorkType::FirstLl | WorkType::DoubleCheckLl => Some(Stage::Ll),
        WorkType::Prp => Some(Stage::Prp),
        WorkType::Cert => Some(Stage::Cert),
        WorkType::PMinus1 | WorkType::PFactor => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prp(exponent: u64) -> Assignment {
        Assignment::builder(WorkType::Prp, exponent)
            .build()
            .expect("prime exponent")
    }

    fn ll(exponent: u64) -> Assignment {
        Assignment::builder(WorkType::FirstLl, exponent)
            .build()
            .expect("prime exponent")
    }

    fn inputs(reference: SpeedReference) -> EstimatorInputs {
        EstimatorInputs {
            reference: Some(reference),
            ..EstimatorInputs::default()
        }
    }

    #[test]
    fn ll_counts_exponent_minus_two() {
        let assignment = ll(9941);
        let sample = ProgressSample {
            iteration: 9939,
            ..ProgressSample::default()
        };
        let estimate = estimate(&assignment, &sample, &EstimatorInputs::default());
        assert_eq!(estimate.percent_done, 1.0);
        assert_eq!(estimate.eta_secs, None);
        assert_eq!(estimate.stage, Some(Stage::Ll));
    }

    #[test]
    fn linear_extrapolation_without_stage_counters() {
        let assignment = prp(110_000_017);
        let sample = ProgressSample {
            iteration: 10_000_017,
            ..ProgressSample::default()
        };
        let reference = SpeedReference {
            exponent: 110_000_017,
            ms_per_iter: 2.0,
        };
        let estimate = estimate(&assignment, &sample, &inputs(reference));
        let eta = estimate.eta_secs.expect("speed known");
        assert!((eta - 200_000.0).abs() < 1e-6);
        assert_eq!(estimate.adjusted_ms_per_iter, Some(2.0));
        assert_eq!(estimate.stage, Some(Stage::Prp));
    }

    #[test]
    fn stage1_adds_overhead_and_final_pass() {
        let assignment = prp(9941);
        let sample = ProgressSample {
            iteration: 500,
            stage1_bits: 1000,
            ..ProgressSample::default()
        };
        let reference = SpeedReference {
            exponent: 9941,
            ms_per_iter: 1.0,
        };
        let estimate = estimate(&assignment, &sample, &inputs(reference));
        let expected_ms = 500.0 + 1000.0 * 1.2 + 9941.0;
        let eta = estimate.eta_secs.expect("speed known");
        assert!((eta - expected_ms / 1000.0).abs() < 1e-9);
        assert_eq!(estimate.percent_done, 0.5);
        assert_eq!(estimate.stage, Some(Stage::S1));
    }

    #[test]
    fn stage2_override_replaces_extrapolation() {
        let assignment = Assignment::builder(WorkType::PFactor, 9941)
            .build()
            .expect("valid");
        let sample = ProgressSample {
            iteration: 10,
            stage2_units: 40,
            ..ProgressSample::default()
        };
        let estimate = estimate(
            &assignment,
            &sample,
            &EstimatorInputs {
                reference: Some(SpeedReference {
                    exponent: 9941,
                    ms_per_iter: 1.0,
                }),
                stage2_override: Some(Duration::from_secs(3600)),
                ..EstimatorInputs::default()
            },
        );
        assert_eq!(estimate.eta_secs, Some(3600.0));
        assert_eq!(estimate.stage, Some(Stage::S2));
    }

    #[test]
    fn speed_is_rescaled_across_exponents() {
        let reference = SpeedReference {
            exponent: 100_000_007,
            ms_per_iter: 4.0,
        };
        let scaled = scaled_speed(reference, 110_000_017);
        let expected = 4.0 * fft_cost(110_000_017) / fft_cost(100_000_007);
        assert!((scaled - expected).abs() < 1e-12);
        assert!(scaled > 4.0);
    }

    #[test]
    fn partial_uptime_stretches_eta() {
        let assignment = prp(9941);
        let sample = ProgressSample::default();
        let reference = SpeedReference {
            exponent: 9941,
            ms_per_iter: 1.0,
        };
        let full = estimate(&assignment, &sample, &inputs(reference))
            .eta_secs
            .expect("eta");
        let half = estimate(
            &assignment,
            &sample,
            &EstimatorInputs {
                cpu_hours: 12.0,
                rolling_average: 500.0,
                ..inputs(reference)
            },
        )
        .eta_secs
        .expect("eta");
        assert!((half - full * 4.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn percent_is_bounded_and_monotonic(
            a in 0u64..200_000_000,
            b in 0u64..200_000_000,
            bits in prop_oneof![Just(0u64), 1u64..2_000_000],
        ) {
            let assignment = prp(110_000_017);
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let sample = |iteration| ProgressSample { iteration, stage1_bits: bits, ..ProgressSample::default() };
            let reference = SpeedReference { exponent: 100_000_007, ms_per_iter: 3.0 };
            let first = estimate(&assignment, &sample(low), &inputs(reference));
            let second = estimate(&assignment, &sample(high), &inputs(reference));
            prop_assert!((0.0..=1.0).contains(&first.percent_done));
            prop_assert!(first.percent_done <= second.percent_done);
            prop_assert!(first.eta_secs.expect("eta") >= second.eta_secs.expect("eta"));
            prop_assert!(second.eta_secs.expect("eta") >= 0.0);
        }

        #[test]
        fn endpoints_map_to_zero_and_one(exponent_index in 0usize..4) {
            let exponents = [9941u64, 86_243, 110_000_017, 332_192_831];
            let assignment = prp(exponents[exponent_index]);
            let start = estimate(&assignment, &ProgressSample::default(), &EstimatorInputs::default());
            prop_assert_eq!(start.percent_done, 0.0);
            prop_assert_eq!(start.stage, None);
            let done = ProgressSample { iteration: exponents[exponent_index], ..ProgressSample::default() };
            let end = estimate(&assignment, &done, &EstimatorInputs::default());
            prop_assert_eq!(end.percent_done, 1.0);
        }
    }
}
