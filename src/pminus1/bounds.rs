//! Success probability, cost, and the bound search built on them.

use crate::pminus1::rho::{prime_count, stage1_probability, stage2_probability};

const SLICE_WIDTH: f64 = 0.25;
const SLICE_CUTOFF: f64 = 1e-8;
const MAX_SLICES: u32 = 1_000_000;
const STAGE1_FACTOR: f64 = 1.2;
const STAGE2_FACTOR: f64 = 1.35;
const MAX_WALK_STEPS: u32 = 10_000;

/// Roughly 10% apart, one or two significant digits.
const NICE_STEPS: [u64; 29] = [
    10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 22, 24, 26, 28, 30, 32, 34, 36, 38, 40, 45, 50, 55,
    60, 65, 70, 75, 80,
];
const NICE_TOP: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub b1: u64,
    pub b2: u64,
}

impl Bounds {
    pub fn new(b1: u64, b2: u64) -> Self {
        Self { b1, b2 }
    }
}

/// The three checkpoints of one search, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recommendation {
    pub conservative: Bounds,
    pub balanced: Bounds,
    pub aggressive: Bounds,
}

/// Smallest "nice" number strictly above `value`.
pub fn next_nice(mut value: u64) -> u64 {
    let mut scale = 1u64;
    while value >= NICE_TOP {
        value /= 10;
        scale *= 10;
    }
    let step = NICE_STEPS
        .iter()
        .copied()
        .find(|&step| step > value)
        .unwrap_or(NICE_TOP);
    step * scale
}

/// Probability of a stage 1 and a stage 2 factor for `M(exponent)`,
/// already trial factored to `factored_to` bits.
pub fn success_probability(exponent: u64, factored_to: f64, b1: u64, b2: u64) -> (f64, f64) {
    let take_away_bits = (exponent as f64).log2() + 1.0;
    let middle_shift = (1.0 + 2f64.powf(SLICE_WIDTH)).log2() - 1.0;

    let b2 = b2.max(b1);
    let bits_b1 = (b1 as f64).log2();
    let bits_b2 = (b2 as f64).log2();

    let mut alpha = (factored_to + middle_shift - take_away_bits) / bits_b1;
    let alpha_step = SLICE_WIDTH / bits_b1;
    let beta = bits_b2 / bits_b1;

    let mut sum1 = 0.0;
    let mut sum2 = 0.0;
    let mut inverse_slice = factored_to / SLICE_WIDTH + 0.5;

    for _ in 0..MAX_SLICES {
        let p1 = stage1_probability(alpha) / inverse_slice;
        let p2 = stage2_probability(alpha, beta) / inverse_slice;
        sum1 += p1;
        sum2 += p2;
        if p1 + p2 < SLICE_CUTOFF {
            break;
        }
        alpha += alpha_step;
        inverse_slice += 1.0;
    }

    (-(-sum1).exp_m1(), -(-sum2).exp_m1())
}

/// Squarings for each stage when no factor turns up.
pub fn work_for_bounds(b1: u64, b2: u64) -> (f64, f64) {
    let stage1 = b1 as f64 * 1.442 * STAGE1_FACTOR;
    let stage2 = (prime_count(b2 as f64) - prime_count(b1 as f64)) * 0.85 * STAGE2_FACTOR;
    (stage1, stage2)
}

/// `(probability, work)`, with work expressed as a fraction of one
/// primality test.
pub fn gain(exponent: u64, factored_to: f64, b1: u64, b2: u64) -> (f64, f64) {
    let (p1, p2) = success_probability(exponent, factored_to, b1, b2);
    let (w1, w2) = work_for_bounds(b1, b2);
    let work = (w1 + (1.0 - p1 - p2 / 4.0) * w2) / exponent as f64;
    (p1 + p2, work)
}

fn initial_bounds(exponent: u64) -> Bounds {
    let bits = (exponent as f64).log2();
    let b1 = next_nice(((60.0 - bits) / 10_000.0 * exponent as f64) as u64);
    let b2 = next_nice((b1 as f64 * (4.0 + (bits - 20.0) * 8.0)) as u64);
    Bounds::new(b1, b2)
}

/// Greedy walk from the initial bounds toward the point where neither
/// bound pays for its own increase.
pub fn recommend_bounds(exponent: u64, factored_to: f64) -> Recommendation {
    let mut current = initial_bounds(exponent);
    let mut conservative = None;
    let mut balanced = None;
    let (mut p, mut w) = gain(exponent, factored_to, current.b1, current.b2);
    let mut finished = false;

    for _ in 0..MAX_WALK_STEPS {
        let step_b1 = next_nice(current.b1) - current.b1;
        let step_b2 = next_nice(current.b2) - current.b2;
        let (p1, w1) = gain(exponent, factored_to, current.b1 + step_b1, current.b2);
        let (p2, w2) = gain(exponent, factored_to, current.b1, current.b2 + step_b2);

        let r1 = (p1 - p) / (w1 - w);
        let r2 = (p2 - p) / (w2 - w);

        if r1 < 1.0 && r2 < 1.0 && conservative.is_none() {
            conservative = Some(current);
        }
        if r1 < 0.5 && r2 < 0.5 && balanced.is_none() {
            balanced = Some(current);
        }
        if r1 < 1.0 && r2 < 1.0 && p1 <= w1 && p2 <= w2 {
            finished = true;
            break;
        }

        if r1 > r2 {
            current.b1 += step_b1;
            p = p1;
            w = w1;
        } else {
            current.b2 += step_b2;
            p = p2;
            w = w2;
        }
    }

    if !finished {
        tracing::warn!(exponent, factored_to, b1 = current.b1, b2 = current.b2, "P-1 bound search hit its step cap");
    }

    let conservative = conservative.or(balanced).unwrap_or(current);
    Recommendation {
        conservative,
        balanced: balanced.unwrap_or(current),
        aggressive: current,
    }
}
