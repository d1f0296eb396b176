use serde::{Deserialize, Serialize};

/// Counters read from an engine's output for one exponent. Zero stage
/// counters mean the engine is not in that stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSample {
    pub iteration: u64,
    pub ms_per_iter: Option<f64>,
    pub fft_length: Option<u64>,
    pub stage1_bits: u64,
    pub stage2_units: u64,
}

impl ProgressSample {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Measured iteration speed and the exponent it was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReference {
    pub exponent: u64,
    pub ms_per_iter: f64,
}
