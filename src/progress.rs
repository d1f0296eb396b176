//! Progress tracking: raw samples scraped from engine output, and the pure
//! estimator that turns them into percent-done and time-left figures.

pub mod engine;
pub mod estimator;
pub mod sample;

pub use engine::{EngineLog, ProgressSource};
pub use estimator::{estimate, Estimate, EstimatorInputs, Stage};
pub use sample::{ProgressSample, SpeedReference};
