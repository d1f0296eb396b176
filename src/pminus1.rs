//! P-1 bound optimizer.
//!
//! Models the chance that stage 1 and stage 2 of P-1 find a factor using
//! Dickman's rho function, and walks outward from heuristic starting bounds
//! until further increases cost more than they are expected to save.

pub mod bounds;
pub mod rho;

pub use bounds::{gain, next_nice, recommend_bounds, success_probability, Bounds, Recommendation};
pub use rho::rho;
