//! Assignment lifecycle orchestration: registration, cache fill, progress
//! push, result submission and unreserve, all routed through one
//! [`Coordinator`] and its bounded retry loop.

pub mod backoff;
pub mod coordinator;
pub mod fetcher;
pub mod lifecycle;
pub mod progress_push;
pub mod registration;
pub mod results;
pub mod unreserve;
pub mod worker;

pub use coordinator::Coordinator;
pub use fetcher::{target_depth, CacheSettings, GrantRejection};
pub use lifecycle::{AssignmentState, InvalidTransition};
pub use progress_push::QueueProgress;
pub use registration::derive_hardware_guid;
pub use results::{CompletionRecord, ResultType};
pub use worker::CycleSummary;
