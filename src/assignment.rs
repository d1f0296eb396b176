//! Assignment data model, the work-queue line codec, the queue file itself,
//! and the primality helpers both of them lean on.

pub mod codec;
pub mod model;
pub mod primes;
pub mod queue;
pub mod status;

pub use codec::{format_line, parse_line, ParseError};
pub use model::{Assignment, AssignmentBuilder, WorkType};
pub use queue::WorkQueue;
