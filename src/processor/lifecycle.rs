//! Per-assignment lifecycle: `Queued -> InProgress -> {Completed, Unreserved}`.

use std::fmt;

use crate::assignment::queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentState {
    Queued,
    InProgress,
    Completed,
    Unreserved,
}

impl AssignmentState {
    /// State of a tracked queue entry by position: the engine works on the
    /// head, everything behind it waits.
    pub fn for_position(index: usize) -> Self {
        if index == 0 {
            Self::InProgress
        } else {
            Self::Queued
        }
    }

    /// State of the entry keyed `id`, from its place among the tracked
    /// entries of `queue`. `None` once the entry left the queue.
    pub fn in_queue(queue: &WorkQueue, id: &str) -> Option<Self> {
        queue
            .tracked()
            .iter()
            .position(|assignment| assignment.id() == Some(id))
            .map(Self::for_position)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Unreserved)
    }

    pub fn can_transition(self, next: Self) -> bool {
        use AssignmentState::*;
        matches!(
            (self, next),
            (Queued, InProgress) | (Queued, Unreserved) | (InProgress, Completed) | (InProgress, Unreserved)
        )
    }

    pub fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Unreserved => "unreserved",
        }
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: AssignmentState,
    pub to: AssignmentState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assignment cannot move from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}
