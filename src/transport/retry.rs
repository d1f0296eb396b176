//! Retry context and canned log messages so every v5 transaction reports
//! retries, re-registrations and exhaustion the same way.

use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(exponent) = $ctx.exponent {
            tracing::$level!(
                transaction = $ctx.messages.transaction,
                exponent,
                $($rest)*
            );
        } else {
            tracing::$level!(transaction = $ctx.messages.transaction, $($rest)*);
        }
    }};
}

pub(crate) use log_with_retry_ctx;

#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) transaction: &'static str,
    pub(crate) start: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) reregister: &'static str,
    pub(crate) exhausted: &'static str,
}

/// Log context for one logical v5 operation, optionally tied to an exponent.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    exponent: Option<u64>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            exponent: None,
            messages,
        }
    }

    pub(crate) fn with_exponent(messages: &'a RetryMessages, exponent: u64) -> Self {
        Self {
            exponent: Some(exponent),
            messages,
        }
    }

    pub(crate) fn log_start(&self) {
        log_with_retry_ctx!(info, self, "{}", self.messages.start);
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, reason: &str) {
        let backoff_ms = backoff.as_millis().min(u128::from(u64::MAX)) as u64;
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            reason,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_reregister(&self, attempt: usize, code: i64) {
        log_with_retry_ctx!(warn, self, attempt, code, "{}", self.messages.reregister);
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, reason: &str) {
        log_with_retry_ctx!(error, self, attempt, reason, "{}", self.messages.exhausted);
    }
}

pub(crate) const UPDATE_COMPUTER_RETRY: RetryMessages = RetryMessages {
    transaction: "uc",
    start: "registering computer with server",
    retry: "computer registration failed; retrying",
    reregister: "computer registration rejected identity",
    exhausted: "computer registration exhausted retries",
};

pub(crate) const PROGRAM_OPTIONS_RETRY: RetryMessages = RetryMessages {
    transaction: "po",
    start: "exchanging program options with server",
    retry: "program options exchange failed; retrying",
    reregister: "program options rejected identity; re-registering",
    exhausted: "program options exchange exhausted retries",
};

pub(crate) const GET_ASSIGNMENT_RETRY: RetryMessages = RetryMessages {
    transaction: "ga",
    start: "getting assignment from server",
    retry: "get assignment failed; retrying",
    reregister: "get assignment rejected identity; re-registering",
    exhausted: "get assignment exhausted retries",
};

pub(crate) const REGISTER_ASSIGNMENT_RETRY: RetryMessages = RetryMessages {
    transaction: "ra",
    start: "registering assignment",
    retry: "register assignment failed; retrying",
    reregister: "register assignment rejected identity; re-registering",
    exhausted: "register assignment exhausted retries",
};

pub(crate) const UNRESERVE_RETRY: RetryMessages = RetryMessages {
    transaction: "au",
    start: "unreserving assignment",
    retry: "unreserve failed; retrying",
    reregister: "unreserve rejected identity; re-registering",
    exhausted: "unreserve exhausted retries",
};

pub(crate) const PROGRESS_RETRY: RetryMessages = RetryMessages {
    transaction: "ap",
    start: "sending progress update",
    retry: "progress update failed; retrying",
    reregister: "progress update rejected identity; re-registering",
    exhausted: "progress update exhausted retries",
};

pub(crate) const RESULT_RETRY: RetryMessages = RetryMessages {
    transaction: "ar",
    start: "submitting result",
    retry: "result submission failed; retrying",
    reregister: "result submission rejected identity; re-registering",
    exhausted: "result submission exhausted retries",
};

pub(crate) const MANUAL_RESULT_RETRY: RetryMessages = RetryMessages {
    transaction: "manual_result",
    start: "submitting result through the website",
    retry: "manual result submission failed; retrying",
    reregister: "manual result submission requires login",
    exhausted: "manual result submission exhausted retries",
};

pub(crate) const MANUAL_FETCH_RETRY: RetryMessages = RetryMessages {
    transaction: "manual_assignment",
    start: "fetching assignments through the website",
    retry: "manual assignment fetch failed; retrying",
    reregister: "manual assignment fetch requires login",
    exhausted: "manual assignment fetch exhausted retries",
};
