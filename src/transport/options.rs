//! Timeout and retry knobs shared by every v5 call.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::transport::signing::SigningMode;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub signing_mode: SigningMode,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            signing_mode: SigningMode::Signed,
        }
    }
}

impl TransportOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be smaller than initial_backoff");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = TransportOptions::default();
        options.validate().expect("defaults validate");
        assert_eq!(options.request_timeout, Duration::from_secs(180));
        assert_eq!(options.max_attempts, 5);
    }

    #[test]
    fn rejects_zero_attempts_and_inverted_backoff() {
        let options = TransportOptions {
            max_attempts: 0,
            ..TransportOptions::default()
        };
        assert!(options.validate().is_err());

        let options = TransportOptions {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..TransportOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
