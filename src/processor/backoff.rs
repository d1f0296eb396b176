use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// What one attempt concluded.
pub(crate) enum AttemptOutcome<T> {
    Finished(T),
    Retry(String),
}

/// Runs `operation` until it finishes or the attempt budget is spent.
///
/// Returns `Ok(None)` when every attempt asked for a retry, and an error only
/// when the cancellation token fires between attempts.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
) -> Result<Option<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
    L: FnMut(usize, Duration, &str, bool),
{
    let mut backoff = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("retry cancelled"));
            }
        }

        match operation(attempt).await {
            AttemptOutcome::Finished(value) => return Ok(Some(value)),
            AttemptOutcome::Retry(reason) => {
                let exhausted = attempt >= config.max_attempts;
                on_retry(attempt, backoff, &reason, !exhausted);
                if exhausted {
                    break;
                }
                sleep_with_cancellation(backoff, config.cancellation).await?;
                backoff = next_backoff(backoff, config.max_delay);
            }
        }
    }

    Ok(None)
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
