use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use crate::error::StitchError;

/// How often to ask and for how long. Without a deadline the loop only ends when the resource is
/// ready, fails, or the token is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Option<Duration>) -> Self {
        Self { interval, deadline }
    }

    pub fn from_secs(interval_secs: u64, deadline: Option<Duration>) -> Self {
        Self::new(Duration::from_secs(interval_secs), deadline)
    }
}

/// Result of a single readiness check.
#[derive(Debug)]
pub enum PollStep<T> {
    Ready(T),
    /// not there yet, the reason is logged
    Pending(String),
    /// the resource reached a state it will not recover from
    Failed(anyhow::Error),
}

/// Call `check` at a fixed interval until it is ready or has failed. The first check happens
/// straight away, so a resource that becomes ready after K pending checks costs exactly K + 1
/// calls.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollStep<T>>,
{
    let started = Instant::now();
    let deadline = policy.deadline.map(|d| started + d);
    let mut attempt: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StitchError::PollCancelled { what: what.to_string() }.into());
        }
        attempt += 1;
        match check().await {
            PollStep::Ready(value) => {
                tracing::debug!("{what} ready after {attempt} attempt(s)");
                return Ok(value);
            }
            PollStep::Failed(err) => return Err(err),
            PollStep::Pending(reason) => {
                tracing::info!("{what} is not ready ({reason}), trying again in {:?}", policy.interval);
            }
        }

        let next = Instant::now() + policy.interval;
        match deadline {
            Some(deadline) if deadline <= next => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(StitchError::PollCancelled { what: what.to_string() }.into());
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(StitchError::PollDeadline {
                            what: what.to_string(),
                            after: started.elapsed(),
                        }.into());
                    }
                }
            }
            _ => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(StitchError::PollCancelled { what: what.to_string() }.into());
                    }
                    _ = tokio::time::sleep_until(next) => {}
                }
            }
        }
    }
}
