//! Bounded polling for eventually-consistent remote state

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Multiplier applied to the interval after each pending probe
    pub backoff: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    /// Fixed spacing, no backoff
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: 1.0,
            max_interval: interval,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("still pending after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("probe failed on attempt {attempt}: {source}")]
    Probe {
        attempt: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Call `probe` until it reports ready, errors, or the attempt budget is spent
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut probe: F) -> Result<T, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let mut interval = policy.interval;

    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            Ok(Probe::Ready(value)) => return Ok(value),
            Ok(Probe::Pending) => {
                debug!("Poll attempt {}/{} still pending", attempt, policy.max_attempts);
            }
            Err(source) => return Err(PollError::Probe { attempt, source }),
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(interval).await;
            interval = interval.mul_f64(policy.backoff.max(1.0)).min(policy.max_interval);
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}
