//! Bounded polling for conditions that become true asynchronously

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::trace;

use crate::error::{E2eError, E2eResult};

/// How long to keep retrying a condition and how often to re-check it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(interval_ms),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_millis(5000, 100)
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Condition holds; stop polling
    Ready(T),
    /// Not yet; carries what was observed for the timeout message
    Pending(String),
}

/// Re-run `probe` until it reports `Ready` or `policy.timeout` elapses.
///
/// A probe error aborts immediately. The probe always runs at least once.
pub async fn poll_until<T, F, Fut>(what: &str, policy: &PollPolicy, mut probe: F) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Probe<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0usize;

    loop {
        attempts += 1;

        let last = match probe().await? {
            Probe::Ready(value) => return Ok(value),
            Probe::Pending(observed) => observed,
        };

        if start.elapsed() >= policy.timeout {
            return Err(E2eError::Timeout {
                what: what.to_string(),
                after_ms: start.elapsed().as_millis() as u64,
                last_observed: Some(last),
            });
        }

        trace!(what, attempts, observed = %last, "condition not met yet");
        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_once_ready() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = PollPolicy::from_millis(1000, 1);

        let value = poll_until("third call", &policy, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 {
                Ok(Probe::Ready(n))
            } else {
                Ok(Probe::Pending(format!("call {}", n)))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_with_last_observation() {
        let policy = PollPolicy::from_millis(30, 5);

        let err = poll_until::<(), _, _>("never", &policy, || async {
            Ok(Probe::Pending("still nothing".to_string()))
        })
        .await
        .unwrap_err();

        match err {
            E2eError::Timeout { what, after_ms, last_observed } => {
                assert_eq!(what, "never");
                assert!(after_ms >= 30);
                assert_eq!(last_observed.as_deref(), Some("still nothing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn probe_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = PollPolicy::from_millis(1000, 1);

        let err = poll_until::<(), _, _>("broken", &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(E2eError::Config("bad".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, E2eError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_timeout_still_probes_once() {
        let policy = PollPolicy::from_millis(0, 1);
        let value = poll_until("immediate", &policy, || async { Ok(Probe::Ready(7)) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
