//! Waiter - generic polling until a remote resource reaches a target status
//!
//! Cloud APIs accept a mutation and then converge asynchronously. A poll
//! session repeatedly refreshes the remote status until it lands in the
//! target set, strays outside both the pending and target sets, or the
//! timeout elapses. Each resource kind implements [`StatusPoller`] once;
//! this loop is the only place polling happens.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::error::{ProviderError, ProviderResult, ResourceId};

const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// A single status refresh: the reported status string plus whatever
/// payload the describe call returned. Delete pollers report a synthetic
/// "gone" status with no payload once the API stops returning the resource.
#[derive(Debug, Clone)]
pub struct Observation<T> {
    pub status: String,
    pub payload: Option<T>,
}

/// Refreshes the remote status of one resource.
#[async_trait]
pub trait StatusPoller: Send + Sync {
    type Output: Send;

    async fn poll(&self) -> ProviderResult<Observation<Self::Output>>;
}

#[derive(Debug, Error)]
pub enum WaitError {
    /// The deadline passed before a terminal status was seen. Never treated
    /// as success; the last observed status rides along for diagnostics.
    #[error("timed out waiting for status {target:?} (last status: {last_status})")]
    Timeout {
        target: Vec<String>,
        last_status: String,
    },

    /// The remote reported a status in neither the pending nor target set.
    #[error("unexpected terminal status {status:?} (wanted one of {target:?})")]
    UnexpectedStatus { status: String, target: Vec<String> },

    /// The refresh itself failed with a non-transient error.
    #[error("status refresh failed: {0}")]
    Refresh(#[source] ProviderError),
}

impl WaitError {
    pub fn into_provider_error(self, operation: &'static str, resource: &ResourceId) -> ProviderError {
        ProviderError::new(format!("{self}"))
            .for_resource(resource.clone())
            .during(operation)
            .with_cause(self)
    }
}

/// Configuration of one poll session.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Statuses that mean the remote is still converging.
    pub pending: &'static [&'static str],
    /// Statuses that end the session successfully.
    pub target: &'static [&'static str],
    pub timeout: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl WaitConfig {
    pub fn new(
        pending: &'static [&'static str],
        target: &'static [&'static str],
        timeout: Duration,
    ) -> Self {
        Self {
            pending,
            target,
            timeout,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    fn targets(&self) -> Vec<String> {
        self.target.iter().map(|s| s.to_string()).collect()
    }
}

/// Runs a poll session to completion.
///
/// The first refresh happens immediately. Between refreshes the session
/// sleeps for an interval that starts at the configured minimum and doubles
/// up to the maximum. Transient refresh errors count as a pending
/// observation; any other refresh error ends the session.
pub async fn wait<P: StatusPoller>(
    poller: &P,
    config: &WaitConfig,
) -> Result<Observation<P::Output>, WaitError> {
    let deadline = Instant::now() + config.timeout;
    let mut interval = config.min_interval;
    let mut last_status = String::from("<unknown>");

    loop {
        match poller.poll().await {
            Ok(observation) => {
                if config.target.contains(&observation.status.as_str()) {
                    return Ok(observation);
                }
                if !config.pending.contains(&observation.status.as_str()) {
                    return Err(WaitError::UnexpectedStatus {
                        status: observation.status,
                        target: config.targets(),
                    });
                }
                last_status = observation.status;
            }
            Err(err) if err.is_transient() => {
                log::debug!("transient refresh error, still waiting: {err}");
            }
            Err(err) => return Err(WaitError::Refresh(err)),
        }

        if Instant::now() >= deadline {
            return Err(WaitError::Timeout {
                target: config.targets(),
                last_status,
            });
        }

        sleep(interval).await;
        interval = (interval * 2).min(config.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Walks through a fixed status script, repeating the last entry once
    /// the script runs out.
    struct ScriptedPoller {
        statuses: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedPoller {
        fn new(statuses: Vec<&'static str>) -> Self {
            Self {
                statuses,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusPoller for ScriptedPoller {
        type Output = &'static str;

        async fn poll(&self) -> ProviderResult<Observation<&'static str>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.statuses[call.min(self.statuses.len() - 1)];
            Ok(Observation {
                status: status.to_string(),
                payload: Some(status),
            })
        }
    }

    /// Fails with transient errors a fixed number of times, then succeeds.
    struct FlakyPoller {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusPoller for FlakyPoller {
        type Output = ();

        async fn poll(&self) -> ProviderResult<Observation<()>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ProviderError::new("not propagated yet").transient())
            } else {
                Ok(Observation {
                    status: "VALID".to_string(),
                    payload: Some(()),
                })
            }
        }
    }

    fn quick(pending: &'static [&'static str], target: &'static [&'static str]) -> WaitConfig {
        WaitConfig::new(pending, target, Duration::from_millis(200))
            .with_min_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn target_on_first_poll_succeeds_without_sleeping() {
        let poller = ScriptedPoller::new(vec!["VALID"]);
        // A ten second interval would blow well past the test timeout if the
        // loop slept before checking the target set.
        let config = WaitConfig::new(&["CREATING"], &["VALID"], Duration::from_secs(1))
            .with_min_interval(Duration::from_secs(10));

        let started = std::time::Instant::now();
        let observation = wait(&poller, &config).await.unwrap();

        assert_eq!(observation.status, "VALID");
        assert_eq!(poller.calls(), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn always_pending_times_out_with_last_status() {
        let poller = ScriptedPoller::new(vec!["CREATING"]);
        let config = WaitConfig::new(&["CREATING"], &["VALID"], Duration::from_millis(50))
            .with_min_interval(Duration::from_millis(10));

        let started = std::time::Instant::now();
        let err = wait(&poller, &config).await.unwrap_err();

        match err {
            WaitError::Timeout { last_status, .. } => assert_eq!(last_status, "CREATING"),
            other => panic!("expected timeout, got {other}"),
        }
        // Must fail no later than timeout plus one extra poll interval
        // (plus scheduling slack).
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn status_outside_both_sets_is_an_unexpected_terminal() {
        let poller = ScriptedPoller::new(vec!["INVALID"]);
        let err = wait(&poller, &quick(&["CREATING"], &["VALID"])).await.unwrap_err();

        match err {
            WaitError::UnexpectedStatus { status, .. } => assert_eq!(status, "INVALID"),
            other => panic!("expected unexpected status, got {other}"),
        }
        assert_eq!(poller.calls(), 1);
    }

    #[tokio::test]
    async fn create_succeeds_after_three_creating_polls() {
        let poller = ScriptedPoller::new(vec!["CREATING", "CREATING", "CREATING", "VALID"]);
        let observation = wait(&poller, &quick(&["CREATING"], &["VALID"])).await.unwrap();

        assert_eq!(observation.status, "VALID");
        assert_eq!(observation.payload, Some("VALID"));
        assert_eq!(poller.calls(), 4);
    }

    #[tokio::test]
    async fn delete_poll_reports_gone_as_terminal_success() {
        let poller = ScriptedPoller::new(vec!["DELETING", "DELETING", "DELETED"]);
        let observation = wait(&poller, &quick(&["DELETING"], &["DELETED"])).await.unwrap();
        assert_eq!(observation.status, "DELETED");
    }

    #[tokio::test]
    async fn transient_refresh_errors_count_as_pending() {
        let poller = FlakyPoller {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let observation = wait(&poller, &quick(&["CREATING"], &["VALID"])).await.unwrap();
        assert_eq!(observation.status, "VALID");
        assert_eq!(poller.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_refresh_error_fails_immediately() {
        struct BrokenPoller;

        #[async_trait]
        impl StatusPoller for BrokenPoller {
            type Output = ();

            async fn poll(&self) -> ProviderResult<Observation<()>> {
                Err(ProviderError::new("access denied"))
            }
        }

        let err = wait(&BrokenPoller, &quick(&["CREATING"], &["VALID"])).await.unwrap_err();
        assert!(matches!(err, WaitError::Refresh(_)));
    }
}
