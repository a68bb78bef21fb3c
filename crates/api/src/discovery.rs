//! Bounded polling of an analytics query for borrower addresses.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dune::{ExecutionResults, ExecutionState};
use crate::error::DiscoveryError;

/// Asynchronous query execution API.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Submit a saved query; returns the execution id.
    async fn execute(&self, query_id: u64, performance: &str) -> Result<String, DiscoveryError>;

    /// Current state (and rows, once completed) of an execution.
    async fn results(&self, execution_id: &str) -> Result<ExecutionResults, DiscoveryError>;

    /// Cancel a running execution.
    async fn cancel(&self, execution_id: &str) -> Result<(), DiscoveryError>;
}

/// Wait budget for one discovery.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between result polls
    pub poll_interval: Duration,
    /// Give up (and cancel the execution) after this long
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Run `query_id` and poll until it completes, fails, times out or is
/// cancelled. Returns the string values of `column`.
pub async fn discover_addresses<Q: QueryApi + ?Sized>(
    api: &Q,
    query_id: u64,
    performance: &str,
    column: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<String>, DiscoveryError> {
    let execution_id = api.execute(query_id, performance).await?;
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        let results = api.results(&execution_id).await?;
        polls += 1;

        match results.state {
            ExecutionState::Completed => {
                let addresses = results.column_strings(column)?;
                info!(
                    query_id = query_id,
                    polls = polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    addresses = addresses.len(),
                    "Address discovery completed"
                );
                return Ok(addresses);
            }
            state if state.is_failure() => {
                warn!(query_id = query_id, state = ?state, "Address discovery query failed");
                return Err(DiscoveryError::QueryFailed { state });
            }
            state => {
                debug!(execution_id = %execution_id, state = ?state, polls = polls, "Query not ready");
            }
        }

        let waited = started.elapsed();
        if waited >= policy.max_wait {
            cancel_quietly(api, &execution_id).await;
            return Err(DiscoveryError::Timeout { waited });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                cancel_quietly(api, &execution_id).await;
                return Err(DiscoveryError::Cancelled);
            }
            _ = sleep(policy.poll_interval) => {}
        }
    }
}

async fn cancel_quietly<Q: QueryApi + ?Sized>(api: &Q, execution_id: &str) {
    if let Err(e) = api.cancel(execution_id).await {
        warn!(execution_id = %execution_id, error = %e, "Failed to cancel query execution");
    }
}

/// Something that yields the current borrower address set.
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<String>, DiscoveryError>;
}

/// [`AddressSource`] backed by a saved analytics query.
#[derive(Debug, Clone)]
pub struct QueryAddressSource<Q> {
    api: Q,
    query_id: u64,
    performance: String,
    column: String,
    policy: PollPolicy,
}

impl<Q: QueryApi> QueryAddressSource<Q> {
    /// Discover from `query_id`, reading the `address` column.
    pub fn new(api: Q, query_id: u64, policy: PollPolicy) -> Self {
        Self {
            api,
            query_id,
            performance: "medium".to_string(),
            column: "address".to_string(),
            policy,
        }
    }

    /// Set the engine size ("medium", "large").
    pub fn with_performance(mut self, performance: impl Into<String>) -> Self {
        self.performance = performance.into();
        self
    }
}

#[async_trait]
impl<Q: QueryApi> AddressSource for QueryAddressSource<Q> {
    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<String>, DiscoveryError> {
        discover_addresses(
            &self.api,
            self.query_id,
            &self.performance,
            &self.column,
            &self.policy,
            cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dune::ResultSet;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed sequence of states, repeating the last one.
    struct ScriptedApi {
        states: Mutex<VecDeque<ExecutionState>>,
        cancels: AtomicU32,
    }

    impl ScriptedApi {
        fn new(states: &[ExecutionState]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                cancels: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QueryApi for ScriptedApi {
        async fn execute(&self, _query_id: u64, _performance: &str) -> Result<String, DiscoveryError> {
            Ok("exec-1".to_string())
        }

        async fn results(&self, execution_id: &str) -> Result<ExecutionResults, DiscoveryError> {
            let state = {
                let mut states = self.states.lock();
                if states.len() > 1 {
                    states.pop_front().unwrap()
                } else {
                    *states.front().unwrap()
                }
            };

            let result = (state == ExecutionState::Completed).then(|| ResultSet {
                rows: vec![
                    serde_json::json!({"address": "0x1111111111111111111111111111111111111111"})
                        .as_object()
                        .unwrap()
                        .clone(),
                    serde_json::json!({"address": "0x2222222222222222222222222222222222222222"})
                        .as_object()
                        .unwrap()
                        .clone(),
                ],
            });

            Ok(ExecutionResults {
                execution_id: execution_id.to_string(),
                state,
                result,
            })
        }

        async fn cancel(&self, _execution_id: &str) -> Result<(), DiscoveryError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_completes_after_pending() {
        let api = ScriptedApi::new(&[
            ExecutionState::Pending,
            ExecutionState::Executing,
            ExecutionState::Completed,
        ]);

        let addresses = discover_addresses(
            &api,
            1,
            "medium",
            "address",
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(addresses.len(), 2);
        assert_eq!(api.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_state_stops_polling() {
        let api = ScriptedApi::new(&[ExecutionState::Pending, ExecutionState::Failed]);

        let err = discover_addresses(
            &api,
            1,
            "medium",
            "address",
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::QueryFailed {
                state: ExecutionState::Failed
            }
        ));
    }

    #[tokio::test]
    async fn test_partial_result_stops_polling() {
        let api = ScriptedApi::new(&[ExecutionState::Executing, ExecutionState::CompletedPartial]);
        let policy = PollPolicy {
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(600),
        };

        let err = discover_addresses(&api, 1, "medium", "address", &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::QueryFailed {
                state: ExecutionState::CompletedPartial
            }
        ));
        // Finished on its own, nothing to cancel
        assert_eq!(api.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_cancels_execution() {
        let api = ScriptedApi::new(&[ExecutionState::Executing]);
        let policy = PollPolicy {
            poll_interval: Duration::from_millis(2),
            max_wait: Duration::from_millis(20),
        };

        let err = discover_addresses(
            &api,
            1,
            "medium",
            "address",
            &policy,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            DiscoveryError::Timeout { waited } => assert!(waited >= policy.max_wait),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let api = ScriptedApi::new(&[ExecutionState::Pending]);
        let policy = PollPolicy {
            poll_interval: Duration::from_secs(60),
            max_wait: Duration::from_secs(600),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = discover_addresses(&api, 1, "medium", "address", &policy, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Cancelled));
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_address_source() {
        let api = ScriptedApi::new(&[ExecutionState::Completed]);
        let source = QueryAddressSource::new(api, 7, fast_policy()).with_performance("large");

        let addresses = source.discover(&CancellationToken::new()).await.unwrap();
        assert_eq!(addresses[1], "0x2222222222222222222222222222222222222222");
    }
}
