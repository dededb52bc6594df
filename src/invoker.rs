//! # Resilient Invoker
//!
//! Executes one `tryAggregate` batch through the [`EndpointPool`] with retry,
//! sequential failover and per-endpoint cooldown.
//!
//! ## State machine
//!
//! ```text
//! SELECT_ENDPOINT -> ATTEMPT -> SUCCESS                      (return)
//!                            -> RETRY      (sleep retry_delay, same endpoint)
//!                            -> EXHAUSTED  (start cooldown, next endpoint)
//! no endpoint left           -> RESTART_CYCLE (sleep restart_delay) if restart_on_all_fail
//!                            -> FATAL (AllEndpointsFailed) otherwise
//! ```
//!
//! Endpoints are tried one at a time in pool order and never raced. Cooling
//! endpoints are skipped without being probed until their cooldown expires.
//!
//! With `restart_on_all_fail` the loop never gives up. Callers that need a
//! deadline wrap the future in `tokio::time::timeout`.

use crate::endpoint_pool::{Endpoint, EndpointPool};
use crate::errors::{AggregatorError, AggregatorResult};
use crate::metrics;
use crate::multicall::{Call, CallOutcome};
use ethers::types::Address;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Retry/failover tuning for one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerPolicy {
    /// Attempts on one endpoint before it is put in cooldown.
    pub attempts_per_endpoint: u32,
    /// Pause between attempts on the same endpoint.
    pub retry_delay: Duration,
    /// How long an exhausted endpoint is skipped.
    pub cooldown_duration: Duration,
    /// Restart from the first endpoint instead of failing when all are exhausted.
    pub restart_on_all_fail: bool,
    /// Pause before a restart cycle.
    pub restart_delay: Duration,
}

impl Default for InvokerPolicy {
    fn default() -> Self {
        Self {
            attempts_per_endpoint: 4,
            retry_delay: Duration::from_secs(2),
            cooldown_duration: Duration::from_secs(3 * 60 * 60),
            restart_on_all_fail: false,
            restart_delay: Duration::from_secs(120),
        }
    }
}

impl InvokerPolicy {
    /// Long-running background jobs: slow retries, never give up.
    pub fn background() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
            restart_on_all_fail: true,
            ..Self::default()
        }
    }

    /// User-triggered calls: short retries, fail once every endpoint is exhausted.
    pub fn interactive() -> Self {
        Self::default()
    }

    pub fn with_attempts_per_endpoint(mut self, attempts: u32) -> Self {
        self.attempts_per_endpoint = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_duration = cooldown;
        self
    }

    pub fn with_restart(mut self, restart_on_all_fail: bool, restart_delay: Duration) -> Self {
        self.restart_on_all_fail = restart_on_all_fail;
        self.restart_delay = restart_delay;
        self
    }
}

/// Owns the endpoint pool and runs batches against the aggregator contract.
///
/// Safe to share behind an `Arc` between concurrent logical calls: the only
/// shared mutable state is each endpoint's cooldown, which is guarded per endpoint.
#[derive(Debug)]
pub struct ResilientInvoker {
    pool: EndpointPool,
    aggregator: Address,
    policy: InvokerPolicy,
}

impl ResilientInvoker {
    pub fn new(pool: EndpointPool, aggregator: Address, policy: InvokerPolicy) -> Self {
        Self {
            pool,
            aggregator,
            policy,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn aggregator(&self) -> Address {
        self.aggregator
    }

    pub fn policy(&self) -> &InvokerPolicy {
        &self.policy
    }

    /// Runs `calls` as one batch with the invoker's default policy.
    pub async fn invoke(&self, calls: &[Call]) -> AggregatorResult<Vec<CallOutcome>> {
        self.invoke_with(&self.policy, calls).await
    }

    /// Runs `calls` as one batch with a per-call policy.
    ///
    /// Returns one outcome per call in submission order, or fails the whole batch.
    pub async fn invoke_with(
        &self,
        policy: &InvokerPolicy,
        calls: &[Call],
    ) -> AggregatorResult<Vec<CallOutcome>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let attempts_per_endpoint = policy.attempts_per_endpoint.max(1);
        metrics::record_batch_size(calls.len());

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let mut attempts_this_cycle = 0usize;

            for endpoint in self.pool.iter() {
                if let Some(remaining) = endpoint.cooldown_remaining(Instant::now()) {
                    info!(
                        "[invoker] Skipping RPC {} (cooling down, {:?} remaining)",
                        endpoint.url(),
                        remaining
                    );
                    continue;
                }
                metrics::set_endpoint_cooldown(endpoint.url(), false);

                match self
                    .try_endpoint(endpoint, policy, attempts_per_endpoint, calls)
                    .await
                {
                    Ok(outcomes) => return Ok(outcomes),
                    Err(e) if !e.is_retryable() => {
                        error!(
                            "[invoker] RPC {} rejected the batch with a non-retryable error: {}",
                            endpoint.url(),
                            e
                        );
                        return Err(e);
                    }
                    Err(last_error) => {
                        attempts_this_cycle += attempts_per_endpoint as usize;
                        endpoint.start_cooldown(Instant::now(), policy.cooldown_duration);
                        metrics::set_endpoint_cooldown(endpoint.url(), true);
                        info!(
                            "[invoker] RPC {} exhausted after {} attempts (last error: {}). Cooling down for {:?}, switching to next...",
                            endpoint.url(),
                            attempts_per_endpoint,
                            last_error,
                            policy.cooldown_duration
                        );
                    }
                }
            }

            if policy.restart_on_all_fail {
                metrics::increment_restart_cycle();
                error!(
                    "[invoker] All {} RPC endpoints failed or cooling down (cycle {}). Waiting {:?} before retrying from the first...",
                    self.pool.len(),
                    cycle,
                    policy.restart_delay
                );
                sleep(policy.restart_delay).await;
                continue;
            }

            metrics::increment_all_endpoints_failed();
            error!(
                "[invoker] All {} RPC endpoints failed for this call ({} attempts)",
                self.pool.len(),
                attempts_this_cycle
            );
            return Err(AggregatorError::AllEndpointsFailed {
                endpoints: self.pool.len(),
                attempts: attempts_this_cycle,
            });
        }
    }

    /// Up to `attempts` tries against one endpoint. Returns the last error when exhausted,
    /// or the first non-retryable error immediately.
    async fn try_endpoint(
        &self,
        endpoint: &Endpoint,
        policy: &InvokerPolicy,
        attempts: u32,
        calls: &[Call],
    ) -> Result<Vec<CallOutcome>, AggregatorError> {
        let mut last_error = AggregatorError::transport(endpoint.url(), "no attempt made");

        for attempt in 1..=attempts {
            endpoint.record_attempt();
            let result = endpoint
                .client()
                .try_aggregate(self.aggregator, calls)
                .await
                .and_then(|outcomes| {
                    if outcomes.len() == calls.len() {
                        Ok(outcomes)
                    } else {
                        Err(AggregatorError::MisalignedBatch {
                            expected: calls.len(),
                            actual: outcomes.len(),
                        })
                    }
                });

            match result {
                Ok(outcomes) => {
                    endpoint.record_success();
                    metrics::increment_attempt(endpoint.url(), true);
                    debug!(
                        "[invoker] RPC {} answered batch of {} calls (attempt {}/{})",
                        endpoint.url(),
                        calls.len(),
                        attempt,
                        attempts
                    );
                    return Ok(outcomes);
                }
                Err(e) => {
                    endpoint.record_failure();
                    metrics::increment_attempt(endpoint.url(), false);
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt < attempts {
                        warn!(
                            "[invoker] RPC {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                            endpoint.url(),
                            attempt,
                            attempts,
                            e,
                            policy.retry_delay
                        );
                        sleep(policy.retry_delay).await;
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicall::AggregatorClient;
    use async_trait::async_trait;
    use ethers::types::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted results, then keeps answering with the fallback.
    struct ScriptedClient {
        url: &'static str,
        script: Mutex<VecDeque<bool>>,
        fallback_ok: bool,
    }

    impl ScriptedClient {
        fn new(url: &'static str, script: &[bool], fallback_ok: bool) -> Arc<dyn AggregatorClient> {
            Arc::new(Self {
                url,
                script: Mutex::new(script.iter().copied().collect()),
                fallback_ok,
            })
        }
    }

    #[async_trait]
    impl AggregatorClient for ScriptedClient {
        async fn try_aggregate(
            &self,
            _aggregator: Address,
            calls: &[Call],
        ) -> AggregatorResult<Vec<CallOutcome>> {
            let ok = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback_ok);
            if ok {
                Ok(vec![CallOutcome::success(vec![1u8]); calls.len()])
            } else {
                Err(AggregatorError::transport(self.url, "connection refused"))
            }
        }
    }

    /// Rejects every batch as malformed input.
    struct RejectingClient;

    #[async_trait]
    impl AggregatorClient for RejectingClient {
        async fn try_aggregate(
            &self,
            _aggregator: Address,
            _calls: &[Call],
        ) -> AggregatorResult<Vec<CallOutcome>> {
            Err(AggregatorError::Encoding("bad input".to_string()))
        }
    }

    /// Answers with one result too few.
    struct TruncatingClient;

    #[async_trait]
    impl AggregatorClient for TruncatingClient {
        async fn try_aggregate(
            &self,
            _aggregator: Address,
            calls: &[Call],
        ) -> AggregatorResult<Vec<CallOutcome>> {
            Ok(vec![CallOutcome::failure(); calls.len().saturating_sub(1)])
        }
    }

    fn calls(n: usize) -> Vec<Call> {
        (0..n)
            .map(|i| Call {
                target: Address::from_low_u64_be(i as u64 + 1),
                call_data: Bytes::from(vec![i as u8]),
            })
            .collect()
    }

    fn invoker(
        clients: Vec<(&'static str, Arc<dyn AggregatorClient>)>,
        policy: InvokerPolicy,
    ) -> ResilientInvoker {
        let endpoints = clients
            .into_iter()
            .map(|(url, client)| Endpoint::new(url, client))
            .collect();
        ResilientInvoker::new(EndpointPool::new(endpoints).unwrap(), Address::zero(), policy)
    }

    fn fast_policy() -> InvokerPolicy {
        InvokerPolicy::interactive()
            .with_attempts_per_endpoint(3)
            .with_retry_delay(Duration::from_millis(10))
            .with_cooldown(Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_endpoint_stops_there() {
        let inv = invoker(
            vec![
                ("a", ScriptedClient::new("a", &[], true)),
                ("b", ScriptedClient::new("b", &[], true)),
            ],
            fast_policy(),
        );
        let outcomes = inv.invoke(&calls(4)).await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 1);
        assert_eq!(inv.pool().get(1).unwrap().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_same_endpoint_before_switching() {
        let inv = invoker(
            vec![
                ("a", ScriptedClient::new("a", &[false, false, true], false)),
                ("b", ScriptedClient::new("b", &[], true)),
            ],
            fast_policy(),
        );
        let started = Instant::now();
        inv.invoke(&calls(2)).await.unwrap();

        assert_eq!(inv.pool().get(0).unwrap().attempts(), 3);
        assert_eq!(inv.pool().get(1).unwrap().attempts(), 0);
        // two retry sleeps on the same endpoint
        assert_eq!(started.elapsed(), Duration::from_millis(20));
        assert!(inv.pool().get(0).unwrap().is_eligible(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_endpoint_cools_down_and_is_skipped() {
        let policy = fast_policy();
        let inv = invoker(
            vec![
                ("a", ScriptedClient::new("a", &[], false)),
                ("b", ScriptedClient::new("b", &[], true)),
            ],
            policy.clone(),
        );

        inv.invoke(&calls(1)).await.unwrap();
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 3);
        assert_eq!(inv.pool().get(1).unwrap().attempts(), 1);

        // inside the cooldown window: "a" is not probed at all
        tokio::time::advance(Duration::from_secs(60)).await;
        inv.invoke(&calls(1)).await.unwrap();
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 3);
        assert_eq!(inv.pool().get(1).unwrap().attempts(), 2);

        // after the cooldown: "a" is tried again first
        tokio::time::advance(policy.cooldown_duration).await;
        inv.invoke(&calls(1)).await.unwrap();
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_endpoints_failed_without_restart() {
        let inv = invoker(
            vec![
                ("a", ScriptedClient::new("a", &[], false)),
                ("b", ScriptedClient::new("b", &[], false)),
            ],
            fast_policy(),
        );
        let err = inv.invoke(&calls(1)).await.unwrap_err();
        assert_eq!(
            err,
            AggregatorError::AllEndpointsFailed {
                endpoints: 2,
                attempts: 6
            }
        );

        // everything is cooling now: the next call fails without any attempt
        let err = inv.invoke(&calls(1)).await.unwrap_err();
        assert_eq!(
            err,
            AggregatorError::AllEndpointsFailed {
                endpoints: 2,
                attempts: 0
            }
        );
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cycle_waits_for_cooldown_expiry() {
        let policy = fast_policy()
            .with_attempts_per_endpoint(1)
            .with_cooldown(Duration::from_secs(300))
            .with_restart(true, Duration::from_secs(120));
        // "a" fails once then recovers
        let inv = invoker(
            vec![("a", ScriptedClient::new("a", &[false], true))],
            policy,
        );

        let started = Instant::now();
        inv.invoke(&calls(1)).await.unwrap();

        // restarts at 120s and 240s find "a" cooling; the one at 360s retries it
        assert_eq!(started.elapsed(), Duration::from_secs(360));
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_response_counts_as_failed_attempt() {
        let inv = invoker(
            vec![
                ("a", Arc::new(TruncatingClient) as Arc<dyn AggregatorClient>),
                ("b", ScriptedClient::new("b", &[], true)),
            ],
            fast_policy(),
        );
        let outcomes = inv.invoke(&calls(5)).await.unwrap();
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(inv.pool().snapshot()[0].failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoding_error_is_surfaced_without_retry_or_cooldown() {
        let inv = invoker(
            vec![
                ("a", Arc::new(RejectingClient) as Arc<dyn AggregatorClient>),
                ("b", ScriptedClient::new("b", &[], true)),
            ],
            InvokerPolicy::interactive(),
        );

        let started = Instant::now();
        let err = inv.invoke(&calls(2)).await.unwrap_err();
        assert_eq!(err, AggregatorError::Encoding("bad input".to_string()));

        let a = inv.pool().get(0).unwrap();
        assert_eq!(a.attempts(), 1);
        assert!(a.is_eligible(Instant::now()));
        assert_eq!(inv.pool().get(1).unwrap().attempts(), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let inv = invoker(vec![("a", ScriptedClient::new("a", &[], false))], fast_policy());
        assert!(inv.invoke(&[]).await.unwrap().is_empty());
        assert_eq!(inv.pool().get(0).unwrap().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_timeout_bounds_restart_loop() {
        let policy = fast_policy().with_restart(true, Duration::from_secs(30));
        let inv = invoker(vec![("a", ScriptedClient::new("a", &[], false))], policy);

        let result = tokio::time::timeout(Duration::from_secs(600), inv.invoke(&calls(1))).await;
        assert!(result.is_err());
    }
}
