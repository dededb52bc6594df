// src/endpoint_pool.rs

use crate::errors::{AggregatorError, AggregatorResult};
use crate::multicall::{AggregatorClient, MiddlewareClient};
use ethers::prelude::{Http, Provider};
use log::{info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a cooldown whose deadline would not fit in an `Instant`.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// One RPC endpoint in the pool.
///
/// Priority is the endpoint's position in the pool. The cooldown deadline is the
/// only mutable state and is always read and written under its own lock.
pub struct Endpoint {
    url: String,
    client: Arc<dyn AggregatorClient>,
    cooldown_until: Mutex<Option<Instant>>,
    attempts: AtomicUsize,
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, client: Arc<dyn AggregatorClient>) -> Self {
        Self {
            url: url.into(),
            client,
            cooldown_until: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            successes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> &Arc<dyn AggregatorClient> {
        &self.client
    }

    /// Remaining cooldown at `now`, or `None` when the endpoint is eligible.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let guard = self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.cooldown_remaining(now).is_none()
    }

    /// Puts the endpoint in cooldown until `now + duration`.
    ///
    /// An existing later deadline set by a concurrent caller is kept. Returns the
    /// effective deadline.
    pub fn start_cooldown(&self, now: Instant, duration: Duration) -> Instant {
        let mut guard = self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        let until = now
            .checked_add(duration)
            .or_else(|| now.checked_add(MAX_COOLDOWN))
            .unwrap_or(now);
        let effective = match *guard {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        *guard = Some(effective);
        effective
    }

    pub fn clear_cooldown(&self) {
        let mut guard = self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, now: Instant) -> EndpointSnapshot {
        EndpointSnapshot {
            url: self.url.clone(),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cooldown_remaining: self.cooldown_remaining(now),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("attempts", &self.attempts())
            .finish()
    }
}

/// Point-in-time health view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub url: String,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub cooldown_remaining: Option<Duration>,
}

/// Ordered pool of interchangeable RPC endpoints.
///
/// Endpoints are created once and never removed; unhealthy ones are only skipped
/// while their cooldown runs.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> AggregatorResult<Self> {
        if endpoints.is_empty() {
            return Err(AggregatorError::Configuration(
                "endpoint pool needs at least one RPC endpoint".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    /// Builds a pool of `Provider<Http>` clients, preserving the configured order.
    ///
    /// URLs that cannot be turned into a provider are skipped with a warning.
    pub fn from_http_urls(urls: &[String]) -> AggregatorResult<Self> {
        let endpoints: Vec<Endpoint> = urls
            .iter()
            .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let client = MiddlewareClient::new(Arc::new(provider), url.clone());
                    Some(Endpoint::new(url.clone(), Arc::new(client)))
                }
                Err(e) => {
                    warn!("Skipping invalid RPC endpoint {}: {}", url, e);
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return Err(AggregatorError::Configuration(
                "No valid RPC endpoints could be created".to_string(),
            ));
        }

        info!("Endpoint pool created with {} RPC endpoints", endpoints.len());
        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    pub fn find(&self, url: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.url == url)
    }

    pub fn eligible_count(&self, now: Instant) -> usize {
        self.endpoints.iter().filter(|e| e.is_eligible(now)).count()
    }

    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        self.endpoints.iter().map(|e| e.snapshot(now)).collect()
    }
}
