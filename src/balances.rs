//! # Balance Aggregation Service
//!
//! Composes encoder, splitter, invoker and decoder into the two logical balance
//! queries:
//!
//! - [`BalanceQuery::Tokens`]: `balanceOf(user)` on every token for every user.
//! - [`BalanceQuery::Wrapper`]: `getAllTokenBalancesOfUser(user)` on the wrapper, once per user.
//!
//! Each query is split into batches of at most `max_per_batch` sub-calls; every
//! batch goes through the [`ResilientInvoker`] and is decoded back onto its
//! logical keys. A short fixed pause separates consecutive batches so the shared
//! aggregator endpoint is not hammered.
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn run(service: balance_aggregator_sdk::balances::BalanceService,
//! #              users: Vec<ethers::types::Address>,
//! #              tokens: Vec<ethers::types::Address>) -> anyhow::Result<()> {
//! use balance_aggregator_sdk::balances::{merge_balances, BalanceQuery};
//! use ethers::types::U256;
//!
//! let per_token = service.get_balances(&users, &BalanceQuery::Tokens(tokens), 2600).await?;
//! let wrapped = service.get_balances(&users, &BalanceQuery::Wrapper, 800).await?;
//! let merged = merge_balances([&per_token, &wrapped], U256::exp10(13));
//! # Ok(()) }
//! ```

use crate::batch::{batch_count, split_batches};
use crate::contracts::{erc20, token_wrapper};
use crate::decoder::{decode_batch, DecodeShape, TokenBalancesShape, Uint256Shape};
use crate::encoder::{balance_of_calls, wrapper_calls, PreparedCall};
use crate::errors::AggregatorResult;
use crate::invoker::{InvokerPolicy, ResilientInvoker};
use ethers::abi::Function;
use ethers::types::{Address, U256};
use indexmap::IndexMap;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Raw balances per token (smallest unit).
pub type TokenBalances = IndexMap<Address, U256>;

/// user -> token -> raw balance. Every queried user is present, possibly with no tokens.
pub type BalanceMap = IndexMap<Address, TokenBalances>;

/// Which call shape answers the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceQuery {
    /// `balanceOf(user)` on each of these tokens.
    Tokens(Vec<Address>),
    /// `getAllTokenBalancesOfUser(user)` on the wrapper contract.
    Wrapper,
}

impl BalanceQuery {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tokens(_) => "balance_of",
            Self::Wrapper => "wrapper",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalanceServiceConfig {
    pub wrapper_address: Address,
    pub max_subcalls_balance_of: usize,
    pub max_subcalls_wrapper: usize,
    pub inter_batch_pause: Duration,
}

impl BalanceServiceConfig {
    pub fn new(wrapper_address: Address) -> Self {
        Self {
            wrapper_address,
            max_subcalls_balance_of: 2600,
            max_subcalls_wrapper: 800,
            inter_batch_pause: Duration::from_millis(500),
        }
    }
}

/// Answers balance queries through a shared [`ResilientInvoker`].
#[derive(Debug, Clone)]
pub struct BalanceService {
    invoker: Arc<ResilientInvoker>,
    policy: InvokerPolicy,
    config: BalanceServiceConfig,
    balance_of: Function,
    get_all_balances: Function,
}

impl BalanceService {
    /// Uses the invoker's default policy for every batch.
    pub fn new(invoker: Arc<ResilientInvoker>, config: BalanceServiceConfig) -> AggregatorResult<Self> {
        let policy = invoker.policy().clone();
        Ok(Self {
            invoker,
            policy,
            config,
            balance_of: erc20::balance_of()?,
            get_all_balances: token_wrapper::get_all_token_balances_of_user()?,
        })
    }

    /// Same pool, different retry tuning (e.g. interactive vs background).
    pub fn with_policy(mut self, policy: InvokerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &InvokerPolicy {
        &self.policy
    }

    pub fn config(&self) -> &BalanceServiceConfig {
        &self.config
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    /// Runs `query` for `users` in batches of at most `max_per_batch` sub-calls.
    pub async fn get_balances(
        &self,
        users: &[Address],
        query: &BalanceQuery,
        max_per_batch: usize,
    ) -> AggregatorResult<BalanceMap> {
        let mut result = empty_balance_map(users);

        match query {
            BalanceQuery::Tokens(tokens) => {
                let calls = balance_of_calls(&self.balance_of, users, tokens)?;
                self.run_batches::<_, Uint256Shape, _>(
                    query.name(),
                    &calls,
                    max_per_batch,
                    |(user, token), balance| {
                        result.entry(user).or_default().insert(token, balance);
                    },
                )
                .await?;
            }
            BalanceQuery::Wrapper => {
                let calls = wrapper_calls(&self.get_all_balances, self.config.wrapper_address, users)?;
                self.run_batches::<_, TokenBalancesShape, _>(
                    query.name(),
                    &calls,
                    max_per_batch,
                    |user, balances| {
                        let entry = result.entry(user).or_default();
                        for (token, balance) in balances {
                            if !balance.is_zero() {
                                entry.insert(token, balance);
                            }
                        }
                    },
                )
                .await?;
            }
        }

        Ok(result)
    }

    /// `balanceOf` for every (user, token) pair with the configured batch size.
    ///
    /// Every attempted pair is recorded, zero balances included.
    pub async fn get_token_balances(
        &self,
        users: &[Address],
        tokens: &[Address],
    ) -> AggregatorResult<BalanceMap> {
        self.get_balances(
            users,
            &BalanceQuery::Tokens(tokens.to_vec()),
            self.config.max_subcalls_balance_of,
        )
        .await
    }

    /// Wrapper balances with the configured batch size. Only positive balances are kept.
    pub async fn get_wrapper_balances(&self, users: &[Address]) -> AggregatorResult<BalanceMap> {
        self.get_balances(users, &BalanceQuery::Wrapper, self.config.max_subcalls_wrapper)
            .await
    }

    async fn run_batches<K, S, F>(
        &self,
        label: &str,
        calls: &[PreparedCall<K>],
        max_per_batch: usize,
        mut sink: F,
    ) -> AggregatorResult<()>
    where
        K: Clone,
        S: DecodeShape,
        F: FnMut(K, S::Output),
    {
        let batches = split_batches(calls, max_per_batch)?;
        let total = batch_count(calls.len(), max_per_batch);
        if total == 0 {
            return Ok(());
        }
        info!(
            "[balances] {}: {} sub-calls in {} batches (max {} per batch)",
            label,
            calls.len(),
            total,
            max_per_batch
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.config.inter_batch_pause.is_zero() {
                tokio::time::sleep(self.config.inter_batch_pause).await;
            }

            let wire_calls: Vec<_> = batch.iter().map(PreparedCall::to_call).collect();
            let outcomes = self.invoker.invoke_with(&self.policy, &wire_calls).await?;

            for (key, value) in decode_batch::<K, S>(batch, &outcomes)? {
                sink(key, value);
            }
            debug!(
                "[balances] {}: batch {}/{} decoded ({} sub-calls)",
                label,
                index + 1,
                total,
                batch.len()
            );
        }

        Ok(())
    }
}

/// A map with an empty entry for every user, in input order.
pub fn empty_balance_map(users: &[Address]) -> BalanceMap {
    users.iter().map(|&user| (user, TokenBalances::new())).collect()
}

/// Sums balances per (user, token) across `maps`, then drops entries below `threshold`.
///
/// A zero threshold disables filtering. Users are always kept, even when all of
/// their balances are filtered out. Inputs are not modified.
pub fn merge_balances<'a, I>(maps: I, threshold: U256) -> BalanceMap
where
    I: IntoIterator<Item = &'a BalanceMap>,
{
    let mut merged = BalanceMap::new();

    for map in maps {
        for (user, balances) in map {
            let dest = merged.entry(*user).or_default();
            for (token, amount) in balances {
                let slot = dest.entry(*token).or_insert_with(U256::zero);
                *slot = slot.saturating_add(*amount);
            }
        }
    }

    if !threshold.is_zero() {
        for balances in merged.values_mut() {
            balances.retain(|_, amount| *amount >= threshold);
        }
    }

    merged
}
