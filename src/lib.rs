//! # Balance Aggregator SDK
//!
//! Batched, failure-tolerant token balance queries over a pool of JSON-RPC
//! endpoints. Many `balanceOf`-style view calls are packed into a single
//! Multicall3 `tryAggregate` request, split into size-bounded batches, and sent
//! through an invoker that retries, cools down failing endpoints and fails over
//! to the next endpoint in preference order.
//!
//! ## Architecture
//!
//! ### Call Layer
//! Encodes logical calls ([`encoder`]), splits them into batches ([`batch`]) and
//! decodes the aggregator's positional results back onto their keys ([`decoder`]).
//!
//! ### Transport Layer
//! The Multicall3 wire format and the [`multicall::AggregatorClient`] seam
//! ([`multicall`]), the ordered endpoint list with per-endpoint cooldowns
//! ([`endpoint_pool`]) and the retry/failover loop ([`invoker`]).
//!
//! ### Balance Layer
//! Per-token and wrapper balance queries, merging and dust filtering
//! ([`balances`]), owned-token refresh for watched wallets ([`holdings`]) and the
//! public token listing ([`token_registry`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use balance_aggregator_sdk::{
//!     BalanceService, BalanceServiceConfig, EndpointPool, InvokerPolicy, ResilientInvoker, Settings,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::new()?;
//! settings.validate()?;
//!
//! let pool = EndpointPool::from_http_urls(&settings.rpc.http_urls)?;
//! let invoker = ResilientInvoker::new(
//!     pool,
//!     settings.contracts.multicall_address()?,
//!     InvokerPolicy::interactive(),
//! );
//! let service = BalanceService::new(
//!     Arc::new(invoker),
//!     BalanceServiceConfig::new(settings.contracts.wrapper_address()?),
//! )?;
//!
//! let wallet = balance_aggregator_sdk::encoder::parse_address("0x0101010101010101010101010101010101010101")?;
//! let balances = service.get_wrapper_balances(&[wallet]).await?;
//! println!("{:?}", balances);
//! # Ok(())
//! # }
//! ```

// Call Layer
/// Logical call encoding
pub mod encoder;
/// Batch splitting
pub mod batch;
/// Positional result decoding
pub mod decoder;
/// Function descriptors and well-known addresses
pub mod contracts;

// Transport Layer
/// Multicall3 wire format and client seam
pub mod multicall;
/// Ordered RPC endpoints with cooldowns
pub mod endpoint_pool;
/// Retry, cooldown and failover
pub mod invoker;

// Balance Layer
/// Balance queries and merging
pub mod balances;
/// Owned-token refresh
pub mod holdings;
/// Token listing client
pub mod token_registry;

// Infrastructure
pub mod errors;
pub mod metrics;
pub mod settings;

pub use balances::{merge_balances, BalanceMap, BalanceQuery, BalanceService, BalanceServiceConfig};
pub use endpoint_pool::{Endpoint, EndpointPool, EndpointSnapshot};
pub use errors::{AggregatorError, AggregatorResult};
pub use holdings::{owned_tokens, HoldingsRefresher};
pub use invoker::{InvokerPolicy, ResilientInvoker};
pub use multicall::{AggregatorClient, Call, CallOutcome, MiddlewareClient};
pub use settings::Settings;
