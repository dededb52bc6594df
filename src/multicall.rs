use crate::errors::{AggregatorError, AggregatorResult};
use crate::metrics;
use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::providers::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest};
use log::debug;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Instant;

/// A single sub-call to be batched in a `tryAggregate` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    /// Target contract address
    pub target: Address,
    /// Encoded function call data
    pub call_data: Bytes,
}

/// Per-call result returned by the aggregator, positionally aligned with the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

impl CallOutcome {
    pub fn success(return_data: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            return_data: return_data.into(),
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }
}

fn call_tuple_type() -> ParamType {
    ParamType::Tuple(vec![ParamType::Address, ParamType::Bytes])
}

fn result_tuple_type() -> ParamType {
    ParamType::Tuple(vec![ParamType::Bool, ParamType::Bytes])
}

static TRY_AGGREGATE: Lazy<Function> = Lazy::new(try_aggregate_function);

/// Multicall3 `tryAggregate(bool requireSuccess, Call[] calls) returns (Result[] returnData)`.
#[allow(deprecated)]
pub fn try_aggregate_function() -> Function {
    Function {
        name: "tryAggregate".to_string(),
        inputs: vec![
            Param {
                name: "requireSuccess".to_string(),
                kind: ParamType::Bool,
                internal_type: None,
            },
            Param {
                name: "calls".to_string(),
                kind: ParamType::Array(Box::new(call_tuple_type())),
                internal_type: None,
            },
        ],
        outputs: vec![Param {
            name: "returnData".to_string(),
            kind: ParamType::Array(Box::new(result_tuple_type())),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// Encodes a batch as `tryAggregate(false, calls)`.
///
/// `requireSuccess` is always `false` so a reverting sub-call cannot abort the batch.
pub fn encode_try_aggregate(calls: &[Call]) -> Result<Bytes> {
    let call_tokens = calls
        .iter()
        .map(|call| {
            Token::Tuple(vec![
                Token::Address(call.target),
                Token::Bytes(call.call_data.to_vec()),
            ])
        })
        .collect();

    let calldata =
        TRY_AGGREGATE.encode_input(&[Token::Bool(false), Token::Array(call_tokens)])?;
    Ok(Bytes::from(calldata))
}

/// Decodes the `(bool success, bytes returnData)[]` response of `tryAggregate`.
pub fn decode_try_aggregate(response: &[u8]) -> Result<Vec<CallOutcome>> {
    let decoded = ethers::abi::decode(&[ParamType::Array(Box::new(result_tuple_type()))], response)?;

    let results_array = decoded
        .into_iter()
        .next()
        .and_then(|t| t.into_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid tryAggregate response format"))?;

    let mut outcomes = Vec::with_capacity(results_array.len());
    for result_token in results_array {
        match result_token {
            Token::Tuple(tuple) => match tuple.as_slice() {
                [Token::Bool(success), Token::Bytes(data)] => outcomes.push(CallOutcome {
                    success: *success,
                    return_data: Bytes::from(data.clone()),
                }),
                other => anyhow::bail!("Unexpected tryAggregate result tuple: {:?}", other),
            },
            other => anyhow::bail!("Unexpected tryAggregate result token: {:?}", other),
        }
    }

    Ok(outcomes)
}

/// One wire round trip against an aggregator contract.
///
/// Implemented by [`MiddlewareClient`] for real endpoints; the endpoint pool only
/// talks to this trait so tests can substitute an in-memory aggregator.
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    async fn try_aggregate(
        &self,
        aggregator: Address,
        calls: &[Call],
    ) -> AggregatorResult<Vec<CallOutcome>>;
}

/// `AggregatorClient` backed by an ethers middleware (`eth_call` at latest block).
#[derive(Debug, Clone)]
pub struct MiddlewareClient<M: Middleware> {
    provider: Arc<M>,
    endpoint: String,
}

impl<M: Middleware + 'static> MiddlewareClient<M> {
    pub fn new(provider: Arc<M>, endpoint: impl Into<String>) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
        }
    }

    pub fn provider(&self) -> &Arc<M> {
        &self.provider
    }
}

#[async_trait]
impl<M: Middleware + 'static> AggregatorClient for MiddlewareClient<M> {
    async fn try_aggregate(
        &self,
        aggregator: Address,
        calls: &[Call],
    ) -> AggregatorResult<Vec<CallOutcome>> {
        let calldata = encode_try_aggregate(calls)
            .map_err(|e| AggregatorError::Encoding(format!("tryAggregate encoding failed: {}", e)))?;

        let tx_request = TransactionRequest::new().to(aggregator).data(calldata);
        let typed_tx: TypedTransaction = tx_request.into();

        let start = Instant::now();
        let response = self
            .provider
            .call(&typed_tx, None)
            .await
            .map_err(|e| AggregatorError::transport(&self.endpoint, e))?;
        let duration = start.elapsed();
        metrics::record_batch_latency(&self.endpoint, duration);

        debug!(
            "[RPC_TRACE] tryAggregate -> {}: calls={}, response_bytes={}, duration={:?}",
            self.endpoint,
            calls.len(),
            response.len(),
            duration
        );

        decode_try_aggregate(&response).map_err(|e| AggregatorError::transport(&self.endpoint, e))
    }
}
