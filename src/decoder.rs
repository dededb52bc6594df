//! # Result Decoder
//!
//! Maps the aggregator's positional `(success, returnData)` outcomes back to the
//! logical keys of the submitted calls.
//!
//! A failed or empty sub-call yields the shape's zero value. A sub-call that
//! reports success but returns bytes that do not fit the expected shape is logged
//! as a decode anomaly and also yields the zero value, so a single corrupt
//! response never aborts the batch.

use crate::encoder::PreparedCall;
use crate::errors::{AggregatorError, AggregatorResult};
use crate::metrics;
use crate::multicall::CallOutcome;
use anyhow::Result;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use log::warn;

/// Expected shape of a sub-call's return data.
pub trait DecodeShape {
    type Output: Default;

    /// Short label used in logs and metrics.
    const NAME: &'static str;

    fn decode(data: &[u8]) -> Result<Self::Output>;
}

/// A single `uint256`.
///
/// Payloads of up to 32 bytes are read as a big-endian integer; longer payloads
/// are ABI-decoded and must start with a `uint256` word.
#[derive(Debug, Clone, Copy)]
pub struct Uint256Shape;

impl DecodeShape for Uint256Shape {
    type Output = U256;
    const NAME: &'static str = "uint256";

    fn decode(data: &[u8]) -> Result<U256> {
        if data.len() <= 32 {
            return Ok(U256::from_big_endian(data));
        }
        let tokens = ethers::abi::decode(&[ParamType::Uint(256)], data)?;
        tokens
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| anyhow::anyhow!("missing uint256 word"))
    }
}

/// Parallel `(address[], uint256[])` arrays, zipped into pairs.
#[derive(Debug, Clone, Copy)]
pub struct TokenBalancesShape;

impl DecodeShape for TokenBalancesShape {
    type Output = Vec<(Address, U256)>;
    const NAME: &'static str = "address_uint256_arrays";

    fn decode(data: &[u8]) -> Result<Vec<(Address, U256)>> {
        let tokens = ethers::abi::decode(
            &[
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::Array(Box::new(ParamType::Uint(256))),
            ],
            data,
        )?;
        let mut iter = tokens.into_iter();
        let addresses = iter
            .next()
            .and_then(Token::into_array)
            .ok_or_else(|| anyhow::anyhow!("missing address[]"))?;
        let balances = iter
            .next()
            .and_then(Token::into_array)
            .ok_or_else(|| anyhow::anyhow!("missing uint256[]"))?;

        if addresses.len() != balances.len() {
            anyhow::bail!(
                "array length mismatch: {} addresses vs {} balances",
                addresses.len(),
                balances.len()
            );
        }

        addresses
            .into_iter()
            .zip(balances)
            .map(|(a, b)| match (a.into_address(), b.into_uint()) {
                (Some(address), Some(balance)) => Ok((address, balance)),
                _ => Err(anyhow::anyhow!("unexpected token types in arrays")),
            })
            .collect()
    }
}

/// Decodes one outcome, degrading to the zero value on failure, empty data or anomaly.
pub fn decode_outcome<S: DecodeShape>(outcome: &CallOutcome) -> S::Output {
    if !outcome.success || outcome.return_data.is_empty() {
        return S::Output::default();
    }
    match S::decode(&outcome.return_data) {
        Ok(value) => value,
        Err(e) => {
            metrics::increment_decode_anomaly(S::NAME);
            warn!(
                "[decode] {} anomaly: {}. raw=0x{}",
                S::NAME,
                e,
                hex::encode(&outcome.return_data)
            );
            S::Output::default()
        }
    }
}

/// Decodes a whole batch, pairing each outcome with the key of the call at the same position.
///
/// The outcome list must be exactly as long as the call list; anything else is
/// rejected instead of silently dropping or inventing results.
pub fn decode_batch<K: Clone, S: DecodeShape>(
    calls: &[PreparedCall<K>],
    outcomes: &[CallOutcome],
) -> AggregatorResult<Vec<(K, S::Output)>> {
    if calls.len() != outcomes.len() {
        return Err(AggregatorError::MisalignedBatch {
            expected: calls.len(),
            actual: outcomes.len(),
        });
    }
    Ok(calls
        .iter()
        .zip(outcomes)
        .map(|(call, outcome)| (call.key.clone(), decode_outcome::<S>(outcome)))
        .collect())
}
