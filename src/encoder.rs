//! # Aggregator Call Encoder
//!
//! Turns a function descriptor plus an ordered list of argument tuples into
//! [`PreparedCall`]s: the target address, the ABI-encoded call data and a
//! caller-defined logical key used to map the aggregator's positional results
//! back to whatever the call answers for (a user, a `(user, token)` pair, ...).
//!
//! Output order always equals input order. Encoding is pure; a malformed
//! argument fails the whole request with [`AggregatorError::Encoding`].

use crate::errors::{AggregatorError, AggregatorResult};
use crate::multicall::Call;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Function, ParamType, Token};
use ethers::types::{Address, Bytes};
use std::str::FromStr;

/// A sub-call ready for batching, tagged with the logical key it answers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCall<K> {
    pub target: Address,
    pub call_data: Bytes,
    pub key: K,
}

impl<K> PreparedCall<K> {
    /// The wire part of the call, without the logical key.
    pub fn to_call(&self) -> Call {
        Call {
            target: self.target,
            call_data: self.call_data.clone(),
        }
    }
}

/// Encodes one call per typed argument tuple.
pub fn encode_calls<K, I>(
    target: Address,
    function: &Function,
    args: I,
) -> AggregatorResult<Vec<PreparedCall<K>>>
where
    I: IntoIterator<Item = (Vec<Token>, K)>,
{
    let param_types: Vec<_> = function.inputs.iter().map(|p| p.kind.clone()).collect();

    args.into_iter()
        .enumerate()
        .map(|(index, (tokens, key))| {
            if tokens.len() != param_types.len() {
                return Err(AggregatorError::Encoding(format!(
                    "{} expects {} arguments, call #{} has {}",
                    function.name,
                    param_types.len(),
                    index,
                    tokens.len()
                )));
            }
            if !Token::types_check(&tokens, &param_types) {
                return Err(AggregatorError::Encoding(format!(
                    "argument types of call #{} do not match {}",
                    index,
                    function.signature()
                )));
            }
            let call_data = function
                .encode_input(&tokens)
                .map_err(|e| AggregatorError::Encoding(format!("{}: {}", function.name, e)))?;
            Ok(PreparedCall {
                target,
                call_data: Bytes::from(call_data),
                key,
            })
        })
        .collect()
}

/// Encodes one call per tuple of string arguments, tokenized against the function inputs.
///
/// Address arguments must be 20-byte hex strings; anything else is an encoding error.
pub fn encode_calls_from_strs<K, S, I>(
    target: Address,
    function: &Function,
    args: I,
) -> AggregatorResult<Vec<PreparedCall<K>>>
where
    S: AsRef<str>,
    I: IntoIterator<Item = (Vec<S>, K)>,
{
    let mut typed = Vec::new();
    for (index, (values, key)) in args.into_iter().enumerate() {
        if values.len() != function.inputs.len() {
            return Err(AggregatorError::Encoding(format!(
                "{} expects {} arguments, call #{} has {}",
                function.name,
                function.inputs.len(),
                index,
                values.len()
            )));
        }
        let tokens = function
            .inputs
            .iter()
            .zip(values.iter())
            .map(|(param, value)| {
                if param.kind == ParamType::Address {
                    return parse_address(value.as_ref()).map(Token::Address);
                }
                LenientTokenizer::tokenize(&param.kind, value.as_ref()).map_err(|e| {
                    AggregatorError::Encoding(format!(
                        "argument {} of call #{} ({:?}): {}",
                        param.name,
                        index,
                        value.as_ref(),
                        e
                    ))
                })
            })
            .collect::<AggregatorResult<Vec<Token>>>()?;
        typed.push((tokens, key));
    }
    encode_calls(target, function, typed)
}

/// Parses a hex address (with or without `0x`).
pub fn parse_address(value: &str) -> AggregatorResult<Address> {
    let trimmed = value.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(AggregatorError::Encoding(format!(
            "malformed address {:?}: expected 20 bytes of hex",
            value
        )));
    }
    Address::from_str(hex_part)
        .map_err(|e| AggregatorError::Encoding(format!("malformed address {:?}: {}", value, e)))
}

pub fn parse_addresses<S: AsRef<str>>(values: &[S]) -> AggregatorResult<Vec<Address>> {
    values.iter().map(|v| parse_address(v.as_ref())).collect()
}

/// `balanceOf(user)` on every token for every user, user-major.
pub fn balance_of_calls(
    balance_of: &Function,
    users: &[Address],
    tokens: &[Address],
) -> AggregatorResult<Vec<PreparedCall<(Address, Address)>>> {
    let mut calls = Vec::with_capacity(users.len() * tokens.len());
    for &user in users {
        // Each token is its own target, so encode per token.
        for &token in tokens {
            let mut prepared = encode_calls(
                token,
                balance_of,
                std::iter::once((vec![Token::Address(user)], (user, token))),
            )?;
            calls.append(&mut prepared);
        }
    }
    Ok(calls)
}

/// `getAllTokenBalancesOfUser(user)` on the wrapper, one call per user.
pub fn wrapper_calls(
    get_all_balances: &Function,
    wrapper: Address,
    users: &[Address],
) -> AggregatorResult<Vec<PreparedCall<Address>>> {
    encode_calls(
        wrapper,
        get_all_balances,
        users.iter().map(|&user| (vec![Token::Address(user)], user)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{erc20, token_wrapper};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_balance_of_calls_cartesian_user_major() {
        let function = erc20::balance_of().unwrap();
        let users = [addr(1), addr(2)];
        let tokens = [addr(0xa), addr(0xb), addr(0xc)];

        let calls = balance_of_calls(&function, &users, &tokens).unwrap();
        assert_eq!(calls.len(), 6);

        let keys: Vec<_> = calls.iter().map(|c| c.key).collect();
        assert_eq!(
            keys,
            vec![
                (addr(1), addr(0xa)),
                (addr(1), addr(0xb)),
                (addr(1), addr(0xc)),
                (addr(2), addr(0xa)),
                (addr(2), addr(0xb)),
                (addr(2), addr(0xc)),
            ]
        );
        for call in &calls {
            assert_eq!(call.target, call.key.1);
            assert_eq!(&call.call_data[..4], &function.short_signature()[..]);
            assert_eq!(&call.call_data[16..36], call.key.0.as_bytes());
        }
    }

    #[test]
    fn test_wrapper_calls_target_wrapper() {
        let function = token_wrapper::get_all_token_balances_of_user().unwrap();
        let wrapper = addr(0xee);
        let calls = wrapper_calls(&function, wrapper, &[addr(1), addr(1), addr(2)]).unwrap();

        // duplicates are kept, one call each
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.target == wrapper));
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[2].key, addr(2));
    }

    #[test]
    fn test_missing_argument_is_encoding_error() {
        let function = erc20::balance_of().unwrap();
        let err = encode_calls(addr(0xa), &function, vec![(Vec::new(), ())]).unwrap_err();
        assert!(matches!(err, AggregatorError::Encoding(_)));
    }

    #[test]
    fn test_wrong_argument_type_is_encoding_error() {
        let function = erc20::balance_of().unwrap();
        let args = vec![(vec![Token::Bool(true)], ())];
        assert!(matches!(
            encode_calls(addr(0xa), &function, args),
            Err(AggregatorError::Encoding(_))
        ));
    }

    #[test]
    fn test_string_arguments() {
        let function = erc20::balance_of().unwrap();
        let ok = encode_calls_from_strs(
            addr(0xa),
            &function,
            vec![(vec!["0x0101010101010101010101010101010101010101"], "u1")],
        )
        .unwrap();
        assert_eq!(ok[0].key, "u1");
        assert_eq!(&ok[0].call_data[16..36], addr(1).as_bytes());

        let bad = encode_calls_from_strs(addr(0xa), &function, vec![(vec!["0x1234"], "u1")]);
        assert!(matches!(bad, Err(AggregatorError::Encoding(_))));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("0xB999041bBAd79E8435286DA3A56231E92e98f71a").unwrap(),
            parse_address("b999041bbad79e8435286da3a56231e92e98f71a").unwrap()
        );
        assert!(parse_address("0xnothex0000000000000000000000000000000000").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_addresses(&["0x0101010101010101010101010101010101010101", ""]).is_err());
    }
}
