// Contracts Module - Public read-only ABIs used by the balance queries

pub mod erc20;
pub mod token_wrapper;

use crate::errors::{AggregatorError, AggregatorResult};
use ethers::abi::{parse_abi, Function};

/// Canonical Multicall3 deployment (same address on every supported chain).
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Token wrapper contract exposing `getAllTokenBalancesOfUser(address)`.
pub const DEFAULT_TOKEN_WRAPPER_ADDRESS: &str = "0x10497611Ee6524D75FC45E3739F472F83e282AD5";

/// Parses a single human-readable function signature into an ABI function descriptor.
pub fn parse_function(signature: &str, name: &str) -> AggregatorResult<Function> {
    let abi = parse_abi(&[signature])
        .map_err(|e| AggregatorError::Encoding(format!("invalid ABI signature {:?}: {}", signature, e)))?;
    abi.function(name)
        .cloned()
        .map_err(|e| AggregatorError::Encoding(format!("function {} not found in ABI: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors_parse() {
        let balance_of = erc20::balance_of().unwrap();
        assert_eq!(balance_of.name, "balanceOf");
        assert_eq!(hex::encode(balance_of.short_signature()), "70a08231");

        let wrapper = token_wrapper::get_all_token_balances_of_user().unwrap();
        assert_eq!(wrapper.inputs.len(), 1);
        assert_eq!(wrapper.outputs.len(), 2);
    }

    #[test]
    fn test_unknown_function_is_encoding_error() {
        let err = parse_function(erc20::BALANCE_OF_SIGNATURE, "transfer").unwrap_err();
        assert!(matches!(err, AggregatorError::Encoding(_)));
    }
}
