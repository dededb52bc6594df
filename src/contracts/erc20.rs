use super::parse_function;
use crate::errors::AggregatorResult;
use ethers::abi::Function;

pub const BALANCE_OF_SIGNATURE: &str =
    "function balanceOf(address account) external view returns (uint256)";

/// ERC-20 `balanceOf(address) -> uint256`.
pub fn balance_of() -> AggregatorResult<Function> {
    parse_function(BALANCE_OF_SIGNATURE, "balanceOf")
}
