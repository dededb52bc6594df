use super::parse_function;
use crate::errors::AggregatorResult;
use ethers::abi::Function;

pub const GET_ALL_TOKEN_BALANCES_OF_USER_SIGNATURE: &str =
    "function getAllTokenBalancesOfUser(address user) external view returns (address[], uint256[])";

/// Wrapper `getAllTokenBalancesOfUser(address) -> (address[] tokens, uint256[] balances)`.
pub fn get_all_token_balances_of_user() -> AggregatorResult<Function> {
    parse_function(
        GET_ALL_TOKEN_BALANCES_OF_USER_SIGNATURE,
        "getAllTokenBalancesOfUser",
    )
}
