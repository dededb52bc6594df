//! Owned-token refresh for watched wallets.
//!
//! Runs both balance queries (per-token `balanceOf` and the wrapper), merges
//! them and reduces the result to the set of tokens each wallet holds above the
//! dust threshold.

use crate::balances::{merge_balances, BalanceMap, BalanceService};
use crate::errors::AggregatorResult;
use crate::invoker::InvokerPolicy;
use ethers::types::{Address, U256};
use indexmap::IndexSet;
use log::info;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

pub type OwnedTokens = HashMap<Address, BTreeSet<Address>>;

#[derive(Debug, Clone)]
pub struct HoldingsRefresher {
    service: BalanceService,
    interactive: InvokerPolicy,
    threshold: U256,
}

impl HoldingsRefresher {
    /// `service` drives fleet refreshes; `interactive` is used for single wallets.
    pub fn new(service: BalanceService, interactive: InvokerPolicy, threshold: U256) -> Self {
        Self {
            service,
            interactive,
            threshold,
        }
    }

    pub fn threshold(&self) -> U256 {
        self.threshold
    }

    /// Owned tokens for every distinct wallet. Wallets holding nothing map to an empty set.
    pub async fn refresh_fleet(
        &self,
        wallets: &[Address],
        tokens: &[Address],
    ) -> AggregatorResult<OwnedTokens> {
        let start = Instant::now();
        let unique: Vec<Address> = wallets
            .iter()
            .copied()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        let per_token = self.service.get_token_balances(&unique, tokens).await?;
        let wrapped = self.service.get_wrapper_balances(&unique).await?;
        let merged = merge_balances([&per_token, &wrapped], self.threshold);

        let owned: OwnedTokens = unique
            .iter()
            .map(|wallet| {
                let tokens = merged
                    .get(wallet)
                    .map(|balances| balances.keys().copied().collect())
                    .unwrap_or_default();
                (*wallet, tokens)
            })
            .collect();

        info!(
            "[holdings] Owned tokens updated for {} wallets ({} tokens listed) in {:?}",
            unique.len(),
            tokens.len(),
            start.elapsed()
        );
        Ok(owned)
    }

    /// Owned tokens for one wallet, with the interactive retry policy.
    ///
    /// A token counts when its direct balance or its wrapped balance is strictly
    /// above the threshold. The two sources are not summed.
    pub async fn refresh_wallet(
        &self,
        wallet: Address,
        tokens: &[Address],
    ) -> AggregatorResult<BTreeSet<Address>> {
        let service = self.service.clone().with_policy(self.interactive.clone());
        let users = [wallet];

        let per_token = service.get_token_balances(&users, tokens).await?;
        let wrapped = service.get_wrapper_balances(&users).await?;

        // each source is held to the threshold on its own
        let mut owned = owned_tokens(&per_token, wallet, self.threshold);
        owned.extend(owned_tokens(&wrapped, wallet, self.threshold));
        Ok(owned)
    }
}

/// Tokens `wallet` holds strictly above `threshold`.
pub fn owned_tokens(map: &BalanceMap, wallet: Address, threshold: U256) -> BTreeSet<Address> {
    map.get(&wallet)
        .map(|balances| {
            balances
                .iter()
                .filter(|(_, amount)| **amount > threshold)
                .map(|(token, _)| *token)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_owned_tokens_is_strict() {
        let wallet = Address::repeat_byte(1);
        let mut balances = IndexMap::new();
        balances.insert(Address::repeat_byte(0xa), U256::from(10));
        balances.insert(Address::repeat_byte(0xb), U256::from(11));
        let mut map = BalanceMap::new();
        map.insert(wallet, balances);

        let owned = owned_tokens(&map, wallet, U256::from(10));
        assert_eq!(owned, BTreeSet::from([Address::repeat_byte(0xb)]));

        assert!(owned_tokens(&map, Address::repeat_byte(2), U256::zero()).is_empty());
    }
}
