use async_trait::async_trait;
use balance_aggregator_sdk::contracts::{erc20, token_wrapper};
use balance_aggregator_sdk::{
    AggregatorClient, AggregatorError, AggregatorResult, BalanceQuery, BalanceService,
    BalanceServiceConfig, Call, CallOutcome, Endpoint, EndpointPool, HoldingsRefresher,
    InvokerPolicy, ResilientInvoker,
};
use ethers::abi::{encode, Token};
use ethers::types::{Address, U256};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WRAPPER: u64 = 0xeeee;

fn user(n: u64) -> Address {
    Address::from_low_u64_be(0xaa00 + n)
}

fn token(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

fn wrapper() -> Address {
    Address::from_low_u64_be(WRAPPER)
}

/// In-memory chain state answering `balanceOf` and `getAllTokenBalancesOfUser`.
#[derive(Default)]
struct FakeChain {
    deployed: BTreeSet<Address>,
    balances: HashMap<(Address, Address), U256>,
    wrapped: HashMap<Address, Vec<(Address, U256)>>,
    batches: Mutex<Vec<usize>>,
}

impl FakeChain {
    fn with_tokens(count: u64) -> Self {
        Self {
            deployed: (0..count).map(token).collect(),
            ..Self::default()
        }
    }

    fn set_balance(&mut self, token: Address, user: Address, amount: U256) {
        self.balances.insert((token, user), amount);
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    fn answer(&self, call: &Call) -> CallOutcome {
        let balance_of = erc20::balance_of().unwrap().short_signature();
        let get_all = token_wrapper::get_all_token_balances_of_user()
            .unwrap()
            .short_signature();

        let data = &call.call_data;
        if data.len() != 36 {
            return CallOutcome::failure();
        }
        let holder = Address::from_slice(&data[16..36]);

        if data[..4] == balance_of && self.deployed.contains(&call.target) {
            let amount = self
                .balances
                .get(&(call.target, holder))
                .copied()
                .unwrap_or_default();
            return CallOutcome::success(encode(&[Token::Uint(amount)]));
        }
        if data[..4] == get_all && call.target == wrapper() {
            let entries = self.wrapped.get(&holder).cloned().unwrap_or_default();
            let (tokens, amounts): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .map(|(t, a)| (Token::Address(t), Token::Uint(a)))
                .unzip();
            return CallOutcome::success(encode(&[Token::Array(tokens), Token::Array(amounts)]));
        }
        CallOutcome::failure()
    }
}

#[async_trait]
impl AggregatorClient for FakeChain {
    async fn try_aggregate(
        &self,
        _aggregator: Address,
        calls: &[Call],
    ) -> AggregatorResult<Vec<CallOutcome>> {
        self.batches.lock().unwrap().push(calls.len());
        Ok(calls.iter().map(|call| self.answer(call)).collect())
    }
}

struct DownEndpoint(&'static str);

#[async_trait]
impl AggregatorClient for DownEndpoint {
    async fn try_aggregate(
        &self,
        _aggregator: Address,
        _calls: &[Call],
    ) -> AggregatorResult<Vec<CallOutcome>> {
        Err(AggregatorError::transport(self.0, "connection refused"))
    }
}

fn down(url: &'static str) -> Arc<dyn AggregatorClient> {
    Arc::new(DownEndpoint(url))
}

fn policy() -> InvokerPolicy {
    InvokerPolicy::interactive().with_retry_delay(Duration::from_millis(10))
}

fn service(endpoints: Vec<(&'static str, Arc<dyn AggregatorClient>)>) -> BalanceService {
    let pool = EndpointPool::new(
        endpoints
            .into_iter()
            .map(|(url, client)| Endpoint::new(url, client))
            .collect(),
    )
    .unwrap();
    let invoker = ResilientInvoker::new(pool, Address::repeat_byte(0xca), policy());
    BalanceService::new(Arc::new(invoker), BalanceServiceConfig::new(wrapper())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_failover_serves_every_batch_from_second_endpoint() {
    let mut chain = FakeChain::with_tokens(1000);
    chain.set_balance(token(0), user(0), U256::exp10(18) * 5);
    chain.set_balance(token(999), user(2), U256::from(7));
    let chain = Arc::new(chain);

    let service = service(vec![
        ("https://down.example", down("https://down.example")),
        ("https://up.example", chain.clone() as Arc<dyn AggregatorClient>),
    ]);

    let users = [user(0), user(1), user(2)];
    let tokens: Vec<Address> = (0..1000).map(token).collect();
    let balances = service
        .get_balances(&users, &BalanceQuery::Tokens(tokens), 2600)
        .await
        .unwrap();

    assert_eq!(chain.batch_sizes(), vec![2600, 400]);

    let stats = service.invoker().pool().snapshot();
    assert_eq!(stats[0].attempts, 4);
    assert!(stats[0].cooldown_remaining.is_some());
    assert_eq!(stats[1].attempts, 2);
    assert_eq!(stats[1].successes, 2);

    assert_eq!(balances.len(), 3);
    assert!(balances.values().all(|per_token| per_token.len() == 1000));
    assert_eq!(balances[&user(0)][&token(0)], U256::exp10(18) * 5);
    assert_eq!(balances[&user(2)][&token(999)], U256::from(7));
    assert_eq!(balances[&user(1)][&token(0)], U256::zero());
}

#[tokio::test(start_paused = true)]
async fn test_reverting_sub_call_records_zero() {
    let mut chain = FakeChain::with_tokens(2);
    chain.set_balance(token(1), user(0), U256::from(42));
    let chain: Arc<dyn AggregatorClient> = Arc::new(chain);
    let service = service(vec![("https://up.example", chain)]);

    // token(5) is not deployed, so its balanceOf reverts
    let balances = service
        .get_token_balances(&[user(0)], &[token(5), token(1)])
        .await
        .unwrap();

    let row = &balances[&user(0)];
    assert_eq!(row[&token(5)], U256::zero());
    assert_eq!(row[&token(1)], U256::from(42));
}

#[tokio::test(start_paused = true)]
async fn test_wrapper_keeps_positive_balances_only() {
    let mut chain = FakeChain::default();
    chain.wrapped.insert(
        user(0),
        vec![(token(1), U256::from(3)), (token(2), U256::zero())],
    );
    let chain: Arc<dyn AggregatorClient> = Arc::new(chain);
    let service = service(vec![("https://up.example", chain)]);

    let balances = service
        .get_wrapper_balances(&[user(0), user(1)])
        .await
        .unwrap();

    assert_eq!(balances.len(), 2);
    assert_eq!(balances[&user(0)].len(), 1);
    assert_eq!(balances[&user(0)][&token(1)], U256::from(3));
    assert!(balances[&user(1)].is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_all_endpoints_down_surfaces_error() {
    let service = service(vec![
        ("https://a.example", down("https://a.example")),
        ("https://b.example", down("https://b.example")),
    ]);

    let err = service
        .get_token_balances(&[user(0)], &[token(0)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AggregatorError::AllEndpointsFailed {
            endpoints: 2,
            attempts: 8
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_fleet_refresh_merges_and_filters_dust() {
    let threshold = U256::exp10(13);
    let mut chain = FakeChain::with_tokens(3);
    chain.set_balance(token(0), user(0), U256::exp10(12) * 8);
    chain.set_balance(token(1), user(0), U256::exp10(12) * 5);
    chain.set_balance(token(2), user(1), threshold);
    chain.wrapped.insert(user(0), vec![(token(0), U256::exp10(12) * 30)]);
    // direct and wrapped holdings each below the threshold, together above it
    chain.set_balance(token(1), user(3), U256::exp10(12) * 6);
    chain.wrapped.insert(user(3), vec![(token(1), U256::exp10(12) * 6)]);
    let chain: Arc<dyn AggregatorClient> = Arc::new(chain);

    let service = service(vec![("https://up.example", chain)]);
    let refresher = HoldingsRefresher::new(service, policy(), threshold);

    let wallets = [user(0), user(1), user(0), user(2)];
    let tokens: Vec<Address> = (0..3).map(token).collect();
    let owned = refresher.refresh_fleet(&wallets, &tokens).await.unwrap();

    assert_eq!(owned.len(), 3);
    assert_eq!(owned[&user(0)], BTreeSet::from([token(0)]));
    // fleet path keeps balances equal to the threshold
    assert_eq!(owned[&user(1)], BTreeSet::from([token(2)]));
    assert!(owned[&user(2)].is_empty());

    // single-wallet path requires strictly more than the threshold
    let single = refresher.refresh_wallet(user(1), &tokens).await.unwrap();
    assert!(single.is_empty());
    let single = refresher.refresh_wallet(user(0), &tokens).await.unwrap();
    assert_eq!(single, BTreeSet::from([token(0)]));

    // single-wallet path judges each source on its own
    let single = refresher.refresh_wallet(user(3), &tokens).await.unwrap();
    assert!(single.is_empty());
    let fleet = refresher.refresh_fleet(&[user(3)], &tokens).await.unwrap();
    assert_eq!(fleet[&user(3)], BTreeSet::from([token(1)]));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_one_invoker() {
    let mut chain = FakeChain::with_tokens(500);
    chain.set_balance(token(3), user(0), U256::from(11));
    chain.set_balance(token(4), user(9), U256::from(22));
    let chain: Arc<dyn AggregatorClient> = Arc::new(chain);

    let fleet_service = service(vec![
        ("https://down.example", down("https://down.example")),
        ("https://up.example", chain),
    ]);
    let wallet_service = fleet_service.clone();
    let attempts_per_endpoint = fleet_service.policy().attempts_per_endpoint as usize;

    let fleet_users = [user(0), user(1), user(2), user(3)];
    let tokens: Vec<Address> = (0..500).map(token).collect();
    let fleet_query = BalanceQuery::Tokens(tokens.clone());
    let wallet_query = BalanceQuery::Tokens(tokens);
    let wallet_users = [user(9)];

    let (fleet, single) = tokio::join!(
        fleet_service.get_balances(&fleet_users, &fleet_query, 300),
        wallet_service.get_balances(&wallet_users, &wallet_query, 300),
    );
    let fleet = fleet.unwrap();
    let single = single.unwrap();

    assert_eq!(fleet.len(), 4);
    assert!(fleet.values().all(|per_token| per_token.len() == 500));
    assert_eq!(fleet[&user(0)][&token(3)], U256::from(11));
    assert_eq!(single[&user(9)][&token(4)], U256::from(22));

    let stats = fleet_service.invoker().pool().snapshot();
    assert!(stats[0].attempts <= 2 * attempts_per_endpoint);
    assert!(stats[0].cooldown_remaining.is_some());
    assert_eq!(stats[0].successes, 0);
    // 2000 + 500 sub-calls in batches of 300
    assert_eq!(stats[1].successes, 7 + 2);
}
