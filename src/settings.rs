use crate::contracts::{DEFAULT_TOKEN_WRAPPER_ADDRESS, MULTICALL3_ADDRESS};
use crate::encoder::parse_address;
use crate::errors::{AggregatorError, AggregatorResult};
use crate::invoker::InvokerPolicy;
use config::{Config, ConfigError, File, FileFormat};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Rpc {
    /// Ordered by preference; the first endpoint is tried first.
    #[serde(default)]
    pub http_urls: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Contracts {
    #[serde(default = "default_multicall")]
    pub multicall: String,
    #[serde(default = "default_wrapper")]
    pub wrapper: String,
}

fn default_multicall() -> String {
    MULTICALL3_ADDRESS.to_string()
}
fn default_wrapper() -> String {
    DEFAULT_TOKEN_WRAPPER_ADDRESS.to_string()
}

impl Default for Contracts {
    fn default() -> Self {
        Self {
            multicall: default_multicall(),
            wrapper: default_wrapper(),
        }
    }
}

impl Contracts {
    pub fn multicall_address(&self) -> AggregatorResult<Address> {
        parse_address(&self.multicall)
            .map_err(|e| AggregatorError::Configuration(format!("contracts.multicall: {}", e)))
    }

    pub fn wrapper_address(&self) -> AggregatorResult<Address> {
        parse_address(&self.wrapper)
            .map_err(|e| AggregatorError::Configuration(format!("contracts.wrapper: {}", e)))
    }
}

/// One retry profile, in config units.
#[derive(Debug, Deserialize, Clone)]
pub struct InvokerProfile {
    #[serde(default = "default_attempts_per_endpoint")]
    pub attempts_per_endpoint: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_false")]
    pub restart_on_all_fail: bool,
    #[serde(default = "default_restart_delay_seconds")]
    pub restart_delay_seconds: u64,
}

fn default_false() -> bool {
    false
}
fn default_attempts_per_endpoint() -> u32 {
    4
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_cooldown_seconds() -> u64 {
    3 * 60 * 60 // 3h
}
fn default_restart_delay_seconds() -> u64 {
    120
}

impl Default for InvokerProfile {
    fn default() -> Self {
        Self {
            attempts_per_endpoint: default_attempts_per_endpoint(),
            retry_delay_ms: default_retry_delay_ms(),
            cooldown_seconds: default_cooldown_seconds(),
            restart_on_all_fail: default_false(),
            restart_delay_seconds: default_restart_delay_seconds(),
        }
    }
}

impl InvokerProfile {
    fn background() -> Self {
        Self {
            retry_delay_ms: 10_000,
            restart_on_all_fail: true,
            ..Self::default()
        }
    }

    pub fn to_policy(&self) -> InvokerPolicy {
        InvokerPolicy::default()
            .with_attempts_per_endpoint(self.attempts_per_endpoint)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_cooldown(Duration::from_secs(self.cooldown_seconds))
            .with_restart(
                self.restart_on_all_fail,
                Duration::from_secs(self.restart_delay_seconds),
            )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Invoker {
    #[serde(default = "InvokerProfile::background")]
    pub background: InvokerProfile,
    #[serde(default)]
    pub interactive: InvokerProfile,
}

impl Default for Invoker {
    fn default() -> Self {
        Self {
            background: InvokerProfile::background(),
            interactive: InvokerProfile::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Balances {
    #[serde(default = "default_max_subcalls_balance_of")]
    pub max_subcalls_balance_of: usize,
    #[serde(default = "default_max_subcalls_wrapper")]
    pub max_subcalls_wrapper: usize,
    #[serde(default = "default_inter_batch_pause_ms")]
    pub inter_batch_pause_ms: u64,
    /// Minimum holding, in whole tokens.
    #[serde(default = "default_threshold")]
    pub threshold: Decimal,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

fn default_max_subcalls_balance_of() -> usize {
    2600
}
fn default_max_subcalls_wrapper() -> usize {
    800
}
fn default_inter_batch_pause_ms() -> u64 {
    500
}
fn default_threshold() -> Decimal {
    Decimal::new(1, 5) // 0.00001
}
fn default_token_decimals() -> u32 {
    18
}

impl Default for Balances {
    fn default() -> Self {
        Self {
            max_subcalls_balance_of: default_max_subcalls_balance_of(),
            max_subcalls_wrapper: default_max_subcalls_wrapper(),
            inter_batch_pause_ms: default_inter_batch_pause_ms(),
            threshold: default_threshold(),
            token_decimals: default_token_decimals(),
        }
    }
}

impl Balances {
    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }

    /// Threshold in the token's smallest unit, truncated toward zero.
    pub fn threshold_raw(&self) -> AggregatorResult<U256> {
        let factor = 10u64
            .checked_pow(self.token_decimals)
            .map(Decimal::from)
            .ok_or_else(|| {
                AggregatorError::Configuration(format!(
                    "balances.token_decimals {} is too large",
                    self.token_decimals
                ))
            })?;
        let scaled = self
            .threshold
            .checked_mul(factor)
            .ok_or_else(|| {
                AggregatorError::Configuration(format!(
                    "balances.threshold {} overflows at {} decimals",
                    self.threshold, self.token_decimals
                ))
            })?
            .trunc();
        U256::from_dec_str(&scaled.normalize().to_string()).map_err(|e| {
            AggregatorError::Configuration(format!("balances.threshold {}: {}", self.threshold, e))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Registry {
    #[serde(default = "default_token_list_url")]
    pub token_list_url: String,
    #[serde(default = "default_registry_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_token_list_url() -> String {
    "https://api.realtoken.community/v1/token".to_string()
}
fn default_registry_timeout_seconds() -> u64 {
    20
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            token_list_url: default_token_list_url(),
            timeout_seconds: default_registry_timeout_seconds(),
        }
    }
}

impl Registry {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Watch {
    #[serde(default)]
    pub wallets: Vec<String>,
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
}

fn default_refresh_interval_seconds() -> u64 {
    18 * 60 * 60 // 18h
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

impl Watch {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub contracts: Contracts,
    #[serde(default)]
    pub invoker: Invoker,
    #[serde(default)]
    pub balances: Balances,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub watch: Watch,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// `Config.toml` in the working directory (optional) plus environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// An explicit settings file plus environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::from_file_only(path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn from_file_only(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies `SDK_RPC_HTTP_URLS` / `RPC_URLS` and `SDK_CONTRACTS_*` from `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ["SDK_RPC_HTTP_URLS", "RPC_URLS"] {
            if let Some(list) = lookup(key).and_then(|raw| parse_string_list(&raw)) {
                if !list.is_empty() {
                    self.rpc.http_urls = list;
                    break;
                }
            }
        }
        if let Some(raw) = lookup("SDK_CONTRACTS_MULTICALL") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.contracts.multicall = trimmed.to_string();
            }
        }
        if let Some(raw) = lookup("SDK_CONTRACTS_WRAPPER") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.contracts.wrapper = trimmed.to_string();
            }
        }
    }

    /// Rejects settings the aggregation core cannot run with.
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.rpc.http_urls.is_empty() {
            return Err(AggregatorError::Configuration(
                "rpc.http_urls must list at least one endpoint".to_string(),
            ));
        }
        for raw in &self.rpc.http_urls {
            url::Url::parse(raw).map_err(|e| {
                AggregatorError::Configuration(format!("rpc.http_urls: {:?} is not a URL: {}", raw, e))
            })?;
        }
        if self.balances.max_subcalls_balance_of == 0 || self.balances.max_subcalls_wrapper == 0 {
            return Err(AggregatorError::Configuration(
                "balances.max_subcalls_* must be at least 1".to_string(),
            ));
        }
        if self.invoker.background.attempts_per_endpoint == 0
            || self.invoker.interactive.attempts_per_endpoint == 0
        {
            return Err(AggregatorError::Configuration(
                "invoker.*.attempts_per_endpoint must be at least 1".to_string(),
            ));
        }
        if self.balances.threshold.is_sign_negative() {
            return Err(AggregatorError::Configuration(
                "balances.threshold must not be negative".to_string(),
            ));
        }
        self.contracts.multicall_address()?;
        self.contracts.wrapper_address()?;
        self.balances.threshold_raw()?;
        Ok(())
    }

    /// Watched wallets, parsed. Invalid entries are an error.
    pub fn watched_wallets(&self) -> AggregatorResult<Vec<Address>> {
        self.watch
            .wallets
            .iter()
            .map(|w| {
                parse_address(w)
                    .map_err(|e| AggregatorError::Configuration(format!("watch.wallets: {}", e)))
            })
            .collect()
    }
}

/// Accepts a JSON array (`["a","b"]`), a bracketed list without quotes, or a comma list.
fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }

    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return Some(v);
        }
        let without_brackets = trimmed.trim_start_matches('[').trim_end_matches(']');
        return Some(split_list(without_brackets));
    }

    Some(split_list(trimmed))
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
