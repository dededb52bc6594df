//! Token registry: the public listing of tokens whose balances are aggregated.
//!
//! The listing is a JSON array of token descriptors. Only the fields the balance
//! refresh needs are deserialized; everything else is ignored.

use crate::encoder::parse_address;
use anyhow::{Context, Result};
use ethers::types::Address;
use indexmap::{IndexMap, IndexSet};
use log::{info, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenListing {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub ethereum_contract: Option<String>,
    /// Deployment on the chain the aggregator runs on; `None` for tokens not bridged there.
    #[serde(default)]
    pub gnosis_contract: Option<String>,
    #[serde(default)]
    pub token_price: Option<f64>,
}

/// HTTP client for the token listing.
#[derive(Debug, Clone)]
pub struct TokenRegistryClient {
    client: reqwest::Client,
    url: String,
}

impl TokenRegistryClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Vec<TokenListing>> {
        let start = Instant::now();
        let listings = match self.request().await {
            Ok(listings) => listings,
            Err(e) => {
                warn!("[registry] Failed to fetch token list from {}: {:#}", self.url, e);
                return Err(e);
            }
        };
        info!(
            "[registry] Fetched {} token listings in {:?}",
            listings.len(),
            start.elapsed()
        );
        Ok(listings)
    }

    async fn request(&self) -> Result<Vec<TokenListing>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()?;
        let listings = response
            .json::<Vec<TokenListing>>()
            .await
            .context("token list is not a JSON array of listings")?;
        Ok(listings)
    }
}

/// One-shot fetch of the token listing.
pub async fn fetch_token_list(url: &str, timeout: Duration) -> Result<Vec<TokenListing>> {
    TokenRegistryClient::new(url, timeout)?.fetch().await
}

/// Listings keyed by uuid. Entries with an empty uuid are skipped; later duplicates win.
pub fn index_by_uuid(listings: Vec<TokenListing>) -> IndexMap<String, TokenListing> {
    listings
        .into_iter()
        .filter(|listing| !listing.uuid.trim().is_empty())
        .map(|listing| (listing.uuid.clone(), listing))
        .collect()
}

/// Parsed, de-duplicated contract addresses of every listing deployed on the aggregator's chain.
pub fn tradable_contracts<'a, I>(listings: I) -> Vec<Address>
where
    I: IntoIterator<Item = &'a TokenListing>,
{
    let mut contracts = IndexSet::new();
    for listing in listings {
        let Some(raw) = listing.gnosis_contract.as_deref() else {
            continue;
        };
        match parse_address(raw) {
            Ok(address) => {
                contracts.insert(address);
            }
            Err(e) => warn!("[registry] Skipping listing {:?}: {}", listing.uuid, e),
        }
    }
    contracts.into_iter().collect()
}
