use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use crate::amount::{to_ui, MAX_DECIMALS};
use crate::error::Result;

/// Upper bound on mint ids per price request.
pub const PRICE_BATCH_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenAccountBalance {
    pub amount_native: u64,
    pub decimals: u8,
}

/// One mint's balance summed over every account the wallet holds for it.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenHolding {
    pub mint: String,
    pub accounts: Vec<TokenAccountBalance>,
    pub total_native: u64,
    pub decimals: u8,
    pub usd_price: Option<Decimal>,
}

impl TokenHolding {
    pub fn total_ui(&self) -> Decimal {
        to_ui(self.total_native, self.decimals)
    }

    pub fn usd_value(&self) -> Option<Decimal> {
        self.usd_price
            .and_then(|price| price.checked_mul(self.total_ui()))
    }
}

#[async_trait]
pub trait HoldingsGateway: Send + Sync {
    /// Raw token accounts per mint. An empty map means "no holdings"; a failed
    /// fetch is an error, never an empty map.
    async fn fetch_holdings(
        &self,
        wallet_address: &str,
    ) -> Result<BTreeMap<String, Vec<TokenAccountBalance>>>;

    /// USD prices for at most [`PRICE_BATCH_LIMIT`] mints.
    async fn fetch_price_batch(&self, mints: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Advisory prices: chunked, and a failing chunk just leaves its mints unpriced.
    async fn fetch_prices(&self, mints: &[String]) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for chunk in mints.chunks(PRICE_BATCH_LIMIT) {
            match self.fetch_price_batch(chunk).await {
                Ok(batch) => prices.extend(batch),
                Err(err) => {
                    warn!(event = "price_fetch_failed", mints = chunk.len(), error = %err);
                }
            }
        }
        prices
    }
}

/// Sums native amounts per mint and drops mints whose total is zero.
pub fn aggregate_holdings(
    raw: &BTreeMap<String, Vec<TokenAccountBalance>>,
    prices: &HashMap<String, Decimal>,
) -> Vec<TokenHolding> {
    raw.iter()
        .filter_map(|(mint, accounts)| aggregate_mint(mint, accounts, prices.get(mint).copied()))
        .collect()
}

fn aggregate_mint(
    mint: &str,
    accounts: &[TokenAccountBalance],
    usd_price: Option<Decimal>,
) -> Option<TokenHolding> {
    let mut decimals = None;
    let mut kept = Vec::with_capacity(accounts.len());
    let mut total_native = 0u64;
    for account in accounts {
        if account.decimals > MAX_DECIMALS {
            warn!(
                event = "holding_decimals_unsupported",
                mint = %mint,
                decimals = account.decimals,
                max = MAX_DECIMALS
            );
            continue;
        }
        let expected = *decimals.get_or_insert(account.decimals);
        if account.decimals != expected {
            warn!(
                event = "holding_decimals_mismatch",
                mint = %mint,
                expected,
                got = account.decimals
            );
            continue;
        }
        total_native = total_native.saturating_add(account.amount_native);
        kept.push(*account);
    }
    let decimals = decimals?;
    if total_native == 0 {
        return None;
    }
    Some(TokenHolding {
        mint: mint.to_string(),
        accounts: kept,
        total_native,
        decimals,
        usd_price,
    })
}

/// Fresh balance and price for a single mint. `None` when the wallet holds none of it.
pub async fn load_token_holding(
    gateway: &dyn HoldingsGateway,
    wallet_address: &str,
    mint: &str,
) -> Result<Option<TokenHolding>> {
    let raw = gateway.fetch_holdings(wallet_address).await?;
    let Some(accounts) = raw.get(mint) else {
        return Ok(None);
    };
    let Some(mut holding) = aggregate_mint(mint, accounts, None) else {
        return Ok(None);
    };
    let prices = gateway.fetch_prices(&[mint.to_string()]).await;
    holding.usd_price = prices.get(mint).copied();
    Ok(Some(holding))
}
