//! Jupiter Ultra (holdings, order, execute) and Price v3 over HTTP.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::amount::parse_ui_amount;
use crate::error::{Result, SellError};
use crate::holdings::{HoldingsGateway, TokenAccountBalance};
use crate::swap::{OrderRequest, SwapApi, SwapOrder};
use crate::util::logging::redact_url;

const API_KEY_HEADER: &str = "x-api-key";

pub struct JupiterClient {
    http: Client,
    ultra_url: String,
    price_url: String,
    api_key: Option<SecretString>,
    request_timeout: Duration,
    swap_timeout: Duration,
}

enum CallError {
    Transport(String),
    Status { status: u16, message: String },
    Decode(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Transport(msg) => write!(f, "{msg}"),
            CallError::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            CallError::Decode(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HoldingsResponse {
    #[serde(default)]
    tokens: BTreeMap<String, Vec<HoldingAccount>>,
}

#[derive(Debug, Deserialize)]
struct HoldingAccount {
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    decimals: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl JupiterClient {
    pub fn new(
        http: Client,
        ultra_url: &str,
        price_url: &str,
        api_key: Option<SecretString>,
        request_timeout: Duration,
        swap_timeout: Duration,
    ) -> Self {
        Self {
            http,
            ultra_url: ultra_url.trim_end_matches('/').to_string(),
            price_url: price_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout,
            swap_timeout,
        }
    }

    fn with_key(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key.expose_secret().as_str()),
            None => builder,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &'static str,
        url: &str,
        builder: RequestBuilder,
    ) -> std::result::Result<T, CallError> {
        let start = Instant::now();
        let endpoint = redact_url(url);
        let result = async {
            let resp = self.with_key(builder).send().await.map_err(|err| {
                let kind = if err.is_timeout() {
                    "timeout"
                } else if err.is_connect() {
                    "connect"
                } else {
                    "send"
                };
                CallError::Transport(format!("jupiter {op} failed ({kind}) to {endpoint}"))
            })?;
            let status = resp.status();
            let body = resp.text().await.map_err(|err| {
                let kind = if err.is_timeout() { "timeout" } else { "read" };
                CallError::Transport(format!("jupiter {op} read failed ({kind}) from {endpoint}"))
            })?;
            if !status.is_success() {
                return Err(CallError::Status {
                    status: status.as_u16(),
                    message: error_message(&body).unwrap_or_else(|| {
                        status.canonical_reason().unwrap_or("error").to_string()
                    }),
                });
            }
            serde_json::from_str(&body).map_err(|err| CallError::Decode(err.to_string()))
        }
        .await;

        debug!(
            event = "jupiter_call",
            op,
            duration_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok()
        );
        result
    }
}

fn error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    ["error", "message", "errorMessage"]
        .iter()
        .find_map(|field| parsed.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// Prices arrive as JSON numbers; zero or missing means "unknown".
fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => parse_ui_amount(&number.to_string()),
        Value::String(text) => parse_ui_amount(text),
        _ => None,
    }
}

fn remote(err: CallError) -> SellError {
    SellError::RemoteUnavailable(err.to_string())
}

#[async_trait]
impl HoldingsGateway for JupiterClient {
    async fn fetch_holdings(
        &self,
        wallet_address: &str,
    ) -> Result<BTreeMap<String, Vec<TokenAccountBalance>>> {
        let url = format!("{}/holdings/{wallet_address}", self.ultra_url);
        let builder = self.http.get(&url).timeout(self.request_timeout);
        let response: HoldingsResponse = self
            .call("holdings", &url, builder)
            .await
            .map_err(remote)?;

        let mut holdings = BTreeMap::new();
        for (mint, accounts) in response.tokens {
            let mut balances = Vec::with_capacity(accounts.len());
            for account in accounts {
                let parsed = account
                    .amount
                    .as_deref()
                    .and_then(|amount| amount.trim().parse::<u64>().ok());
                match (parsed, account.decimals) {
                    (Some(amount_native), Some(decimals)) => balances.push(TokenAccountBalance {
                        amount_native,
                        decimals,
                    }),
                    _ => warn!(event = "holding_account_skipped", mint = %mint),
                }
            }
            holdings.insert(mint, balances);
        }
        Ok(holdings)
    }

    async fn fetch_price_batch(&self, mints: &[String]) -> Result<HashMap<String, Decimal>> {
        if mints.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = mints.join(",");
        let builder = self
            .http
            .get(&self.price_url)
            .query(&[("ids", ids.as_str())])
            .timeout(self.request_timeout);
        let response: HashMap<String, Value> = self
            .call("price", &self.price_url, builder)
            .await
            .map_err(remote)?;
        Ok(response
            .into_iter()
            .filter_map(|(mint, entry)| {
                let price = entry.get("usdPrice").and_then(decimal_from_json)?;
                Some((mint, price))
            })
            .collect())
    }
}

#[async_trait]
impl SwapApi for JupiterClient {
    async fn token_decimals(&self, mint: &str) -> Result<u8> {
        let builder = self
            .http
            .get(&self.price_url)
            .query(&[("ids", mint)])
            .timeout(self.request_timeout);
        let response: HashMap<String, Value> = self
            .call("decimals", &self.price_url, builder)
            .await
            .map_err(remote)?;
        response
            .get(mint)
            .and_then(|entry| entry.get("decimals"))
            .and_then(Value::as_u64)
            .and_then(|decimals| u8::try_from(decimals).ok())
            .ok_or_else(|| SellError::RemoteUnavailable(format!("no decimals reported for {mint}")))
    }

    async fn order(&self, request: &OrderRequest) -> Result<SwapOrder> {
        let url = format!("{}/order", self.ultra_url);
        let amount = request.amount_native.to_string();
        let slippage = request.slippage_bps.to_string();
        let builder = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
                ("taker", request.taker.as_str()),
            ])
            .timeout(self.swap_timeout);
        let response: OrderResponse = self
            .call("order", &url, builder)
            .await
            .map_err(|err| match err {
                CallError::Transport(_) => SellError::RemoteUnavailable(err.to_string()),
                _ => SellError::QuoteUnavailable(err.to_string()),
            })?;

        let transaction = response
            .transaction
            .filter(|tx| !tx.trim().is_empty())
            .ok_or_else(|| {
                SellError::QuoteUnavailable(
                    response
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "no transaction in order".to_string()),
                )
            })?;
        let request_id = response
            .request_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SellError::QuoteUnavailable("no requestId in order".to_string()))?;
        Ok(SwapOrder {
            transaction_b64: transaction,
            request_id,
        })
    }

    async fn execute(&self, request_id: &str, signed_tx_b64: &str) -> Result<String> {
        let url = format!("{}/execute", self.ultra_url);
        let builder = self
            .http
            .post(&url)
            .json(&json!({
                "signedTransaction": signed_tx_b64,
                "requestId": request_id,
            }))
            .timeout(self.swap_timeout);
        let response: ExecuteResponse =
            self.call("execute", &url, builder).await.map_err(|err| match err {
                CallError::Transport(_) => SellError::RemoteUnavailable(err.to_string()),
                _ => SellError::ExecutionRejected(err.to_string()),
            })?;

        if response.status.as_deref() == Some("Failed") {
            return Err(SellError::ExecutionRejected(
                response
                    .error
                    .unwrap_or_else(|| "execution failed".to_string()),
            ));
        }
        response
            .signature
            .filter(|signature| !signature.trim().is_empty())
            .ok_or_else(|| {
                SellError::ExecutionRejected("no signature in execute response".to_string())
            })
    }
}
