use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::SellError;
use crate::swap::{Commitment, SignatureConfirmer};
use crate::util::logging::redact_url;

const CONFIRM_POLL_INTERVAL_MS: u64 = 500;

pub async fn rpc_call(client: &Client, url: &str, method: &str, params: Value) -> Result<Value> {
    let start = Instant::now();
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let result = async {
        let endpoint = redact_url(url);
        let resp = client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let kind = if err.is_timeout() {
                    "timeout"
                } else if err.is_connect() {
                    "connect"
                } else {
                    "send"
                };
                anyhow!("rpc request {method} failed ({kind}) to {endpoint}")
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|err| {
            let kind = if err.is_timeout() { "timeout" } else { "read" };
            anyhow!("rpc response read failed ({kind}) from {endpoint}")
        })?;
        if !status.is_success() {
            return Err(anyhow!("RPC HTTP {} for {}", status, method));
        }
        let parsed: Value = serde_json::from_str(&body).context("decode rpc response")?;
        if let Some(err) = parsed.get("error") {
            return Err(anyhow!("RPC error: {}", err));
        }
        Ok(parsed)
    }
    .await;

    debug!(
        event = "rpc_call",
        method,
        duration_ms = start.elapsed().as_millis() as u64,
        ok = result.is_ok()
    );

    result
}

pub async fn rpc_result(client: &Client, url: &str, method: &str, params: Value) -> Result<Value> {
    let parsed = rpc_call(client, url, method, params).await?;
    parsed
        .get("result")
        .cloned()
        .ok_or_else(|| anyhow!("rpc response missing result"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureStatus {
    pub err: Option<String>,
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    pub fn reached(&self, commitment: Commitment) -> bool {
        let level = self.confirmation_status.as_deref().unwrap_or("processed");
        match commitment {
            Commitment::Processed => true,
            Commitment::Confirmed => matches!(level, "confirmed" | "finalized"),
            Commitment::Finalized => level == "finalized",
        }
    }
}

/// Reads the first entry of a `getSignatureStatuses` result; `None` while the
/// cluster has not seen the signature yet.
pub fn parse_signature_status(result: &Value) -> Option<SignatureStatus> {
    let entry = result.get("value")?.as_array()?.first()?;
    if entry.is_null() {
        return None;
    }
    let err = entry
        .get("err")
        .filter(|value| !value.is_null())
        .map(|value| value.to_string());
    let confirmation_status = entry
        .get("confirmationStatus")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(SignatureStatus {
        err,
        confirmation_status,
    })
}

/// Polls `getSignatureStatuses` until the commitment is reached or time runs out.
pub struct RpcConfirmer {
    http: Client,
    rpc_url: String,
    poll_interval: Duration,
}

impl RpcConfirmer {
    pub fn new(http: Client, rpc_url: String) -> Self {
        Self {
            http,
            rpc_url,
            poll_interval: Duration::from_millis(CONFIRM_POLL_INTERVAL_MS),
        }
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let result = rpc_result(
            &self.http,
            &self.rpc_url,
            "getSignatureStatuses",
            json!([[signature], { "searchTransactionHistory": false }]),
        )
        .await?;
        Ok(parse_signature_status(&result))
    }
}

#[async_trait]
impl SignatureConfirmer for RpcConfirmer {
    async fn confirm(
        &self,
        signature: &str,
        commitment: Commitment,
        timeout: Duration,
    ) -> crate::error::Result<()> {
        let poll = async {
            loop {
                match self.signature_status(signature).await {
                    Ok(Some(status)) => {
                        if let Some(err) = status.err {
                            return Err(SellError::ExecutionRejected(format!(
                                "transaction failed on-chain: {err}"
                            )));
                        }
                        if status.reached(commitment) {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(event = "confirm_poll_error", signature, error = %err);
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SellError::ConfirmationTimeout {
                signature: signature.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
    }
}
