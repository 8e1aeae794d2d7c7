//! Quote → sign → execute → confirm against the swap aggregator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, info, warn};

use crate::amount::to_native;
use crate::error::{Result, SellError};
use crate::journal::{TxJournal, TxRecord, TxState};
use crate::tx::sign_unsigned_tx;

/// Wrapped SOL; every interactive sell pays out into it.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const NATIVE_DECIMALS: u8 = 9;

/// Used when the decimals lookup for an input mint fails.
pub const DEFAULT_DECIMALS: u8 = 9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

#[derive(Debug)]
pub struct SwapRequest {
    pub signer: Keypair,
    pub input_mint: String,
    pub output_mint: String,
    pub amount_ui: Decimal,
    pub slippage_bps: u16,
    pub input_decimals: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapReceipt {
    pub signature: String,
    pub amount_native: u64,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount_native: u64,
    pub slippage_bps: u16,
    pub taker: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapOrder {
    pub transaction_b64: String,
    pub request_id: String,
}

/// Remote quote/execution service.
#[async_trait]
pub trait SwapApi: Send + Sync {
    async fn token_decimals(&self, mint: &str) -> Result<u8>;
    async fn order(&self, request: &OrderRequest) -> Result<SwapOrder>;
    /// Returns the transaction signature reported by the aggregator.
    async fn execute(&self, request_id: &str, signed_tx_b64: &str) -> Result<String>;
}

#[async_trait]
pub trait SignatureConfirmer: Send + Sync {
    async fn confirm(&self, signature: &str, commitment: Commitment, timeout: Duration)
        -> Result<()>;
}

/// What the sell flow calls to trade; [`SwapExecutor`] is the real one.
#[async_trait]
pub trait Swapper: Send + Sync {
    async fn swap(&self, request: SwapRequest) -> Result<SwapReceipt>;
}

pub struct SwapExecutor {
    api: Arc<dyn SwapApi>,
    confirmer: Arc<dyn SignatureConfirmer>,
    journal: Arc<dyn TxJournal>,
    commitment: Commitment,
    confirm_timeout: Duration,
}

impl SwapExecutor {
    pub fn new(
        api: Arc<dyn SwapApi>,
        confirmer: Arc<dyn SignatureConfirmer>,
        journal: Arc<dyn TxJournal>,
        commitment: Commitment,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            api,
            confirmer,
            journal,
            commitment,
            confirm_timeout,
        }
    }

    async fn resolve_decimals(&self, mint: &str, hint: Option<u8>) -> u8 {
        if let Some(decimals) = hint {
            return decimals;
        }
        match self.api.token_decimals(mint).await {
            Ok(decimals) => decimals,
            Err(err) => {
                warn!(
                    event = "decimals_lookup_failed",
                    mint = %mint,
                    fallback = DEFAULT_DECIMALS,
                    error = %err
                );
                DEFAULT_DECIMALS
            }
        }
    }

    fn journal(&self, state: TxState, signature: &str, order: &OrderRequest) {
        let record = TxRecord::new(state, signature, order);
        if let Err(err) = self.journal.record(&record) {
            warn!(event = "tx_journal_write_failed", signature, error = %err);
        }
    }
}

#[async_trait]
impl Swapper for SwapExecutor {
    async fn swap(&self, request: SwapRequest) -> Result<SwapReceipt> {
        let decimals = self
            .resolve_decimals(&request.input_mint, request.input_decimals)
            .await;
        let amount_native = to_native(request.amount_ui, decimals)?;
        if amount_native == 0 {
            return Err(SellError::InvalidAmount(format!(
                "{} is below the smallest unit of this token",
                request.amount_ui
            )));
        }

        let order_request = OrderRequest {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            amount_native,
            slippage_bps: request.slippage_bps,
            taker: request.signer.pubkey().to_string(),
        };
        let order = self.api.order(&order_request).await?;
        if order.transaction_b64.trim().is_empty() {
            return Err(SellError::QuoteUnavailable(
                "aggregator returned no transaction".to_string(),
            ));
        }

        let signed = sign_unsigned_tx(&order.transaction_b64, &request.signer)?;
        debug!(
            event = "swap_signed",
            request_id = %order.request_id,
            versioned = signed.is_versioned()
        );
        let signed_b64 = signed.to_base64()?;

        let signature = self.api.execute(&order.request_id, &signed_b64).await?;
        if signature.trim().is_empty() {
            return Err(SellError::ExecutionRejected(
                "aggregator returned no signature".to_string(),
            ));
        }
        info!(
            event = "swap_submitted",
            signature = %signature,
            input_mint = %order_request.input_mint,
            output_mint = %order_request.output_mint,
            amount_native,
            slippage_bps = request.slippage_bps
        );
        self.journal(TxState::Submitted, &signature, &order_request);

        match self
            .confirmer
            .confirm(&signature, self.commitment, self.confirm_timeout)
            .await
        {
            Ok(()) => {
                self.journal(TxState::Confirmed, &signature, &order_request);
                info!(event = "swap_confirmed", signature = %signature);
                Ok(SwapReceipt {
                    signature,
                    amount_native,
                    decimals,
                })
            }
            Err(err @ SellError::ConfirmationTimeout { .. }) => {
                self.journal(TxState::Unconfirmed, &signature, &order_request);
                warn!(event = "swap_unconfirmed", signature = %signature, error = %err);
                Err(err)
            }
            Err(err) => {
                self.journal(TxState::Failed, &signature, &order_request);
                warn!(event = "swap_failed", signature = %signature, error = %err);
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::tx::testing::unsigned_tx_b64;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct FakeApi {
        decimals: Option<u8>,
        transaction_b64: Mutex<String>,
        signature: String,
        orders: Mutex<Vec<OrderRequest>>,
        executed: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SwapApi for FakeApi {
        async fn token_decimals(&self, _mint: &str) -> Result<u8> {
            self.decimals
                .ok_or_else(|| SellError::RemoteUnavailable("price api down".to_string()))
        }

        async fn order(&self, request: &OrderRequest) -> Result<SwapOrder> {
            self.orders.lock().push(request.clone());
            Ok(SwapOrder {
                transaction_b64: self.transaction_b64.lock().clone(),
                request_id: "req-1".to_string(),
            })
        }

        async fn execute(&self, request_id: &str, signed_tx_b64: &str) -> Result<String> {
            self.executed
                .lock()
                .push((request_id.to_string(), signed_tx_b64.to_string()));
            Ok(self.signature.clone())
        }
    }

    struct FakeConfirmer {
        outcome: fn(&str) -> Result<()>,
    }

    #[async_trait]
    impl SignatureConfirmer for FakeConfirmer {
        async fn confirm(
            &self,
            signature: &str,
            _commitment: Commitment,
            _timeout: Duration,
        ) -> Result<()> {
            (self.outcome)(signature)
        }
    }

    fn confirmed(_: &str) -> Result<()> {
        Ok(())
    }

    fn timed_out(signature: &str) -> Result<()> {
        Err(SellError::ConfirmationTimeout {
            signature: signature.to_string(),
            timeout_secs: 30,
        })
    }

    fn executor(
        api: Arc<FakeApi>,
        outcome: fn(&str) -> Result<()>,
        journal: Arc<MemoryJournal>,
    ) -> SwapExecutor {
        SwapExecutor::new(
            api,
            Arc::new(FakeConfirmer { outcome }),
            journal,
            Commitment::Confirmed,
            Duration::from_secs(30),
        )
    }

    fn request(signer: Keypair, amount_ui: Decimal, input_decimals: Option<u8>) -> SwapRequest {
        SwapRequest {
            signer,
            input_mint: "MintB".to_string(),
            output_mint: NATIVE_MINT.to_string(),
            amount_ui,
            slippage_bps: 50,
            input_decimals,
        }
    }

    fn api_for(keypair: &Keypair, decimals: Option<u8>) -> Arc<FakeApi> {
        Arc::new(FakeApi {
            decimals,
            transaction_b64: Mutex::new(unsigned_tx_b64(&keypair.pubkey())),
            signature: "5igReal".to_string(),
            ..FakeApi::default()
        })
    }

    #[tokio::test]
    async fn swap_orders_exact_native_amount_and_confirms() {
        let keypair = Keypair::new();
        let taker = keypair.pubkey().to_string();
        let api = api_for(&keypair, None);
        let journal = Arc::new(MemoryJournal::default());
        let executor = executor(api.clone(), confirmed, journal.clone());

        let receipt = executor
            .swap(request(keypair, dec!(0.50), Some(2)))
            .await
            .unwrap();

        assert_eq!(receipt.signature, "5igReal");
        assert_eq!(receipt.amount_native, 50);
        let orders = api.orders.lock();
        assert_eq!(orders[0].amount_native, 50);
        assert_eq!(orders[0].taker, taker);
        assert_eq!(orders[0].output_mint, NATIVE_MINT);
        assert_eq!(api.executed.lock()[0].0, "req-1");
        assert_eq!(
            journal.states("5igReal"),
            vec![TxState::Submitted, TxState::Confirmed]
        );
    }

    #[tokio::test]
    async fn missing_decimals_are_looked_up_then_default_to_nine() {
        let keypair = Keypair::new();
        let api = api_for(&keypair, Some(6));
        let executor_six = executor(api.clone(), confirmed, Arc::new(MemoryJournal::default()));
        let receipt = executor_six
            .swap(request(keypair, dec!(1.5), None))
            .await
            .unwrap();
        assert_eq!(receipt.decimals, 6);
        assert_eq!(api.orders.lock()[0].amount_native, 1_500_000);

        let keypair = Keypair::new();
        let api = api_for(&keypair, None);
        let executor_default = executor(api.clone(), confirmed, Arc::new(MemoryJournal::default()));
        let receipt = executor_default
            .swap(request(keypair, dec!(1.5), None))
            .await
            .unwrap();
        assert_eq!(receipt.decimals, DEFAULT_DECIMALS);
        assert_eq!(api.orders.lock()[0].amount_native, 1_500_000_000);
    }

    #[tokio::test]
    async fn dust_amount_is_rejected_before_ordering() {
        let keypair = Keypair::new();
        let api = api_for(&keypair, None);
        let executor = executor(api.clone(), confirmed, Arc::new(MemoryJournal::default()));
        let err = executor
            .swap(request(keypair, dec!(0.001), Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, SellError::InvalidAmount(_)));
        assert!(api.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_transaction_is_quote_unavailable() {
        let keypair = Keypair::new();
        let api = api_for(&keypair, None);
        *api.transaction_b64.lock() = String::new();
        let executor = executor(api.clone(), confirmed, Arc::new(MemoryJournal::default()));
        let err = executor
            .swap(request(keypair, dec!(1), Some(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, SellError::QuoteUnavailable(_)));
        assert!(api.executed.lock().is_empty());
    }

    #[tokio::test]
    async fn confirmation_timeout_keeps_signature_in_journal() {
        let keypair = Keypair::new();
        let api = api_for(&keypair, None);
        let journal = Arc::new(MemoryJournal::default());
        let executor = executor(api, timed_out, journal.clone());
        let err = executor
            .swap(request(keypair, dec!(1), Some(0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SellError::ConfirmationTimeout { ref signature, .. } if signature == "5igReal"
        ));
        assert_eq!(
            journal.states("5igReal"),
            vec![TxState::Submitted, TxState::Unconfirmed]
        );
    }
}
