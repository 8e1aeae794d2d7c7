//! The interactive sell flow: menu → token → percentage or custom amount → swap.
//!
//! Every step except the custom-amount prompt is stateless across turns and
//! re-reads balances from the holdings gateway. The only cross-turn state is the
//! user's pending custom-amount entry.

pub mod action;
pub mod reply;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::amount::{parse_ui_amount, percentage_of_native, to_ui};
use crate::config::MAX_SLIPPAGE_BPS;
use crate::error::{Result, SellError};
use crate::holdings::{aggregate_holdings, load_token_holding, HoldingsGateway, TokenHolding};
use crate::pending::{InputExpectation, PendingStore, SellLocks};
use crate::store::{User, UserStore};
use crate::swap::{SwapReceipt, SwapRequest, Swapper, NATIVE_DECIMALS, NATIVE_MINT};
use crate::util::format::{format_fixed, parse_percent_to_bps};
use crate::wallet::KeyDecryptor;

pub use action::SellAction;
pub use reply::{Reply, ReplyKind, ReplyOption};

const CANCEL_WORD: &str = "cancel";
const DIRECT_SELL_USAGE: &str =
    "Usage: /selllegacy <token_mint> <amount> [slippage%]\nExample: /selllegacy <mint> 100 1";
const BUY_USAGE: &str =
    "Usage: /buy <token_mint> <sol_amount> [slippage%]\nExample: /buy <mint> 0.1 1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SellStep {
    MenuShown,
    TokenSelected,
    PercentagePrompted,
    PercentageConfirmed,
    CustomPrompted,
    AwaitingCustomInput,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl SellStep {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SellStep::Completed | SellStep::Failed | SellStep::Cancelled
        )
    }
}

/// One inbound event from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interaction {
    Command { name: String, args: Vec<String> },
    Selection(String),
    Text(String),
}

#[derive(Clone, Debug)]
pub struct FlowSettings {
    pub slippage_bps: u16,
    pub output_mint: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            slippage_bps: 50,
            output_mint: NATIVE_MINT.to_string(),
        }
    }
}

pub struct SellFlow {
    users: Arc<dyn UserStore>,
    keys: Arc<dyn KeyDecryptor>,
    holdings: Arc<dyn HoldingsGateway>,
    swapper: Arc<dyn Swapper>,
    pending: Arc<PendingStore>,
    locks: Arc<SellLocks>,
    settings: FlowSettings,
}

impl SellFlow {
    pub fn new(
        users: Arc<dyn UserStore>,
        keys: Arc<dyn KeyDecryptor>,
        holdings: Arc<dyn HoldingsGateway>,
        swapper: Arc<dyn Swapper>,
        pending: Arc<PendingStore>,
        locks: Arc<SellLocks>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            users,
            keys,
            holdings,
            swapper,
            pending,
            locks,
            settings,
        }
    }

    /// `None` means the interaction is not for this flow.
    pub async fn handle(&self, user_id: &str, interaction: Interaction) -> Option<Reply> {
        match interaction {
            Interaction::Command { name, args } => {
                match name.trim_start_matches('/').to_ascii_lowercase().as_str() {
                    "sell" => Some(self.show_menu(user_id, ReplyKind::Message).await),
                    "selllegacy" => Some(self.direct_sell(user_id, &args).await),
                    "buy" => Some(self.buy(user_id, &args).await),
                    CANCEL_WORD => self.cancel(user_id),
                    _ => None,
                }
            }
            Interaction::Selection(key) => {
                let reply = match SellAction::parse(&key)? {
                    SellAction::Menu => self.show_menu(user_id, ReplyKind::Update).await,
                    SellAction::Token(mint) => self.select_token(user_id, &mint).await,
                    SellAction::Percent { mint, percent } => {
                        self.sell_percentage(user_id, &mint, percent).await
                    }
                    SellAction::Custom(mint) => self.prompt_custom(user_id, &mint).await,
                };
                Some(reply)
            }
            Interaction::Text(text) => match self.pending.expectation(user_id) {
                InputExpectation::NoExpectation => None,
                InputExpectation::AwaitingAmount(mint) => {
                    let trimmed = text.trim();
                    let word = trimmed.trim_start_matches('/');
                    if word.eq_ignore_ascii_case(CANCEL_WORD) {
                        return self.cancel(user_id);
                    }
                    Some(self.resolve_custom_input(user_id, &mint, trimmed).await)
                }
            },
        }
    }

    fn enter(&self, user_id: &str, step: SellStep) {
        debug!(event = "sell_step", user = %user_id, step = ?step);
    }

    fn cancel(&self, user_id: &str) -> Option<Reply> {
        self.pending.get(user_id)?;
        self.pending.clear(user_id);
        info!(event = "sell_cancelled", user = %user_id);
        Some(reply::cancelled())
    }

    async fn find_user(&self, user_id: &str) -> Result<User> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| SellError::UserNotFound(user_id.to_string()))
    }

    async fn show_menu(&self, user_id: &str, kind: ReplyKind) -> Reply {
        match self.load_menu(user_id).await {
            Ok(mut reply) => {
                reply.kind = kind;
                reply
            }
            Err(err) => {
                warn!(event = "sell_menu_failed", user = %user_id, error = %err);
                Reply::new(kind, SellStep::Failed, err.user_message())
            }
        }
    }

    async fn load_menu(&self, user_id: &str) -> Result<Reply> {
        let user = self.find_user(user_id).await?;
        let raw = self.holdings.fetch_holdings(&user.wallet_address).await?;
        let mut holdings = aggregate_holdings(&raw, &HashMap::new());
        if holdings.is_empty() {
            return Ok(Reply::new(
                ReplyKind::Message,
                SellStep::Completed,
                "No tokens with balance found in your wallet.",
            ));
        }
        let mints: Vec<String> = holdings.iter().map(|h| h.mint.clone()).collect();
        let prices = self.holdings.fetch_prices(&mints).await;
        for holding in &mut holdings {
            holding.usd_price = prices.get(&holding.mint).copied();
        }
        Ok(reply::menu(&holdings))
    }

    async fn load_holding(&self, user: &User, mint: &str) -> Result<Option<TokenHolding>> {
        load_token_holding(self.holdings.as_ref(), &user.wallet_address, mint).await
    }

    async fn select_token(&self, user_id: &str, mint: &str) -> Reply {
        self.enter(user_id, SellStep::TokenSelected);
        let result = async {
            let user = self.find_user(user_id).await?;
            self.load_holding(&user, mint).await
        }
        .await;
        match result {
            Ok(Some(holding)) => reply::percentage_prompt(&holding),
            Ok(None) => Reply::new(
                ReplyKind::Notice,
                SellStep::Failed,
                "No balance for this token.",
            ),
            Err(err) => {
                warn!(event = "sell_token_failed", user = %user_id, mint = %mint, error = %err);
                Reply::new(ReplyKind::Notice, SellStep::Failed, err.user_message())
            }
        }
    }

    async fn sell_percentage(&self, user_id: &str, mint: &str, percent: u8) -> Reply {
        self.enter(user_id, SellStep::PercentageConfirmed);
        let result = async {
            let user = self.find_user(user_id).await?;
            let _guard = self
                .locks
                .try_acquire(user_id)
                .ok_or_else(|| SellError::SellInProgress(user_id.to_string()))?;
            self.pending.clear(user_id);

            let holding = self.load_holding(&user, mint).await?.ok_or_else(|| {
                SellError::InvalidAmount("no balance for this token".to_string())
            })?;
            let amount_native = percentage_of_native(holding.total_native, percent)?;
            if amount_native == 0 {
                return Err(SellError::InvalidAmount(format!(
                    "{percent}% of your balance is below the smallest unit of this token"
                )));
            }
            let amount_ui = to_ui(amount_native, holding.decimals);
            let receipt = self
                .execute(
                    &user,
                    mint,
                    &self.settings.output_mint,
                    amount_ui,
                    Some(holding.decimals),
                    self.settings.slippage_bps,
                )
                .await?;
            Ok((amount_ui, receipt))
        }
        .await;

        match result {
            Ok((amount_ui, receipt)) => reply::sold(
                ReplyKind::Update,
                mint,
                amount_ui,
                Some(percent),
                &receipt.signature,
            ),
            Err(err) => {
                warn!(
                    event = "sell_percent_failed",
                    user = %user_id,
                    mint = %mint,
                    percent,
                    error = %err
                );
                Reply::failure(ReplyKind::Update, &err)
            }
        }
    }

    async fn prompt_custom(&self, user_id: &str, mint: &str) -> Reply {
        self.enter(user_id, SellStep::CustomPrompted);
        let result = async {
            let user = self.find_user(user_id).await?;
            self.load_holding(&user, mint).await
        }
        .await;
        match result {
            Ok(holding) => {
                let available = holding.map(|h| h.total_ui()).unwrap_or(Decimal::ZERO);
                self.pending.set(user_id, mint);
                info!(event = "sell_custom_pending", user = %user_id, mint = %mint);
                reply::custom_prompt(mint, available)
            }
            Err(err) => {
                warn!(event = "sell_custom_failed", user = %user_id, mint = %mint, error = %err);
                Reply::new(ReplyKind::Notice, SellStep::Failed, err.user_message())
            }
        }
    }

    async fn resolve_custom_input(&self, user_id: &str, mint: &str, text: &str) -> Reply {
        let Some(amount_ui) = parse_ui_amount(text) else {
            return reply::custom_retry();
        };
        self.pending.clear(user_id);

        let result = async {
            let user = self.find_user(user_id).await?;
            let _guard = self
                .locks
                .try_acquire(user_id)
                .ok_or_else(|| SellError::SellInProgress(user_id.to_string()))?;
            let holding = self.load_holding(&user, mint).await?;
            let available = holding.as_ref().map(|h| h.total_ui()).unwrap_or(Decimal::ZERO);
            if amount_ui > available {
                return Err(SellError::InvalidAmount(format!(
                    "insufficient balance, you have {} tokens",
                    format_fixed(available, 4)
                )));
            }
            let decimals = holding.map(|h| h.decimals);
            self.execute(
                &user,
                mint,
                &self.settings.output_mint,
                amount_ui,
                decimals,
                self.settings.slippage_bps,
            )
            .await
        }
        .await;

        match result {
            Ok(receipt) => reply::sold(
                ReplyKind::Message,
                mint,
                amount_ui,
                None,
                &receipt.signature,
            ),
            Err(err) => {
                warn!(event = "sell_custom_failed", user = %user_id, mint = %mint, error = %err);
                Reply::failure(ReplyKind::Message, &err)
            }
        }
    }

    async fn direct_sell(&self, user_id: &str, args: &[String]) -> Reply {
        let Some((mint, amount_ui, slippage_bps)) = self.parse_direct_args(args) else {
            return Reply::new(ReplyKind::Message, SellStep::Failed, DIRECT_SELL_USAGE);
        };

        let result = async {
            let user = self.find_user(user_id).await?;
            let _guard = self
                .locks
                .try_acquire(user_id)
                .ok_or_else(|| SellError::SellInProgress(user_id.to_string()))?;
            self.execute(
                &user,
                &mint,
                &self.settings.output_mint,
                amount_ui,
                None,
                slippage_bps,
            )
            .await
        }
        .await;

        match result {
            Ok(receipt) => reply::sold(
                ReplyKind::Message,
                &mint,
                amount_ui,
                None,
                &receipt.signature,
            ),
            Err(err) => {
                warn!(event = "sell_direct_failed", user = %user_id, mint = %mint, error = %err);
                Reply::failure(ReplyKind::Message, &err)
            }
        }
    }

    /// Spends `sol_amount` of native SOL on `mint`.
    async fn buy(&self, user_id: &str, args: &[String]) -> Reply {
        let Some((mint, sol_amount, slippage_bps)) = self.parse_direct_args(args) else {
            return Reply::new(ReplyKind::Message, SellStep::Failed, BUY_USAGE);
        };

        let result = async {
            let user = self.find_user(user_id).await?;
            let _guard = self
                .locks
                .try_acquire(user_id)
                .ok_or_else(|| SellError::SellInProgress(user_id.to_string()))?;
            self.execute(
                &user,
                NATIVE_MINT,
                &mint,
                sol_amount,
                Some(NATIVE_DECIMALS),
                slippage_bps,
            )
            .await
        }
        .await;

        match result {
            Ok(receipt) => {
                let price = self.holdings.fetch_prices(&[mint.clone()]).await;
                reply::bought(
                    &mint,
                    sol_amount,
                    price.get(&mint).copied(),
                    slippage_bps,
                    &receipt.signature,
                )
            }
            Err(err) => {
                warn!(event = "buy_failed", user = %user_id, mint = %mint, error = %err);
                Reply::buy_failure(&err)
            }
        }
    }

    fn parse_direct_args(&self, args: &[String]) -> Option<(String, Decimal, u16)> {
        let [mint, amount, rest @ ..] = args else {
            return None;
        };
        let amount_ui = parse_ui_amount(amount)?;
        let slippage_bps = match rest {
            [] => self.settings.slippage_bps,
            [slippage] => parse_percent_to_bps(slippage, "slippage")
                .ok()
                .filter(|bps| *bps <= MAX_SLIPPAGE_BPS)?,
            _ => return None,
        };
        Some((mint.trim().to_string(), amount_ui, slippage_bps))
    }

    async fn execute(
        &self,
        user: &User,
        input_mint: &str,
        output_mint: &str,
        amount_ui: Decimal,
        input_decimals: Option<u8>,
        slippage_bps: u16,
    ) -> Result<SwapReceipt> {
        // argon2 key derivation is CPU-bound; keep it off the async workers.
        let keys = Arc::clone(&self.keys);
        let blob = user.encrypted_key.clone();
        let signer = tokio::task::spawn_blocking(move || keys.decrypt(&blob))
            .await
            .map_err(|err| SellError::DecryptionFailed(format!("key task: {err}")))??;
        self.enter(&user.id, SellStep::Executing);
        info!(
            event = "swap_executing",
            user = %user.id,
            input_mint = %input_mint,
            output_mint = %output_mint,
            amount_ui = %amount_ui,
            slippage_bps
        );
        self.swapper
            .swap(SwapRequest {
                signer,
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                amount_ui,
                slippage_bps,
                input_decimals,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use solana_sdk::signature::Keypair;

    use super::*;
    use crate::holdings::testing::FakeHoldings;
    use crate::store::testing::MemoryUserStore;
    use crate::swap::testing::{RecordedSwap, RecordingSwapper};

    const USER: &str = "42";

    struct FakeKeys {
        keypair: Keypair,
        fail: bool,
        delay: Duration,
    }

    impl KeyDecryptor for FakeKeys {
        fn decrypt(&self, _blob: &str) -> Result<Keypair> {
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(SellError::DecryptionFailed("aead tag mismatch".to_string()));
            }
            Ok(self.keypair.insecure_clone())
        }
    }

    struct Harness {
        flow: SellFlow,
        holdings: Arc<FakeHoldings>,
        swapper: Arc<RecordingSwapper>,
        pending: Arc<PendingStore>,
        locks: Arc<SellLocks>,
    }

    impl Harness {
        fn new(holdings: FakeHoldings) -> Self {
            Self::build(holdings, false)
        }

        fn build(holdings: FakeHoldings, fail_decrypt: bool) -> Self {
            Self::with_keys(
                holdings,
                FakeKeys {
                    keypair: Keypair::new(),
                    fail: fail_decrypt,
                    delay: Duration::ZERO,
                },
            )
        }

        fn with_keys(holdings: FakeHoldings, keys: FakeKeys) -> Self {
            let users = Arc::new(MemoryUserStore::with_user(User {
                id: USER.to_string(),
                wallet_address: "Wallet1".to_string(),
                encrypted_key: "v1:blob".to_string(),
                display_name: None,
            }));
            let holdings = Arc::new(holdings);
            let swapper = Arc::new(RecordingSwapper::default());
            let pending = Arc::new(PendingStore::new(Duration::from_secs(600)));
            let locks = SellLocks::new();
            let flow = SellFlow::new(
                users,
                Arc::new(keys),
                holdings.clone(),
                swapper.clone(),
                pending.clone(),
                locks.clone(),
                FlowSettings::default(),
            );
            Self {
                flow,
                holdings,
                swapper,
                pending,
                locks,
            }
        }

        async fn select(&self, key: &str) -> Option<Reply> {
            self.flow
                .handle(USER, Interaction::Selection(key.to_string()))
                .await
        }

        async fn text(&self, text: &str) -> Option<Reply> {
            self.flow.handle(USER, Interaction::Text(text.to_string())).await
        }

        async fn command(&self, name: &str, args: &[&str]) -> Option<Reply> {
            self.flow
                .handle(
                    USER,
                    Interaction::Command {
                        name: name.to_string(),
                        args: args.iter().map(|arg| arg.to_string()).collect(),
                    },
                )
                .await
        }

        fn swaps(&self) -> Vec<RecordedSwap> {
            self.swapper.calls.lock().clone()
        }
    }

    #[tokio::test]
    async fn menu_offers_one_option_per_token_with_balance() {
        let fake = FakeHoldings::with_balance("MintA", 1_000_000, 6);
        fake.set_balance("MintB", 500, 2);
        fake.set_balance("MintZ", 0, 9);
        fake.prices.lock().insert("MintA".to_string(), dec!(2));
        let harness = Harness::new(fake);

        let reply = harness.command("sell", &[]).await.unwrap();
        assert_eq!(reply.step, SellStep::MenuShown);
        assert_eq!(reply.kind, ReplyKind::Message);
        assert_eq!(
            reply.option_keys(),
            vec!["sell_token:MintA", "sell_token:MintB"]
        );
        assert!(reply.text.contains("Value: $2.00"));
    }

    #[tokio::test]
    async fn menu_reports_empty_wallet_and_remote_failure_differently() {
        let harness = Harness::new(FakeHoldings::default());
        let empty = harness.command("/sell", &[]).await.unwrap();
        assert!(empty.text.contains("No tokens"));
        assert!(empty.options.is_empty());

        *harness.holdings.fail_holdings.lock() = true;
        let failed = harness.select("sell_menu").await.unwrap();
        assert_eq!(failed.step, SellStep::Failed);
        assert_eq!(failed.kind, ReplyKind::Update);
        assert!(failed.text.contains("Could not reach"));
    }

    #[tokio::test]
    async fn unknown_user_is_told_to_create_a_wallet() {
        let harness = Harness::new(FakeHoldings::default());
        let reply = harness
            .flow
            .handle(
                "nobody",
                Interaction::Command {
                    name: "sell".to_string(),
                    args: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert!(reply.text.contains("No wallet found"));
    }

    #[tokio::test]
    async fn token_selection_offers_percentages() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        let reply = harness.select("sell_token:MintA").await.unwrap();
        assert_eq!(reply.step, SellStep::PercentagePrompted);
        assert_eq!(
            reply.option_keys(),
            vec![
                "sell_percent:MintA:10",
                "sell_percent:MintA:25",
                "sell_percent:MintA:50",
                "sell_percent:MintA:100",
                "sell_custom:MintA",
                "sell_menu",
            ]
        );
    }

    #[tokio::test]
    async fn zero_balance_selection_is_terminal_without_pending() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 0, 6));
        let reply = harness.select("sell_token:MintA").await.unwrap();
        assert_eq!(reply.kind, ReplyKind::Notice);
        assert!(reply.step.is_terminal());
        assert!(reply.text.contains("No balance"));
        assert!(harness.pending.is_empty());
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn ten_percent_of_small_balance_sells_exact_native_amount() {
        let harness = Harness::new(FakeHoldings::with_balance("MintB", 500, 2));
        let reply = harness.select("sell_percent:MintB:10").await.unwrap();
        assert_eq!(reply.step, SellStep::Completed);
        assert!(reply.text.contains("0.5000 (10%)"));

        let swaps = harness.swaps();
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].amount_ui, dec!(0.50));
        assert_eq!(swaps[0].input_mint, "MintB");
        assert_eq!(swaps[0].output_mint, NATIVE_MINT);
        assert_eq!(swaps[0].slippage_bps, 50);
        assert_eq!(swaps[0].input_decimals, Some(2));
    }

    #[tokio::test]
    async fn quarter_and_full_sells_use_native_math() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        harness.select("sell_percent:MintA:25").await.unwrap();
        harness.select("sell_percent:MintA:100").await.unwrap();
        let swaps = harness.swaps();
        assert_eq!(swaps[0].amount_ui, dec!(0.25));
        assert_eq!(swaps[1].amount_ui, dec!(1));
    }

    #[tokio::test]
    async fn percentage_sell_clears_pending_and_releases_lock() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000, 0));
        harness.select("sell_custom:MintA").await.unwrap();
        assert!(!harness.pending.is_empty());

        harness.select("sell_percent:MintA:50").await.unwrap();
        assert!(harness.pending.is_empty());
        assert!(!harness.locks.is_locked(USER));
        assert!(harness.text("5").await.is_none());
    }

    #[tokio::test]
    async fn custom_amount_executes_once_and_clears_pending() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        let prompt = harness.select("sell_custom:MintA").await.unwrap();
        assert_eq!(prompt.step, SellStep::AwaitingCustomInput);
        assert!(prompt.text.contains("Available: 1.0000"));
        assert_eq!(prompt.option_keys(), vec!["sell_token:MintA"]);

        let reply = harness.text(" 0.5 ").await.unwrap();
        assert_eq!(reply.step, SellStep::Completed);
        assert_eq!(harness.swaps()[0].amount_ui, dec!(0.5));
        assert!(harness.pending.is_empty());
        assert!(harness.text("0.5").await.is_none());
        assert_eq!(harness.swaps().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_pending_makes_later_numbers_fall_through() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        harness.select("sell_custom:MintA").await.unwrap();
        let cancelled = harness.text("CANCEL").await.unwrap();
        assert_eq!(cancelled.step, SellStep::Cancelled);

        assert!(harness.text("0.5").await.is_none());
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn cancel_command_only_answers_with_pending_entry() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        assert!(harness.command("cancel", &[]).await.is_none());
        harness.select("sell_custom:MintA").await.unwrap();
        let reply = harness.command("/cancel", &[]).await.unwrap();
        assert_eq!(reply.step, SellStep::Cancelled);
        assert!(harness.pending.is_empty());
    }

    #[tokio::test]
    async fn custom_amount_above_fresh_balance_is_rejected_and_cleared() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        harness.select("sell_custom:MintA").await.unwrap();
        harness.holdings.set_balance("MintA", 100_000, 6);

        let reply = harness.text("0.5").await.unwrap();
        assert_eq!(reply.step, SellStep::Failed);
        assert!(reply.text.contains("Invalid amount"));
        assert!(reply.text.contains("0.1000"));
        assert!(harness.pending.is_empty());
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn non_numeric_custom_input_keeps_pending() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        harness.select("sell_custom:MintA").await.unwrap();
        for text in ["abc", "-1", "0"] {
            let reply = harness.text(text).await.unwrap();
            assert_eq!(reply.step, SellStep::AwaitingCustomInput);
        }
        assert_eq!(harness.pending.get(USER).as_deref(), Some("MintA"));
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn text_without_pending_and_foreign_keys_fall_through() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        assert!(harness.text("100").await.is_none());
        assert!(harness.select("buy_token:MintA").await.is_none());
        assert!(harness.command("balance", &[]).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_custom_prompt_expires() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        harness.select("sell_custom:MintA").await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(harness.text("0.5").await.is_none());
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn custom_prompt_is_not_recorded_when_holdings_fail() {
        let fake = FakeHoldings::with_balance("MintA", 1_000_000, 6);
        *fake.fail_holdings.lock() = true;
        let harness = Harness::new(fake);
        let reply = harness.select("sell_custom:MintA").await.unwrap();
        assert_eq!(reply.step, SellStep::Failed);
        assert!(harness.pending.is_empty());
    }

    #[tokio::test]
    async fn decryption_failure_asks_for_reimport_without_swapping() {
        let harness = Harness::build(FakeHoldings::with_balance("MintA", 1_000_000, 6), true);
        let reply = harness.select("sell_percent:MintA:50").await.unwrap();
        assert_eq!(reply.step, SellStep::Failed);
        assert!(reply.text.contains("re-import"));
        assert!(harness.swaps().is_empty());
    }

    #[tokio::test]
    async fn concurrent_sell_for_same_user_is_refused() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        let guard = harness.locks.try_acquire(USER).unwrap();
        let reply = harness.select("sell_percent:MintA:50").await.unwrap();
        assert!(reply.text.contains("still in progress"));
        assert!(harness.swaps().is_empty());
        drop(guard);

        harness.select("sell_percent:MintA:50").await.unwrap();
        assert_eq!(harness.swaps().len(), 1);
    }

    #[tokio::test]
    async fn slow_key_decryption_does_not_stall_the_runtime() {
        let harness = Harness::with_keys(
            FakeHoldings::with_balance("MintA", 1_000_000, 6),
            FakeKeys {
                keypair: Keypair::new(),
                fail: false,
                delay: Duration::from_millis(300),
            },
        );
        let observer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            harness.swaps().len()
        };
        let (reply, swaps_seen_mid_decrypt) =
            tokio::join!(harness.select("sell_percent:MintA:50"), observer);
        assert_eq!(swaps_seen_mid_decrypt, 0);
        assert_eq!(reply.unwrap().step, SellStep::Completed);
        assert_eq!(harness.swaps().len(), 1);
    }

    #[tokio::test]
    async fn swap_failure_is_reported_and_leaves_no_state() {
        let harness = Harness::new(FakeHoldings::with_balance("MintA", 1_000_000, 6));
        *harness.swapper.fail_with.lock() =
            Some(|| SellError::QuoteUnavailable("no route".to_string()));
        let reply = harness.select("sell_percent:MintA:100").await.unwrap();
        assert_eq!(reply.step, SellStep::Failed);
        assert!(reply.text.contains("no route"));
        assert!(harness.pending.is_empty());
        assert!(!harness.locks.is_locked(USER));
    }

    #[tokio::test]
    async fn direct_sell_parses_amount_and_slippage() {
        let harness = Harness::new(FakeHoldings::default());
        let reply = harness
            .command("selllegacy", &["MintC", "100", "1"])
            .await
            .unwrap();
        assert_eq!(reply.step, SellStep::Completed);
        let swaps = harness.swaps();
        assert_eq!(swaps[0].amount_ui, dec!(100));
        assert_eq!(swaps[0].slippage_bps, 100);
        assert_eq!(swaps[0].input_decimals, None);

        for args in [&["MintC"][..], &["MintC", "-5"], &["MintC", "1", "x"]] {
            let usage = harness.command("selllegacy", args).await.unwrap();
            assert!(usage.text.starts_with("Usage"));
        }
        assert_eq!(harness.swaps().len(), 1);
    }

    #[tokio::test]
    async fn buy_spends_native_sol_on_the_token() {
        let fake = FakeHoldings::default();
        fake.prices.lock().insert("MintC".to_string(), dec!(0.0125));
        let harness = Harness::new(fake);
        let reply = harness
            .command("/buy", &["MintC", "0.1", "1.5"])
            .await
            .unwrap();
        assert_eq!(reply.step, SellStep::Completed);
        assert!(reply.text.contains("SOL Spent: 0.1 SOL"));
        assert!(reply.text.contains("Token Price: $0.012500"));
        assert!(reply.text.contains("Slippage: 1.5%"));

        let swaps = harness.swaps();
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].input_mint, NATIVE_MINT);
        assert_eq!(swaps[0].output_mint, "MintC");
        assert_eq!(swaps[0].amount_ui, dec!(0.1));
        assert_eq!(swaps[0].slippage_bps, 150);
        assert_eq!(swaps[0].input_decimals, Some(9));

        harness.command("buy", &["MintC", "0.2"]).await.unwrap();
        assert_eq!(harness.swaps()[1].slippage_bps, 50);

        for args in [&["MintC"][..], &["MintC", "0"], &["MintC", "1", "101"]] {
            let usage = harness.command("buy", args).await.unwrap();
            assert!(usage.text.starts_with("Usage: /buy"));
        }
        assert_eq!(harness.swaps().len(), 2);
    }

    #[tokio::test]
    async fn buy_failure_is_labelled_as_a_buy_and_releases_lock() {
        let harness = Harness::new(FakeHoldings::default());
        *harness.swapper.fail_with.lock() =
            Some(|| SellError::ExecutionRejected("insufficient SOL".to_string()));
        let reply = harness.command("buy", &["MintC", "5"]).await.unwrap();
        assert_eq!(reply.step, SellStep::Failed);
        assert!(reply.text.starts_with("Buy failed"));
        assert!(reply.text.contains("insufficient SOL"));
        assert!(!harness.locks.is_locked(USER));
    }
}
