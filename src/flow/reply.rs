//! Structured replies handed back to whatever presents the conversation.

use rust_decimal::Decimal;

use super::action::SellAction;
use super::SellStep;
use crate::amount::PRESET_PERCENTAGES;
use crate::error::SellError;
use crate::holdings::TokenHolding;
use crate::util::format::{format_bps_percent, format_fixed, short_mint};

const EXPLORER_TX_URL: &str = "https://solscan.io/tx/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    /// A new message in the conversation.
    Message,
    /// Replaces the message whose option was selected.
    Update,
    /// Short acknowledgement of a selection; nothing else changes.
    Notice,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyOption {
    pub label: String,
    pub key: String,
}

impl ReplyOption {
    fn new(label: impl Into<String>, action: &SellAction) -> Self {
        Self {
            label: label.into(),
            key: action.key(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
    pub options: Vec<Vec<ReplyOption>>,
    pub step: SellStep,
}

impl Reply {
    pub fn new(kind: ReplyKind, step: SellStep, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            options: Vec::new(),
            step,
        }
    }

    pub fn with_options(mut self, options: Vec<Vec<ReplyOption>>) -> Self {
        self.options = options;
        self
    }

    pub fn failure(kind: ReplyKind, err: &SellError) -> Self {
        Self::failed_swap(kind, "Sell", err)
    }

    pub fn buy_failure(err: &SellError) -> Self {
        Self::failed_swap(ReplyKind::Message, "Buy", err)
    }

    fn failed_swap(kind: ReplyKind, side: &str, err: &SellError) -> Self {
        let heading = if err.is_ambiguous() {
            format!("{side} submitted, outcome unknown")
        } else {
            format!("{side} failed")
        };
        Self::new(
            kind,
            SellStep::Failed,
            format!("{heading}\n\n{}", err.user_message()),
        )
    }

    pub fn option_keys(&self) -> Vec<&str> {
        self.options
            .iter()
            .flatten()
            .map(|option| option.key.as_str())
            .collect()
    }
}

pub(crate) fn menu(holdings: &[TokenHolding]) -> Reply {
    let mut text = String::from("Select Token to Sell\n");
    let mut rows = Vec::with_capacity(holdings.len());
    for holding in holdings {
        let short = short_mint(&holding.mint);
        text.push_str(&format!(
            "\n{short}\n   Amount: {}\n",
            format_fixed(holding.total_ui(), 4)
        ));
        push_price_lines(&mut text, holding, "   Price", "   Value");
        rows.push(vec![ReplyOption::new(
            format!("{short} ({})", format_fixed(holding.total_ui(), 2)),
            &SellAction::Token(holding.mint.clone()),
        )]);
    }
    Reply::new(ReplyKind::Message, SellStep::MenuShown, text).with_options(rows)
}

pub(crate) fn percentage_prompt(holding: &TokenHolding) -> Reply {
    let mint = &holding.mint;
    let mut text = format!(
        "Sell Token\n\nToken: {mint}\nBalance: {}\n",
        format_fixed(holding.total_ui(), 4)
    );
    push_price_lines(&mut text, holding, "Price", "Total Value");
    text.push_str("\nSelect amount to sell:");

    let mut rows: Vec<Vec<ReplyOption>> = PRESET_PERCENTAGES
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|&percent| {
                    ReplyOption::new(
                        format!("{percent}%"),
                        &SellAction::Percent {
                            mint: mint.clone(),
                            percent,
                        },
                    )
                })
                .collect()
        })
        .collect();
    rows.push(vec![ReplyOption::new(
        "Custom Amount",
        &SellAction::Custom(mint.clone()),
    )]);
    rows.push(vec![ReplyOption::new("Back", &SellAction::Menu)]);

    Reply::new(ReplyKind::Update, SellStep::PercentagePrompted, text).with_options(rows)
}

pub(crate) fn custom_prompt(mint: &str, available_ui: Decimal) -> Reply {
    let text = format!(
        "Custom Sell Amount\n\nToken: {mint}\nAvailable: {}\n\n\
         Reply with the amount you want to sell.\nExample: 100 or 0.5\n\n\
         Send cancel or /cancel to cancel.",
        format_fixed(available_ui, 4)
    );
    Reply::new(ReplyKind::Update, SellStep::AwaitingCustomInput, text).with_options(vec![vec![
        ReplyOption::new("Back", &SellAction::Token(mint.to_string())),
    ]])
}

pub(crate) fn custom_retry() -> Reply {
    Reply::new(
        ReplyKind::Message,
        SellStep::AwaitingCustomInput,
        "Invalid amount. Reply with a positive number, or cancel.",
    )
}

pub(crate) fn sold(
    kind: ReplyKind,
    mint: &str,
    amount_ui: Decimal,
    percent: Option<u8>,
    signature: &str,
) -> Reply {
    let amount = match percent {
        Some(percent) => format!("{} ({percent}%)", format_fixed(amount_ui, 4)),
        None => format_fixed(amount_ui, 4),
    };
    Reply::new(
        kind,
        SellStep::Completed,
        format!(
            "Sell Order Executed!\n\nToken: {mint}\nAmount Sold: {amount}\n\
             Transaction: {EXPLORER_TX_URL}{signature}\n\nSignature: {signature}"
        ),
    )
}

pub(crate) fn bought(
    mint: &str,
    sol_amount: Decimal,
    usd_price: Option<Decimal>,
    slippage_bps: u16,
    signature: &str,
) -> Reply {
    let mut text = format!(
        "Buy Order Executed!\n\nToken: {mint}\nSOL Spent: {} SOL\n",
        sol_amount.normalize()
    );
    if let Some(price) = usd_price {
        text.push_str(&format!("Token Price: ${}\n", format_fixed(price, 6)));
    }
    text.push_str(&format!(
        "Slippage: {}\nTransaction: {EXPLORER_TX_URL}{signature}\n\nSignature: {signature}",
        format_bps_percent(slippage_bps)
    ));
    Reply::new(ReplyKind::Message, SellStep::Completed, text)
}

pub(crate) fn cancelled() -> Reply {
    Reply::new(ReplyKind::Message, SellStep::Cancelled, "Sell cancelled.")
}

fn push_price_lines(text: &mut String, holding: &TokenHolding, price: &str, value: &str) {
    if let (Some(usd_price), Some(usd_value)) = (holding.usd_price, holding.usd_value()) {
        text.push_str(&format!("{price}: ${}\n", format_fixed(usd_price, 6)));
        text.push_str(&format!("{value}: ${}\n", format_fixed(usd_value, 2)));
    }
}
