use anyhow::{anyhow, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::amount::parse_ui_amount;

/// `"1"`, `"1%"` or `"0.5"` percent → basis points.
pub fn parse_percent_to_bps(raw: &str, field: &str) -> Result<u16> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{field} must not be empty"));
    }
    let numeric = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let pct = parse_ui_amount(numeric)
        .ok_or_else(|| anyhow!("{field} must be a positive percent like 1 or 0.5%"))?;
    let bps = (pct * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    bps.to_u16().ok_or_else(|| anyhow!("{field} is too large"))
}

pub fn format_bps_percent(bps: u16) -> String {
    let pct = Decimal::new(i64::from(bps), 2).normalize();
    format!("{pct}%")
}

/// Fixed decimal places, rounded half away from zero.
pub fn format_fixed(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.prec$}", prec = dp as usize)
}

/// `ABCDEFGH...STUVWXYZ`; short inputs are returned unchanged.
pub fn short_mint(mint: &str) -> String {
    let chars: Vec<char> = mint.chars().collect();
    if chars.len() <= 16 {
        return mint.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 8..].iter().collect();
    format!("{head}...{tail}")
}
