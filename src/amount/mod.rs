//! Conversions between UI amounts (what the user reads and types) and native
//! base units (what a swap is submitted with).
//!
//! Anything that ends up in a swap request is derived from native integers.
//! UI decimals are for display and for custom amounts typed by the user.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{Result, SellError};

/// Largest decimals value representable as a `Decimal` scale.
pub const MAX_DECIMALS: u8 = 28;

/// Preset percentages offered after a token is selected.
pub const PRESET_PERCENTAGES: [u8; 4] = [10, 25, 50, 100];

/// Scales `amount_ui` up by `10^decimals`, truncating toward zero so a request
/// can never ask for more than the user holds.
pub fn to_native(amount_ui: Decimal, decimals: u8) -> Result<u64> {
    if amount_ui.is_sign_negative() && !amount_ui.is_zero() {
        return Err(SellError::InvalidAmount(format!(
            "{amount_ui} is negative"
        )));
    }
    let factor = pow10(decimals)
        .ok_or_else(|| SellError::InvalidAmount(format!("unsupported decimals {decimals}")))?;
    let scaled = amount_ui
        .checked_mul(factor)
        .ok_or_else(|| SellError::InvalidAmount(format!("{amount_ui} is too large")))?;
    scaled
        .trunc()
        .to_u64()
        .ok_or_else(|| SellError::InvalidAmount(format!("{amount_ui} is too large")))
}

/// Exact inverse of [`to_native`] for amounts that came from native units.
/// Holdings with more than [`MAX_DECIMALS`] are dropped before they get here.
pub fn to_ui(amount_native: u64, decimals: u8) -> Decimal {
    let scale = u32::from(decimals.min(MAX_DECIMALS));
    Decimal::from_i128_with_scale(i128::from(amount_native), scale)
}

/// `floor(total_native * percent / 100)`, except that 100% is the exact total.
pub fn percentage_of_native(total_native: u64, percent: u8) -> Result<u64> {
    if percent == 0 || percent > 100 {
        return Err(SellError::InvalidAmount(format!(
            "percentage must be between 1 and 100, got {percent}"
        )));
    }
    if percent == 100 {
        return Ok(total_native);
    }
    let portion = u128::from(total_native) * u128::from(percent) / 100;
    // portion < total_native, so it always fits
    Ok(portion as u64)
}

/// Parses a user-typed amount. Returns `None` unless the text is a positive number.
pub fn parse_ui_amount(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()?;
    if value <= Decimal::ZERO {
        return None;
    }
    Some(value)
}

fn pow10(decimals: u8) -> Option<Decimal> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    let mut value = Decimal::ONE;
    for _ in 0..decimals {
        value = value.checked_mul(Decimal::TEN)?;
    }
    Some(value)
}
