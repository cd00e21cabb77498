//! Amount handling utilities for token decimals

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::error::{AgentError, Result};

/// Token metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub native: bool,
}

/// Largest decimals value representable by `Decimal` scaling
const MAX_DECIMALS: u8 = 28;

/// Convert UI amount (human readable) to raw amount (u128)
///
/// # Safety
/// - Validates amount is non-negative
/// - Checks for overflow (amount must fit in u128)
/// - Rejects non-zero amounts that round to zero
pub fn to_raw_amount(ui_amount: Decimal, decimals: u8) -> Result<u128> {
    if ui_amount < Decimal::ZERO {
        return Err(AgentError::Config(format!(
            "Amount cannot be negative: {}",
            ui_amount
        )));
    }

    let multiplier = scale_factor(decimals)?;
    let raw = ui_amount
        .checked_mul(multiplier)
        .ok_or_else(|| {
            AgentError::Config(format!(
                "Amount {} with {} decimals overflows",
                ui_amount, decimals
            ))
        })?
        .trunc();

    let raw_u128 = raw.to_u128().ok_or_else(|| {
        AgentError::Config(format!(
            "Amount {} with {} decimals does not fit u128",
            ui_amount, decimals
        ))
    })?;

    if raw_u128 == 0 && ui_amount > Decimal::ZERO {
        return Err(AgentError::Config(format!(
            "Amount {} too small for {} decimals (rounds to 0)",
            ui_amount, decimals
        )));
    }

    Ok(raw_u128)
}

/// Convert raw amount (u128) to UI amount (human readable)
///
/// Returns `None` when the raw amount exceeds what `Decimal` can hold.
pub fn from_raw_amount(raw_amount: u128, decimals: u8) -> Option<Decimal> {
    let divisor = scale_factor(decimals).ok()?;
    to_decimal(raw_amount).map(|d| d / divisor)
}

/// Lossless u128 -> Decimal, `None` beyond ~7.9e28
pub fn to_decimal(raw: u128) -> Option<Decimal> {
    Decimal::from_u128(raw)
}

/// Decimal -> u128, truncating toward zero; negatives clamp to zero
pub fn to_raw_floor(value: Decimal) -> Option<u128> {
    if value <= Decimal::ZERO {
        return Some(0);
    }
    value.trunc().to_u128()
}

/// Render a raw amount for log lines, e.g. `1.5 WAVAX`
pub fn format_amount(raw: u128, token: &TokenInfo) -> String {
    match from_raw_amount(raw, token.decimals) {
        Some(ui) => format!("{} {}", ui.normalize(), token.symbol),
        None => format!("{} raw {}", raw, token.symbol),
    }
}

fn scale_factor(decimals: u8) -> Result<Decimal> {
    if decimals > MAX_DECIMALS {
        return Err(AgentError::Config(format!(
            "Unsupported token decimals: {}",
            decimals
        )));
    }
    Ok(Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0))
}

/// Get token info from the static Avalanche C-Chain mapping
///
/// Accepts either a symbol or a contract address.
pub fn get_token_info(symbol_or_address: &str) -> Option<TokenInfo> {
    let info = match symbol_or_address {
        "AVAX" => TokenInfo {
            address: "native".to_string(),
            symbol: "AVAX".to_string(),
            decimals: 18,
            native: true,
        },
        "WAVAX" | "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7" => TokenInfo {
            address: "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7".to_string(),
            symbol: "WAVAX".to_string(),
            decimals: 18,
            native: false,
        },
        "BTC.b" | "BTCB" | "0x152b9d0FdC40C096757F570A51E494bd4b943E50" => TokenInfo {
            address: "0x152b9d0FdC40C096757F570A51E494bd4b943E50".to_string(),
            symbol: "BTC.b".to_string(),
            decimals: 8,
            native: false,
        },
        "USDC" | "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E" => TokenInfo {
            address: "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E".to_string(),
            symbol: "USDC".to_string(),
            decimals: 6,
            native: false,
        },
        _ => return None,
    };

    Some(info)
}

/// Serde adapter: raw u128 amounts travel as decimal strings on the wire
pub mod raw_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse::<u128>().map_err(de::Error::custom)
    }
}
