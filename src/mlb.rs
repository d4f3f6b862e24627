// src/mlb.rs - logic-board serials (MLBs)
// The recovery service keys its answers on the board-id and the MLB.

use crate::error::{Error, Result};

/// Recent board whose previous and current releases are known to differ.
pub const RECENT_MAC: &str = "Mac-27AD2F918AE68F61";
/// Anonymous serial accepted for every board.
pub const MLB_ZERO: &str = "00000000000000000";
/// A real serial for `RECENT_MAC`.
pub const MLB_VALID: &str = "F5K105303J9K3F71M";
/// Product-class serial for `RECENT_MAC`: the manufacturing prefix and
/// the EEEE code kept, the unit digits zeroed.
pub const MLB_PRODUCT: &str = "F5K00000000K3F700";

pub const MLB_LEN: usize = 17;
const PRODUCT_SLICE: std::ops::Range<usize> = 11..15;
const ANONYMOUS_PREFIX: &str = "000";

/// Keep only characters 11..15 of `mlb`, zeros elsewhere. Serials shorter
/// than 17 characters come back unchanged.
pub fn product_mlb(mlb: &str) -> String {
    match mlb.get(PRODUCT_SLICE) {
        Some(code) if mlb.len() >= MLB_LEN => format!("00000000000{code}00"),
        _ => mlb.to_string(),
    }
}

/// Expand a 4-character EEEE product code into a full serial.
pub fn mlb_from_eeee(code: &str) -> Result<String> {
    if code.chars().count() != 4 {
        return Err(Error::InvalidEeee(code.to_string()));
    }
    Ok(format!("00000000000{code}00"))
}

/// The service's own convention for a serial that names no device.
pub fn is_anonymous(mlb: &str) -> bool {
    mlb.starts_with(ANONYMOUS_PREFIX)
}

pub fn validate(mlb: &str) -> Result<&str> {
    if mlb.chars().count() != MLB_LEN {
        return Err(Error::InvalidMlb(mlb.to_string()));
    }
    Ok(mlb)
}

/// Resolve `--code` over `--mlb`, then check the length.
pub fn resolve(mlb: &str, code: Option<&str>) -> Result<String> {
    let mlb = match code {
        Some(code) => mlb_from_eeee(code)?,
        None => mlb.to_string(),
    };
    validate(&mlb)?;
    Ok(mlb)
}
