//! Capacity quantities
//!
//! Conversion between Kubernetes resource quantities ("20Gi", "500M",
//! "1073741824") and byte counts.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity string to bytes, rounding fractional bytes up
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }
    if s.starts_with('-') {
        return Err(Error::CapacityParse(format!("negative capacity: {}", s)));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    // Find where the number ends and unit begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = &s[num_end..];

    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (num_str, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::CapacityParse(format!("invalid number: {}", s)));
    }

    // (numerator multiplier, denominator) so milli units stay integral
    let (multiplier, divisor): (u128, u128) = match unit_str {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        other => match other.strip_prefix(['e', 'E']) {
            Some(exp) if !exp.is_empty() && exp.chars().all(|c| c.is_ascii_digit()) => {
                let exp: u32 = exp
                    .parse()
                    .map_err(|_| Error::CapacityParse(format!("invalid exponent: {}", other)))?;
                let mult = 10u128
                    .checked_pow(exp)
                    .ok_or_else(|| Error::CapacityParse(format!("exponent too large: {}", other)))?;
                (mult, 1)
            }
            _ => {
                return Err(Error::CapacityParse(format!("unknown unit: {}", unit_str)));
            }
        },
    };

    let int_value: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?
    };
    let frac_value: u128 = if frac_part.is_empty() {
        0
    } else {
        frac_part
            .parse()
            .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?
    };
    let frac_scale = 10u128
        .checked_pow(frac_part.len() as u32)
        .ok_or_else(|| Error::CapacityParse(format!("too many decimals: {}", num_str)))?;

    let overflow = || Error::CapacityParse(format!("capacity overflow: {}", s));
    let numerator = int_value
        .checked_mul(multiplier)
        .and_then(|v| v.checked_mul(frac_scale))
        .and_then(|v| v.checked_add(frac_value.checked_mul(multiplier)?))
        .ok_or_else(overflow)?;
    let denominator = frac_scale.checked_mul(divisor).ok_or_else(overflow)?;
    let bytes = numerator.div_ceil(denominator);

    u64::try_from(bytes).map_err(|_| Error::CapacityParse(format!("capacity overflow: {}", s)))
}

/// Parse a quantity object to bytes
pub fn quantity_to_bytes(quantity: &Quantity) -> Result<u64> {
    parse_capacity(&quantity.0)
}

/// Render a byte count as a plain integer quantity
pub fn bytes_to_quantity(bytes: u64) -> Quantity {
    Quantity(bytes.to_string())
}
