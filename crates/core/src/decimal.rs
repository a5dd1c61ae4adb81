//! Decimal quantities and money.
//!
//! Stock quantities and prices are exact decimals; floating point never
//! touches the ledger.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// A stock quantity (units of the item's unit of measure).
pub type Quantity = Decimal;

/// A monetary amount (unit cost, total cost).
pub type Money = Decimal;

/// Number of fractional digits persisted for quantities and money
/// (`NUMERIC(20, 6)`).
pub const DECIMAL_SCALE: u32 = 6;

/// Exclusive upper bound on any stored magnitude: `NUMERIC(20, 6)` keeps 14
/// integer digits (10^14).
pub const MAX_MAGNITUDE: Decimal = Decimal::from_parts(0x107A_4000, 0x5AF3, 0, false, 0);

/// Round to the persisted scale and strip trailing zeros.
pub fn normalize(value: Decimal) -> Decimal {
    value.round_dp(DECIMAL_SCALE).normalize()
}

/// Require `0 < value < MAX_MAGNITUDE` with at most six decimal places.
pub fn ensure_positive(value: Decimal, field: &str) -> DomainResult<()> {
    if value <= Decimal::ZERO {
        return Err(DomainError::invalid_input(format!(
            "{field} must be positive (got {value})"
        )));
    }
    ensure_in_range(value, field)?;
    if value.round_dp(DECIMAL_SCALE) != value {
        return Err(DomainError::invalid_input(format!(
            "{field} has more than {DECIMAL_SCALE} decimal places (got {value})"
        )));
    }
    Ok(())
}

/// Require `0 <= value < MAX_MAGNITUDE`.
pub fn ensure_non_negative(value: Decimal, field: &str) -> DomainResult<()> {
    if value < Decimal::ZERO {
        return Err(DomainError::invalid_input(format!(
            "{field} cannot be negative (got {value})"
        )));
    }
    ensure_in_range(value, field)
}

fn ensure_in_range(value: Decimal, field: &str) -> DomainResult<()> {
    if value.abs() >= MAX_MAGNITUDE {
        return Err(DomainError::invalid_input(format!(
            "{field} is out of range (got {value}, limit {MAX_MAGNITUDE})"
        )));
    }
    Ok(())
}

/// `a + b`, failing with `InvalidInput` instead of overflowing or leaving the
/// storable range.
pub fn checked_add(a: Decimal, b: Decimal, field: &str) -> DomainResult<Decimal> {
    bounded(a.checked_add(b), field, || format!("{a} + {b}"))
}

/// `a * b`, failing with `InvalidInput` instead of overflowing or leaving the
/// storable range.
pub fn checked_mul(a: Decimal, b: Decimal, field: &str) -> DomainResult<Decimal> {
    bounded(a.checked_mul(b), field, || format!("{a} * {b}"))
}

fn bounded(
    result: Option<Decimal>,
    field: &str,
    expr: impl FnOnce() -> String,
) -> DomainResult<Decimal> {
    match result {
        Some(value) if value.abs() < MAX_MAGNITUDE => Ok(value),
        _ => Err(DomainError::invalid_input(format!(
            "{field} is out of range ({})",
            expr()
        ))),
    }
}
