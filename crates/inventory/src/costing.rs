//! Weighted-average cost.

use rust_decimal::Decimal;
use stockledger_core::decimal::normalize;
use stockledger_core::{DomainError, DomainResult, Money, Quantity};

/// Blend the current average cost with an incoming batch.
///
/// `on_hand` is the item's total quantity across all locations *before* the
/// batch arrives. A non-positive `on_hand` means the existing valuation no
/// longer carries weight and the batch price becomes the new average.
pub fn weighted_average_cost(
    on_hand: Quantity,
    current_average: Money,
    incoming: Quantity,
    unit_price: Money,
) -> DomainResult<Money> {
    if incoming <= Decimal::ZERO {
        return Err(DomainError::invalid_input(format!(
            "incoming quantity must be positive (got {incoming})"
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(DomainError::invalid_input(format!(
            "unit price cannot be negative (got {unit_price})"
        )));
    }
    if on_hand <= Decimal::ZERO {
        return Ok(normalize(unit_price));
    }

    let overflow = || DomainError::invalid_input("weighted-average cost overflow");
    let existing_value = on_hand.checked_mul(current_average).ok_or_else(overflow)?;
    let incoming_value = incoming.checked_mul(unit_price).ok_or_else(overflow)?;
    let total_value = existing_value
        .checked_add(incoming_value)
        .ok_or_else(overflow)?;
    let total_quantity = on_hand.checked_add(incoming).ok_or_else(overflow)?;

    let average = total_value
        .checked_div(total_quantity)
        .ok_or_else(overflow)?;
    Ok(normalize(average))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn blends_existing_and_incoming() {
        // 100 @ 10 + 50 @ 16 = 1800 / 150 = 12
        let avg = weighted_average_cost(dec!(100), dec!(10), dec!(50), dec!(16)).unwrap();
        assert_eq!(avg, dec!(12));
    }

    #[test]
    fn empty_stock_takes_the_batch_price() {
        let avg = weighted_average_cost(dec!(0), dec!(99), dec!(5), dec!(4.25)).unwrap();
        assert_eq!(avg, dec!(4.25));
    }

    #[test]
    fn rounds_to_six_places() {
        // 1 @ 0 + 2 @ 1 = 2 / 3
        let avg = weighted_average_cost(dec!(1), dec!(0), dec!(2), dec!(1)).unwrap();
        assert_eq!(avg, dec!(0.666667));
    }

    #[test]
    fn rejects_negative_price_and_empty_batch() {
        assert!(weighted_average_cost(dec!(1), dec!(1), dec!(1), dec!(-1)).is_err());
        assert!(weighted_average_cost(dec!(1), dec!(1), dec!(0), dec!(1)).is_err());
    }

    fn price() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000i64).prop_map(|cents| Decimal::new(cents, 4))
    }

    fn quantity() -> impl Strategy<Value = Decimal> {
        (1i64..1_000_000i64).prop_map(|milli| Decimal::new(milli, 3))
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn average_stays_between_the_two_prices(
            on_hand in quantity(),
            current in price(),
            incoming in quantity(),
            unit_price in price(),
        ) {
            let avg = weighted_average_cost(on_hand, current, incoming, unit_price).unwrap();
            let low = current.min(unit_price);
            let high = current.max(unit_price);
            prop_assert!(avg >= low, "{avg} < {low}");
            prop_assert!(avg <= high, "{avg} > {high}");
        }

        #[test]
        fn equal_prices_are_a_fixed_point(
            on_hand in quantity(),
            incoming in quantity(),
            unit_price in price(),
        ) {
            let avg = weighted_average_cost(on_hand, unit_price, incoming, unit_price).unwrap();
            prop_assert_eq!(avg, normalize(unit_price));
        }
    }
}
