//! Money conversion helpers.
//!
//! Cash and prices are `Decimal` in the domain and on the wire, and integer
//! cents in storage. A value that does not land exactly on a cent is invalid.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Convert a decimal amount to integer cents. Returns `None` if the value
/// carries more than two decimal places or overflows `i64`.
pub fn to_cents(value: Decimal) -> Option<i64> {
    let scaled = value.checked_mul(Decimal::from(100))?;
    if !scaled.fract().is_zero() {
        return None;
    }
    scaled.to_i64()
}

/// Convert integer cents back to a decimal amount.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_exact_cents() {
        assert_eq!(to_cents(dec!(100.25)), Some(10025));
        assert_eq!(from_cents(10025), dec!(100.25));
        assert_eq!(to_cents(dec!(0)), Some(0));
        assert_eq!(to_cents(dec!(42)), Some(4200));
    }

    #[test]
    fn rejects_sub_cent_precision() {
        assert_eq!(to_cents(dec!(1.005)), None);
        assert_eq!(to_cents(dec!(0.001)), None);
    }

    #[test]
    fn negative_amounts_convert() {
        assert_eq!(to_cents(dec!(-5.50)), Some(-550));
        assert_eq!(from_cents(-550), dec!(-5.50));
    }
}
