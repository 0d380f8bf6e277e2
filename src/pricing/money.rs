use rust_decimal::{Decimal, RoundingStrategy, prelude::FromPrimitive};
use serde::Serializer;

/// Converts an internal `f64` amount to a two-decimal `Decimal`.
pub fn to_money(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or_default()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `serialize_with` adapter: amounts leave the process as 2dp decimals.
pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serde::Serialize::serialize(&to_money(*value), serializer)
}

/// `floor(value) + 0.99`.
pub fn round_to_99(value: f64) -> f64 {
    value.floor() + 0.99
}
