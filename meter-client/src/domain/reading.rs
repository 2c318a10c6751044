use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::{FileRef, MeterRef};

/// Readings are stored with three decimal places.
pub const VALUE_SCALE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReadingRef(pub i64);

/// How a reading value was arrived at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ReadingType {
    Actual,
    Estimated,
    Customer,
    Withdrawn,
    Zero,
    /// Any other code found in the source, kept verbatim.
    Other(String),
}

impl ReadingType {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "A" => Self::Actual,
            "E" => Self::Estimated,
            "C" => Self::Customer,
            "W" => Self::Withdrawn,
            "Z" => Self::Zero,
            "" => Self::Other("N".to_string()),
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Actual => "A",
            Self::Estimated => "E",
            Self::Customer => "C",
            Self::Withdrawn => "W",
            Self::Zero => "Z",
            Self::Other(code) => code,
        }
    }
}

/// Rounds to the stored scale and strips trailing zeros so that equal
/// quantities compare and hash equal regardless of how they were written.
pub fn normalize_value(value: Decimal) -> Decimal {
    value.round_dp(VALUE_SCALE).normalize()
}

/// Natural key of a reading. Unique across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadingKey {
    pub meter: MeterRef,
    pub register_id: String,
    pub taken_at: OffsetDateTime,
    pub value: Decimal,
}

impl ReadingKey {
    pub fn new(meter: MeterRef, register_id: impl Into<String>, taken_at: OffsetDateTime, value: Decimal) -> Self {
        Self {
            meter,
            register_id: register_id.into(),
            taken_at,
            value: normalize_value(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingDefaults {
    pub reading_type: ReadingType,
    pub measurement_method: String,
    pub imported_file: FileRef,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Reading {
    pub id: ReadingRef,
    pub meter: MeterRef,
    pub register_id: String,
    pub taken_at: OffsetDateTime,
    pub value: Decimal,
    pub reading_type: ReadingType,
    pub measurement_method: String,
    pub imported_file: FileRef,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use time::macros::datetime;

    #[test]
    fn equal_quantities_produce_equal_keys() {
        let ts = datetime!(2016-02-22 00:00:00 UTC);
        let a = ReadingKey::new(MeterRef(1), "S", ts, Decimal::from_str("56311.0").unwrap());
        let b = ReadingKey::new(MeterRef(1), "S", ts, Decimal::from_str("56311.000").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn values_are_rounded_to_three_places() {
        let v = normalize_value(Decimal::from_str("1.23456").unwrap());
        assert_eq!(v, Decimal::from_str("1.235").unwrap());
    }

    #[test]
    fn reading_type_keeps_unknown_codes() {
        assert_eq!(ReadingType::from_code("A"), ReadingType::Actual);
        assert_eq!(ReadingType::from_code("R").code(), "R");
        assert_eq!(ReadingType::from_code(" ").code(), "N");
    }
}
