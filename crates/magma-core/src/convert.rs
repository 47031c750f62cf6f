//! Explicit cross-type conversion.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{MagmaError, Result};
use crate::literal::format_payload;
use crate::types::ValueType;
use crate::values::{Payload, Value};

impl ValueType {
    /// Convert `value` to this type.
    ///
    /// Pairs outside [`ValueType::can_convert_to`] fail with
    /// `ValueConversion`, null or not. Null values of convertible pairs map
    /// to this type's null; sequences convert element by element.
    ///
    /// Text is converted by parsing it as a literal of this type, so blank
    /// text becomes null. Converting that null back to text does not give
    /// the empty string again.
    pub fn convert(&self, value: &Value) -> Result<Value> {
        let source = value.value_type();
        if source == *self {
            return Ok(value.clone());
        }
        if !source.can_convert_to(*self) {
            return Err(MagmaError::conversion(
                *self,
                value,
                format!("{source} values cannot be converted to {self}"),
            ));
        }

        if value.is_sequence() {
            if value.is_null() {
                return Ok(self.null_sequence());
            }
            let elements = value
                .elements()
                .iter()
                .map(|e| self.convert(e))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::from_elements(*self, Some(elements)));
        }

        let payload = match value.payload() {
            None => return Ok(self.null_value()),
            Some(p) => p,
        };
        if *self == ValueType::Text {
            return Ok(Value::text(format_payload(payload)));
        }
        if let Payload::Text(s) = payload {
            return self.parse(s);
        }

        let converted = match (payload, self) {
            (Payload::Integer(i), ValueType::Decimal) => Payload::Decimal(Decimal::from(*i)),
            (Payload::Decimal(d), ValueType::Integer) => {
                if !d.fract().is_zero() {
                    return Err(MagmaError::conversion(*self, d, "value has a fractional part"));
                }
                Payload::Integer(
                    d.to_i64()
                        .ok_or_else(|| MagmaError::conversion(*self, d, "value out of range"))?,
                )
            }
            (Payload::Date(d), ValueType::DateTime) => {
                Payload::DateTime(d.and_time(chrono::NaiveTime::MIN).and_utc())
            }
            (Payload::DateTime(dt), ValueType::Date) => Payload::Date(dt.date_naive()),
            _ => {
                return Err(MagmaError::conversion(
                    *self,
                    format_payload(payload),
                    format!("no conversion from {source}"),
                ));
            }
        };
        Ok(Value::from_payload(*self, Some(converted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::str::FromStr;

    #[test]
    fn test_numeric_to_text_always_succeeds() {
        assert_eq!(
            ValueType::Text.convert(&Value::integer(12)).unwrap(),
            Value::text("12")
        );
        assert_eq!(
            ValueType::Text
                .convert(&Value::decimal(Decimal::from_str("2.50").unwrap()))
                .unwrap(),
            Value::text("2.50")
        );
    }

    #[test]
    fn test_text_to_numeric() {
        assert_eq!(
            ValueType::Integer.convert(&Value::text("42")).unwrap(),
            Value::integer(42)
        );
        let err = ValueType::Integer.convert(&Value::text("forty-two")).unwrap_err();
        assert!(matches!(err, MagmaError::ValueConversion { .. }));
    }

    #[test]
    fn test_binary_only_converts_to_text() {
        let bin = Value::binary(b"binary content".to_vec());
        let text = ValueType::Text.convert(&bin).unwrap();
        assert_eq!(text.value_type(), ValueType::Text);
        assert_eq!(ValueType::Binary.convert(&text).unwrap(), bin);
        assert!(ValueType::DateTime.convert(&bin).is_err());
        assert!(ValueType::Integer.convert(&bin).is_err());
    }

    #[test]
    fn test_datetime_to_integer_fails() {
        let dt = Value::datetime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(ValueType::Integer.convert(&dt).is_err());
        assert!(ValueType::Integer.convert(&ValueType::DateTime.null_value()).is_err());
    }

    #[test]
    fn test_numeric_pairs() {
        let d = ValueType::Decimal.convert(&Value::integer(7)).unwrap();
        assert_eq!(d.as_decimal(), Some(Decimal::from(7)));
        assert_eq!(ValueType::Integer.convert(&d).unwrap(), Value::integer(7));
        let fractional = Value::decimal(Decimal::from_str("7.5").unwrap());
        assert!(ValueType::Integer.convert(&fractional).is_err());
    }

    #[test]
    fn test_temporal_pairs() {
        let date = Value::date(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        let dt = ValueType::DateTime.convert(&date).unwrap();
        assert_eq!(dt.to_literal().unwrap(), "2024-06-30T00:00:00Z");
        assert_eq!(ValueType::Date.convert(&dt).unwrap(), date);
    }

    #[test]
    fn test_lossless_roundtrip_through_text() {
        for v in [
            Value::integer(9_007_199_254_740_991),
            Value::boolean(true),
            Value::date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()),
        ] {
            let text = ValueType::Text.convert(&v).unwrap();
            assert_eq!(v.value_type().convert(&text).unwrap(), v);
        }
    }

    #[test]
    fn test_blank_text_converts_to_null() {
        let blank = Value::text("");
        let integer = ValueType::Integer.convert(&blank).unwrap();
        assert!(integer.is_null());
        let back = ValueType::Text.convert(&integer).unwrap();
        assert!(back.is_null());
        assert_ne!(back, blank);
    }

    #[test]
    fn test_nulls_and_sequences() {
        assert_eq!(
            ValueType::Text.convert(&ValueType::Integer.null_value()).unwrap(),
            ValueType::Text.null_value()
        );
        let seq = ValueType::Integer
            .sequence_of(vec![Value::integer(1), Value::integer(2)])
            .unwrap();
        let texts = ValueType::Text.convert(&seq).unwrap();
        assert!(texts.is_sequence());
        assert_eq!(texts.get(1), Some(&Value::text("2")));
        assert_eq!(
            ValueType::Text.convert(&ValueType::Integer.null_sequence()).unwrap(),
            ValueType::Text.null_sequence()
        );
        assert_eq!(Value::integer(5).convert_to(ValueType::Integer).unwrap(), Value::integer(5));
    }
}
