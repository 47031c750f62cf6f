//! Canonical text forms of values.
//!
//! | Type | Literal |
//! |------|---------|
//! | text | the text itself |
//! | integer | `-12` |
//! | decimal | `3.140` (scale preserved) |
//! | boolean | `true` / `false` |
//! | datetime | RFC 3339, UTC (`2024-01-15T10:30:00Z`) |
//! | date | `2024-01-15` |
//! | binary | base64 |
//! | locale | `fr-CA` |
//! | point | `[45.3,56.4]` |
//! | linestring | `[[1,2],[3,4]]` |
//! | polygon | `[[[0,0],[1,0],[1,1],[0,0]]]` |
//!
//! Sequences join element literals with `,`. Text elements are always
//! double-quoted (`""` escapes a quote), null elements are written `null`
//! and the empty sequence is `[]`. The null value has no literal.

use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use geo_types::{Coord, LineString, Point, Polygon};
use rust_decimal::Decimal;

use crate::error::{MagmaError, Result};
use crate::locale::Locale;
use crate::types::ValueType;
use crate::values::{NativeValue, Payload, Value};

/// Literal of the non-null empty sequence.
pub const EMPTY_SEQUENCE_LITERAL: &str = "[]";

const NULL_ELEMENT_LITERAL: &str = "null";

const NAIVE_DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

impl Value {
    /// Canonical literal; `None` for null values and null sequences.
    pub fn to_literal(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        if !self.is_sequence() {
            return self.payload().map(format_payload);
        }
        let elements = self.elements();
        if elements.is_empty() {
            return Some(EMPTY_SEQUENCE_LITERAL.to_string());
        }
        let literals: Vec<String> = elements
            .iter()
            .map(|e| match e.payload() {
                None => NULL_ELEMENT_LITERAL.to_string(),
                Some(Payload::Text(s)) => quote(s),
                Some(p) => format_payload(p),
            })
            .collect();
        Some(literals.join(","))
    }
}

impl ValueType {
    /// Parse a canonical literal.
    ///
    /// Blank input is the null value for every type but text, where it is
    /// the empty string. Malformed input fails with `ValueConversion`.
    pub fn parse(&self, literal: &str) -> Result<Value> {
        if *self != ValueType::Text && literal.trim().is_empty() {
            return Ok(self.null_value());
        }
        let payload = parse_payload(*self, literal)?;
        Ok(Value::from_payload(*self, Some(payload)))
    }

    /// Parse a sequence literal. Blank input is the null sequence.
    pub fn parse_sequence(&self, literal: &str) -> Result<Value> {
        let trimmed = literal.trim();
        if trimmed.is_empty() {
            return Ok(self.null_sequence());
        }
        if trimmed == EMPTY_SEQUENCE_LITERAL {
            return Ok(self.empty_sequence());
        }
        let mut elements = Vec::new();
        for token in split_elements(*self, trimmed)? {
            let element = match token {
                Token::Quoted(s) => Value::from_payload(*self, Some(parse_payload(*self, &s)?)),
                Token::Bare(s) if s.is_empty() || s == NULL_ELEMENT_LITERAL => self.null_value(),
                Token::Bare(s) => Value::from_payload(*self, Some(parse_payload(*self, &s)?)),
            };
            elements.push(element);
        }
        Ok(Value::from_elements(*self, Some(elements)))
    }
}

pub(crate) fn format_payload(payload: &Payload) -> String {
    match payload {
        Payload::Text(s) => s.clone(),
        Payload::Integer(i) => i.to_string(),
        Payload::Decimal(d) => d.to_string(),
        Payload::Boolean(b) => b.to_string(),
        Payload::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Payload::Date(d) => d.format("%Y-%m-%d").to_string(),
        Payload::Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
        Payload::Locale(l) => l.to_string(),
        Payload::Point(p) => format_coord(&p.0),
        Payload::LineString(l) => format_ring(l),
        Payload::Polygon(p) => {
            let rings: Vec<String> = std::iter::once(p.exterior())
                .chain(p.interiors())
                .map(format_ring)
                .collect();
            format!("[{}]", rings.join(","))
        }
    }
}

fn format_coord(c: &Coord<f64>) -> String {
    format!("[{},{}]", c.x, c.y)
}

fn format_ring(l: &LineString<f64>) -> String {
    let coords: Vec<String> = l.coords().map(format_coord).collect();
    format!("[{}]", coords.join(","))
}

pub(crate) fn parse_payload(value_type: ValueType, literal: &str) -> Result<Payload> {
    let fail = |message: &str| MagmaError::conversion(value_type, literal, message);
    let trimmed = literal.trim();

    let payload = match value_type {
        ValueType::Text => Payload::Text(literal.to_string()),

        ValueType::Integer => Payload::Integer(
            trimmed
                .parse::<i64>()
                .map_err(|_| fail("not an integer"))?,
        ),

        ValueType::Decimal => Payload::Decimal(
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map_err(|_| fail("not a decimal number"))?,
        ),

        // Boolean - lenient parsing
        ValueType::Boolean => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" | "t" | "y" => Payload::Boolean(true),
            "false" | "0" | "no" | "f" | "n" => Payload::Boolean(false),
            _ => return Err(fail("not a boolean")),
        },

        ValueType::DateTime => Payload::DateTime(
            parse_datetime(trimmed).ok_or_else(|| fail("not an ISO 8601 date-time"))?,
        ),

        ValueType::Date => Payload::Date(
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map_err(|_| fail("not a date (expected YYYY-MM-DD)"))?,
        ),

        ValueType::Binary => Payload::Binary(
            base64::engine::general_purpose::STANDARD
                .decode(trimmed)
                .map_err(|_| fail("invalid base64"))?,
        ),

        ValueType::Locale => Payload::Locale(
            Locale::parse(trimmed).map_err(|_| fail("not a language tag"))?,
        ),

        ValueType::Point | ValueType::LineString | ValueType::Polygon => {
            let json: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|_| fail("not a coordinate array"))?;
            let native: NativeValue = match value_type {
                ValueType::Point => Point(json_coord(&json).ok_or_else(|| fail("expected [x,y]"))?).into(),
                ValueType::LineString => json_ring(&json)
                    .ok_or_else(|| fail("expected [[x,y],...]"))?
                    .into(),
                _ => {
                    let rings = json
                        .as_array()
                        .ok_or_else(|| fail("expected [[[x,y],...],...]"))?
                        .iter()
                        .map(json_ring)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| fail("expected [[[x,y],...],...]"))?;
                    let mut rings = rings.into_iter();
                    let exterior = rings.next().ok_or_else(|| fail("polygon has no exterior ring"))?;
                    Polygon::new(exterior, rings.collect()).into()
                }
            };
            return value_type
                .value_of(native)
                .and_then(|v| v.payload().cloned().ok_or_else(|| fail("empty geometry")));
        }
    };
    Ok(payload)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn json_coord(json: &serde_json::Value) -> Option<Coord<f64>> {
    match json.as_array()?.as_slice() {
        [x, y] => Some(Coord {
            x: x.as_f64()?,
            y: y.as_f64()?,
        }),
        _ => None,
    }
}

fn json_ring(json: &serde_json::Value) -> Option<LineString<f64>> {
    json.as_array()?
        .iter()
        .map(json_coord)
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, PartialEq)]
enum Token {
    Quoted(String),
    Bare(String),
}

/// Split a sequence literal on top-level commas, outside quotes and brackets.
fn split_elements(value_type: ValueType, literal: &str) -> Result<Vec<Token>> {
    let malformed = |message: &str| MagmaError::conversion(value_type, literal, message);
    let mut tokens = Vec::new();
    let mut chars = literal.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        if chars.next_if_eq(&'"').is_some() {
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('"') if chars.next_if_eq(&'"').is_some() => text.push('"'),
                    Some('"') => break,
                    Some(c) => text.push(c),
                    None => return Err(malformed("unterminated quoted element")),
                }
            }
            tokens.push(Token::Quoted(text));
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            match chars.next() {
                None => break,
                Some(',') => continue,
                Some(_) => return Err(malformed("unexpected text after quoted element")),
            }
        }

        let mut bare = String::new();
        let mut depth = 0usize;
        let mut at_end = true;
        for c in chars.by_ref() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| malformed("unbalanced brackets"))?
                }
                ',' if depth == 0 => {
                    at_end = false;
                    break;
                }
                _ => {}
            }
            bare.push(c);
        }
        if depth != 0 {
            return Err(malformed("unbalanced brackets"));
        }
        tokens.push(Token::Bare(bare.trim().to_string()));
        if at_end {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roundtrip(value: &Value) {
        let literal = value.to_literal().expect("non-null");
        let parsed = if value.is_sequence() {
            value.value_type().parse_sequence(&literal)
        } else {
            value.value_type().parse(&literal)
        }
        .unwrap();
        assert_eq!(&parsed, value, "literal {literal}");
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(&Value::text("hello, \"world\""));
        roundtrip(&Value::integer(-9_007_199_254_740_993));
        roundtrip(&Value::decimal(Decimal::from_str("3.140").unwrap()));
        roundtrip(&Value::boolean(false));
        roundtrip(&Value::datetime(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
        ));
        roundtrip(&Value::datetime(
            Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
        ));
        roundtrip(&Value::date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()));
        roundtrip(&Value::binary(vec![0u8, 159, 146, 150]));
        roundtrip(&Value::locale(Locale::parse("fr-CA").unwrap()));
    }

    #[test]
    fn test_geometry_literals() {
        let point = ValueType::Point.parse("[45.3,56.4]").unwrap();
        assert_eq!(point.as_point(), Some(&Point::new(45.3, 56.4)));
        assert_eq!(point.to_literal().unwrap(), "[45.3,56.4]");

        let line = ValueType::LineString.parse("[[1,2],[3,4.5]]").unwrap();
        assert_eq!(line.to_literal().unwrap(), "[[1,2],[3,4.5]]");

        let polygon = ValueType::Polygon
            .parse("[[[0,0],[4,0],[4,4],[0,0]],[[1,1],[2,1],[2,2],[1,1]]]")
            .unwrap();
        assert_eq!(polygon.as_polygon().unwrap().interiors().len(), 1);
        roundtrip(&polygon);

        assert!(ValueType::Point.parse("[1]").is_err());
        assert!(ValueType::Point.parse("45.3,56.4").is_err());
        assert!(ValueType::LineString.parse("[]").is_err());
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(ValueType::Integer.parse("12a").is_err());
        assert!(ValueType::Integer.parse("1.5").is_err());
        assert!(ValueType::Decimal.parse("abc").is_err());
        assert!(ValueType::Boolean.parse("maybe").is_err());
        assert!(ValueType::Date.parse("2024-13-01").is_err());
        assert!(ValueType::Binary.parse("***").is_err());
        let err = ValueType::DateTime.parse("yesterday").unwrap_err();
        assert!(matches!(err, MagmaError::ValueConversion { ref input, .. } if input == "yesterday"));
    }

    #[test]
    fn test_blank_literal() {
        assert!(ValueType::Integer.parse("  ").unwrap().is_null());
        assert_eq!(ValueType::Text.parse("").unwrap(), Value::text(""));
    }

    #[test]
    fn test_datetime_fallback_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        for s in [
            "2024-01-15T10:30:00Z",
            "2024-01-15T12:30:00+02:00",
            "2024-01-15T10:30:00",
            "2024-01-15 10:30:00",
            "2024-01-15T10:30",
        ] {
            assert_eq!(
                ValueType::DateTime.parse(s).unwrap().as_datetime(),
                Some(&expected),
                "{s}"
            );
        }
        assert_eq!(
            ValueType::DateTime.parse("2024-01-15").unwrap().to_literal().unwrap(),
            "2024-01-15T00:00:00Z"
        );
    }

    #[test]
    fn test_boolean_is_lenient() {
        assert_eq!(ValueType::Boolean.parse("YES").unwrap(), Value::boolean(true));
        assert_eq!(ValueType::Boolean.parse("0").unwrap(), Value::boolean(false));
        assert_eq!(Value::boolean(true).to_literal().unwrap(), "true");
    }

    #[test]
    fn test_sequence_literals() {
        let seq = ValueType::Integer
            .sequence_of(vec![Value::integer(1), ValueType::Integer.null_value(), Value::integer(3)])
            .unwrap();
        assert_eq!(seq.to_literal().unwrap(), "1,null,3");
        roundtrip(&seq);

        let text = ValueType::Text
            .sequence_of(vec![Value::text("a,b"), Value::text("say \"hi\""), Value::text("")])
            .unwrap();
        assert_eq!(text.to_literal().unwrap(), r#""a,b","say ""hi""","""#);
        roundtrip(&text);

        let points = ValueType::Point.parse_sequence("[1,2], [3,4]").unwrap();
        assert_eq!(points.size(), 2);
        assert_eq!(points.to_literal().unwrap(), "[1,2],[3,4]");
    }

    #[test]
    fn test_empty_and_null_sequences() {
        let empty = ValueType::Text.empty_sequence();
        assert_eq!(empty.to_literal().as_deref(), Some(EMPTY_SEQUENCE_LITERAL));
        assert_eq!(ValueType::Text.parse_sequence("[]").unwrap(), empty);
        assert_eq!(ValueType::Text.null_sequence().to_literal(), None);
        assert_eq!(
            ValueType::Text.parse_sequence("").unwrap(),
            ValueType::Text.null_sequence()
        );
        let one_null = ValueType::Date.parse_sequence("null").unwrap();
        assert_eq!(one_null.size(), 1);
        assert!(one_null.get(0).unwrap().is_null());
    }

    #[test]
    fn test_malformed_sequences() {
        assert!(ValueType::Text.parse_sequence("\"open").is_err());
        assert!(ValueType::Text.parse_sequence("\"a\" b").is_err());
        assert!(ValueType::Point.parse_sequence("[1,2").is_err());
        assert!(ValueType::Integer.parse_sequence("1,x").is_err());
    }
}
