//! Typed values and value sequences.
//!
//! A [`Value`] is an immutable pair of a [`ValueType`] and an optional
//! payload. Sequences are values too: a sequence flag plus an optional list
//! of single values of the same type, so null and empty sequences are
//! distinct states.
//!
//! Values are only built through their type (`ValueType::value_of`,
//! `ValueType::parse`, `ValueType::null_value`, ...), which keeps coercion
//! rules in one place.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo_types::{Coord, LineString, Point, Polygon};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MagmaError, Result};
use crate::locale::Locale;
use crate::types::ValueType;

/// Payload of a non-null single value.
///
/// Geometry payloads never hold non-finite coordinates, which keeps `Eq`
/// and `Ord` on values sound.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Binary(Vec<u8>),
    Locale(Locale),
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
}

impl Eq for Payload {}

/// Native input accepted by [`ValueType::value_of`].
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Date(NaiveDate),
    Bytes(Vec<u8>),
    Locale(Locale),
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
}

impl NativeValue {
    fn kind(&self) -> &'static str {
        match self {
            NativeValue::Text(_) => "text",
            NativeValue::Integer(_) => "integer",
            NativeValue::Float(_) => "float",
            NativeValue::Decimal(_) => "decimal",
            NativeValue::Boolean(_) => "boolean",
            NativeValue::DateTime(_) => "datetime",
            NativeValue::NaiveDateTime(_) => "naive datetime",
            NativeValue::Date(_) => "date",
            NativeValue::Bytes(_) => "bytes",
            NativeValue::Locale(_) => "locale",
            NativeValue::Point(_) => "point",
            NativeValue::LineString(_) => "linestring",
            NativeValue::Polygon(_) => "polygon",
        }
    }
}

macro_rules! native_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for NativeValue {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

native_from! {
    String => |v| NativeValue::Text(v),
    &str => |v| NativeValue::Text(v.to_string()),
    i64 => |v| NativeValue::Integer(v),
    i32 => |v| NativeValue::Integer(i64::from(v)),
    u32 => |v| NativeValue::Integer(i64::from(v)),
    f64 => |v| NativeValue::Float(v),
    Decimal => |v| NativeValue::Decimal(v),
    bool => |v| NativeValue::Boolean(v),
    DateTime<Utc> => |v| NativeValue::DateTime(v),
    NaiveDateTime => |v| NativeValue::NaiveDateTime(v),
    NaiveDate => |v| NativeValue::Date(v),
    Vec<u8> => |v| NativeValue::Bytes(v),
    &[u8] => |v| NativeValue::Bytes(v.to_vec()),
    Locale => |v| NativeValue::Locale(v),
    Point<f64> => |v| NativeValue::Point(v),
    LineString<f64> => |v| NativeValue::LineString(v),
    Polygon<f64> => |v| NativeValue::Polygon(v),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    Single(Option<Payload>),
    Sequence(Option<Vec<Value>>),
}

/// Immutable typed datum, possibly null, possibly a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    value_type: ValueType,
    content: Content,
}

impl Value {
    pub(crate) fn from_payload(value_type: ValueType, payload: Option<Payload>) -> Self {
        Self {
            value_type,
            content: Content::Single(payload),
        }
    }

    pub(crate) fn from_elements(value_type: ValueType, elements: Option<Vec<Value>>) -> Self {
        Self {
            value_type,
            content: Content::Sequence(elements),
        }
    }

    /// Non-null text value.
    pub(crate) fn text(s: impl Into<String>) -> Self {
        Self::from_payload(ValueType::Text, Some(Payload::Text(s.into())))
    }

    /// Non-null integer value.
    #[cfg(test)]
    pub(crate) fn integer(i: i64) -> Self {
        Self::from_payload(ValueType::Integer, Some(Payload::Integer(i)))
    }

    /// Non-null decimal value.
    #[cfg(test)]
    pub(crate) fn decimal(d: Decimal) -> Self {
        Self::from_payload(ValueType::Decimal, Some(Payload::Decimal(d)))
    }

    /// Non-null boolean value.
    #[cfg(test)]
    pub(crate) fn boolean(b: bool) -> Self {
        Self::from_payload(ValueType::Boolean, Some(Payload::Boolean(b)))
    }

    /// Non-null datetime value.
    #[cfg(test)]
    pub(crate) fn datetime(dt: DateTime<Utc>) -> Self {
        Self::from_payload(ValueType::DateTime, Some(Payload::DateTime(dt)))
    }

    /// Non-null date value.
    #[cfg(test)]
    pub(crate) fn date(d: NaiveDate) -> Self {
        Self::from_payload(ValueType::Date, Some(Payload::Date(d)))
    }

    /// Non-null binary value.
    #[cfg(test)]
    pub(crate) fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_payload(ValueType::Binary, Some(Payload::Binary(bytes.into())))
    }

    /// Non-null locale value.
    #[cfg(test)]
    pub(crate) fn locale(locale: Locale) -> Self {
        Self::from_payload(ValueType::Locale, Some(Payload::Locale(locale)))
    }

    /// Datetime value, null when `dt` is `None`.
    pub(crate) fn datetime_or_null(dt: Option<DateTime<Utc>>) -> Self {
        Self::from_payload(ValueType::DateTime, dt.map(Payload::DateTime))
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Whether the payload (or element list) is absent.
    pub fn is_null(&self) -> bool {
        matches!(
            self.content,
            Content::Single(None) | Content::Sequence(None)
        )
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.content, Content::Sequence(_))
    }

    /// Payload of a non-null single value.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.content {
            Content::Single(p) => p.as_ref(),
            Content::Sequence(_) => None,
        }
    }

    /// Elements of a sequence; empty for null sequences and single values.
    pub fn elements(&self) -> &[Value] {
        match &self.content {
            Content::Sequence(Some(elements)) => elements,
            _ => &[],
        }
    }

    /// Element count of a sequence, 1 for a non-null single value, 0 for null.
    pub fn size(&self) -> usize {
        match &self.content {
            Content::Single(Some(_)) => 1,
            Content::Single(None) | Content::Sequence(None) => 0,
            Content::Sequence(Some(elements)) => elements.len(),
        }
    }

    /// Element at `index` of a sequence.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elements().get(index)
    }

    /// Wrap a single value in a size-1 sequence; sequences are returned as is.
    ///
    /// A null single value becomes the null sequence.
    pub fn as_sequence(&self) -> Value {
        match &self.content {
            Content::Sequence(_) => self.clone(),
            Content::Single(None) => Self::from_elements(self.value_type, None),
            Content::Single(Some(_)) => Self::from_elements(self.value_type, Some(vec![self.clone()])),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.payload()? {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload()? {
            Payload::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self.payload()? {
            Payload::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload()? {
            Payload::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self.payload()? {
            Payload::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.payload()? {
            Payload::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.payload()? {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_locale(&self) -> Option<&Locale> {
        match self.payload()? {
            Payload::Locale(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<&Point<f64>> {
        match self.payload()? {
            Payload::Point(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_linestring(&self) -> Option<&LineString<f64>> {
        match self.payload()? {
            Payload::LineString(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon<f64>> {
        match self.payload()? {
            Payload::Polygon(p) => Some(p),
            _ => None,
        }
    }

    /// Convert to another type using the fixed compatibility table.
    pub fn convert_to(&self, target: ValueType) -> Result<Value> {
        target.convert(self)
    }
}

impl ValueType {
    /// The canonical null single value of this type.
    pub fn null_value(&self) -> Value {
        Value::from_payload(*self, None)
    }

    /// The canonical null sequence of this type.
    pub fn null_sequence(&self) -> Value {
        Value::from_elements(*self, None)
    }

    /// A non-null sequence with no elements.
    pub fn empty_sequence(&self) -> Value {
        Value::from_elements(*self, Some(Vec::new()))
    }

    /// Whether `native` is acceptable input for this type.
    pub fn accepts(&self, native: &NativeValue) -> bool {
        self.accept(native.clone()).is_ok()
    }

    /// Build a value from native input.
    ///
    /// Fails with `ValueConversion` when the input kind is not accepted by
    /// this type (text is never parsed here; see [`ValueType::parse`]).
    pub fn value_of(&self, native: impl Into<NativeValue>) -> Result<Value> {
        let payload = self.accept(native.into())?;
        Ok(Value::from_payload(*self, Some(payload)))
    }

    /// Like `value_of`, mapping `None` to the null value.
    pub fn value_of_optional<N: Into<NativeValue>>(&self, native: Option<N>) -> Result<Value> {
        match native {
            Some(n) => self.value_of(n),
            None => Ok(self.null_value()),
        }
    }

    /// Build a sequence from single values of this type.
    pub fn sequence_of<I>(&self, values: I) -> Result<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut elements = Vec::new();
        for value in values {
            if value.value_type != *self {
                return Err(MagmaError::conversion(
                    *self,
                    &value,
                    format!("sequence element has type {}", value.value_type),
                ));
            }
            if value.is_sequence() {
                return Err(MagmaError::conversion(
                    *self,
                    &value,
                    "sequences cannot be nested",
                ));
            }
            elements.push(value);
        }
        Ok(Value::from_elements(*self, Some(elements)))
    }

    fn accept(&self, native: NativeValue) -> Result<Payload> {
        let kind = native.kind();
        let payload = match (self, native) {
            (ValueType::Text, NativeValue::Text(s)) => Payload::Text(s),
            (ValueType::Integer, NativeValue::Integer(i)) => Payload::Integer(i),
            (ValueType::Decimal, NativeValue::Decimal(d)) => Payload::Decimal(d),
            (ValueType::Decimal, NativeValue::Integer(i)) => Payload::Decimal(Decimal::from(i)),
            (ValueType::Decimal, NativeValue::Float(f)) => {
                Payload::Decimal(Decimal::try_from(f).map_err(|e| {
                    MagmaError::conversion(*self, f, e.to_string())
                })?)
            }
            (ValueType::Boolean, NativeValue::Boolean(b)) => Payload::Boolean(b),
            (ValueType::DateTime, NativeValue::DateTime(dt)) => Payload::DateTime(dt),
            (ValueType::DateTime, NativeValue::NaiveDateTime(dt)) => Payload::DateTime(dt.and_utc()),
            (ValueType::DateTime, NativeValue::Date(d)) => {
                Payload::DateTime(d.and_time(chrono::NaiveTime::MIN).and_utc())
            }
            (ValueType::Date, NativeValue::Date(d)) => Payload::Date(d),
            (ValueType::Binary, NativeValue::Bytes(b)) => Payload::Binary(b),
            (ValueType::Locale, NativeValue::Locale(l)) => Payload::Locale(l),
            (ValueType::Point, NativeValue::Point(p)) => {
                check_coords(*self, std::iter::once(p.0))?;
                Payload::Point(p)
            }
            (ValueType::LineString, NativeValue::LineString(l)) => {
                if l.0.is_empty() {
                    return Err(MagmaError::conversion(*self, "[]", "linestring has no points"));
                }
                check_coords(*self, l.coords().copied())?;
                Payload::LineString(l)
            }
            (ValueType::Polygon, NativeValue::Polygon(p)) => {
                if p.exterior().0.is_empty() {
                    return Err(MagmaError::conversion(*self, "[]", "polygon has no exterior ring"));
                }
                check_coords(
                    *self,
                    p.exterior()
                        .coords()
                        .chain(p.interiors().iter().flat_map(|r| r.coords()))
                        .copied(),
                )?;
                Payload::Polygon(p)
            }
            _ => {
                return Err(MagmaError::conversion(
                    *self,
                    kind,
                    format!("{kind} input is not accepted by {self}"),
                ))
            }
        };
        Ok(payload)
    }

    /// Total order: nulls first, then payload order.
    ///
    /// Sequences compare element-wise, shorter first on a common prefix.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        a.cmp(b)
    }

    /// Sort the elements of a sequence with this type's order.
    pub fn sort(&self, sequence: &Value) -> Result<Value> {
        if sequence.value_type != *self || !sequence.is_sequence() {
            return Err(MagmaError::InvalidArgument(format!(
                "Expected a {self} sequence, got {}",
                sequence.value_type
            )));
        }
        match &sequence.content {
            Content::Sequence(Some(elements)) => {
                let mut sorted = elements.clone();
                sorted.sort();
                Ok(Value::from_elements(*self, Some(sorted)))
            }
            _ => Ok(sequence.clone()),
        }
    }
}

fn check_coords(value_type: ValueType, coords: impl Iterator<Item = Coord<f64>>) -> Result<()> {
    for c in coords {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(MagmaError::conversion(
                value_type,
                format!("[{},{}]", c.x, c.y),
                "coordinates must be finite",
            ));
        }
    }
    Ok(())
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn cmp_coords<'a>(
    mut a: impl Iterator<Item = &'a Coord<f64>>,
    mut b: impl Iterator<Item = &'a Coord<f64>>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = cmp_f64(x.x, y.x).then_with(|| cmp_f64(x.y, y.y));
                if ordering.is_ne() {
                    return ordering;
                }
            }
        }
    }
}

impl Ord for Payload {
    fn cmp(&self, other: &Self) -> Ordering {
        use Payload::*;
        match (self, other) {
            (Text(a), Text(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (Locale(a), Locale(b)) => a.cmp(b),
            (Point(a), Point(b)) => cmp_coords(std::iter::once(&a.0), std::iter::once(&b.0)),
            (LineString(a), LineString(b)) => cmp_coords(a.coords(), b.coords()),
            (Polygon(a), Polygon(b)) => cmp_coords(a.exterior().coords(), b.exterior().coords())
                .then_with(|| {
                    a.interiors()
                        .iter()
                        .map(|r| r.coords())
                        .zip(b.interiors().iter().map(|r| r.coords()))
                        .map(|(ra, rb)| cmp_coords(ra, rb))
                        .find(|o| o.is_ne())
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.interiors().len().cmp(&b.interiors().len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Payload {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Payload {
    fn rank(&self) -> u8 {
        match self {
            Payload::Text(_) => 0,
            Payload::Integer(_) => 1,
            Payload::Decimal(_) => 2,
            Payload::Boolean(_) => 3,
            Payload::DateTime(_) => 4,
            Payload::Date(_) => 5,
            Payload::Binary(_) => 6,
            Payload::Locale(_) => 7,
            Payload::Point(_) => 8,
            Payload::LineString(_) => 9,
            Payload::Polygon(_) => 10,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value_type
            .cmp(&other.value_type)
            .then_with(|| match (&self.content, &other.content) {
                (Content::Single(a), Content::Single(b)) => a.cmp(b),
                (Content::Sequence(a), Content::Sequence(b)) => a.cmp(b),
                (Content::Single(_), Content::Sequence(_)) => Ordering::Less,
                (Content::Sequence(_), Content::Single(_)) => Ordering::Greater,
            })
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_literal() {
            Some(literal) => f.write_str(&literal),
            None => f.write_str("null"),
        }
    }
}

/// Document form of a value: `{type, sequence, literal}`.
#[derive(Serialize, Deserialize)]
struct ValueDocument {
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    sequence: bool,
    literal: Option<String>,
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ValueDocument {
            value_type: self.value_type,
            sequence: self.is_sequence(),
            literal: self.to_literal(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let doc = ValueDocument::deserialize(deserializer)?;
        let value = match (doc.sequence, doc.literal) {
            (false, None) => Ok(doc.value_type.null_value()),
            (true, None) => Ok(doc.value_type.null_sequence()),
            (false, Some(literal)) => doc.value_type.parse(&literal),
            (true, Some(literal)) => doc.value_type.parse_sequence(&literal),
        };
        value.map_err(serde::de::Error::custom)
    }
}
