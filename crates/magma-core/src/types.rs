//! The closed set of value types.
//!
//! `ValueType` is a plain enum: equality and identity coincide, and every
//! variant is a process-wide singleton by construction. Name lookups that
//! must honour backend-registered aliases go through the engine registry
//! (see [`crate::engine`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::MagmaEngine;
use crate::error::{MagmaError, Result};

/// Data kind of a [`crate::Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    // Textual
    /// Unicode text
    Text,

    // Numeric
    /// 64-bit signed integer
    Integer,
    /// Exact decimal number
    Decimal,

    // Boolean
    Boolean,

    // Temporal
    /// Instant in time, UTC
    DateTime,
    /// Calendar date without time zone
    Date,

    /// Opaque bytes, base64 in text form
    Binary,

    /// Language tag such as `fr-CA`
    Locale,

    // Geometry
    /// `[x,y]`
    Point,
    /// `[[x,y],[x,y],...]`
    LineString,
    /// `[[[x,y],...],...]`, exterior ring first
    Polygon,
}

impl ValueType {
    /// Every value type, in declaration order.
    pub const ALL: [ValueType; 11] = [
        ValueType::Text,
        ValueType::Integer,
        ValueType::Decimal,
        ValueType::Boolean,
        ValueType::DateTime,
        ValueType::Date,
        ValueType::Binary,
        ValueType::Locale,
        ValueType::Point,
        ValueType::LineString,
        ValueType::Polygon,
    ];

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::Boolean => "boolean",
            ValueType::DateTime => "datetime",
            ValueType::Date => "date",
            ValueType::Binary => "binary",
            ValueType::Locale => "locale",
            ValueType::Point => "point",
            ValueType::LineString => "linestring",
            ValueType::Polygon => "polygon",
        }
    }

    /// External schema name. Geometry types have none.
    pub fn xsd_name(&self) -> Option<&'static str> {
        match self {
            ValueType::Text => Some("xsd:string"),
            ValueType::Integer => Some("xsd:integer"),
            ValueType::Decimal => Some("xsd:decimal"),
            ValueType::Boolean => Some("xsd:boolean"),
            ValueType::DateTime => Some("xsd:dateTime"),
            ValueType::Date => Some("xsd:date"),
            ValueType::Binary => Some("xsd:base64Binary"),
            ValueType::Locale => Some("xsd:language"),
            ValueType::Point | ValueType::LineString | ValueType::Polygon => None,
        }
    }

    /// Resolve a name or registered alias through the running engine.
    pub fn for_name(name: &str) -> Result<ValueType> {
        MagmaEngine::get().registry().lookup(name)
    }

    /// Resolve an `xsd:` schema name through the running engine.
    pub fn for_xsd_name(xsd_name: &str) -> Result<ValueType> {
        MagmaEngine::get().registry().lookup_xsd(xsd_name)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ValueType::DateTime | ValueType::Date)
    }

    pub fn is_geo(&self) -> bool {
        matches!(
            self,
            ValueType::Point | ValueType::LineString | ValueType::Polygon
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, ValueType::Binary)
    }

    /// Whether `convert` from `self` to `target` is defined.
    ///
    /// Identity, anything to text and text to anything are always defined.
    /// Besides those only integer/decimal and date/datetime convert between
    /// each other.
    pub fn can_convert_to(&self, target: ValueType) -> bool {
        use ValueType::*;
        if *self == target || target == Text || *self == Text {
            return true;
        }
        matches!(
            (self, target),
            (Integer, Decimal) | (Decimal, Integer) | (Date, DateTime) | (DateTime, Date)
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses canonical names only; aliases need [`ValueType::for_name`].
impl FromStr for ValueType {
    type Err = MagmaError;

    fn from_str(s: &str) -> Result<Self> {
        ValueType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MagmaError::InvalidArgument(format!("Unknown value type '{s}'")))
    }
}
