//! Language tags used by the `locale` value type and localized attributes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MagmaError, Result};

/// Normalized language tag: lowercase language, `Title` script, uppercase
/// region, subtags joined with `-` (`fr-CA`, `zh-Hant-TW`).
///
/// Both `-` and `_` are accepted as separators when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    pub fn parse(tag: &str) -> Result<Self> {
        let invalid = |reason: &str| MagmaError::InvalidArgument(format!("Invalid locale '{tag}': {reason}"));

        let mut parts = tag.trim().split(['-', '_']);
        let language = parts.next().unwrap_or_default();
        if !(2..=8).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid("language must be 2 to 8 letters"));
        }

        let mut normalized = language.to_ascii_lowercase();
        for subtag in parts {
            if subtag.is_empty()
                || subtag.len() > 8
                || !subtag.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(invalid("malformed subtag"));
            }
            normalized.push('-');
            match subtag.len() {
                2 if subtag.chars().all(|c| c.is_ascii_alphabetic()) => {
                    normalized.push_str(&subtag.to_ascii_uppercase())
                }
                4 if subtag.chars().all(|c| c.is_ascii_alphabetic()) => {
                    let lower = subtag.to_ascii_lowercase();
                    let mut chars = lower.chars();
                    if let Some(first) = chars.next() {
                        normalized.push(first.to_ascii_uppercase());
                        normalized.extend(chars);
                    }
                }
                _ => normalized.push_str(&subtag.to_ascii_lowercase()),
            }
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The primary language subtag.
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = MagmaError;

    fn from_str(s: &str) -> Result<Self> {
        Locale::parse(s)
    }
}

impl TryFrom<String> for Locale {
    type Error = MagmaError;

    fn try_from(value: String) -> Result<Self> {
        Locale::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}
