//! Attribute column headers of metadata sheets.
//!
//! A header names one attribute key: `label`, `label:fr` (localized) or
//! `maelstrom::label:fr` (namespaced and localized).

use std::fmt;

use magma_core::{Attribute, Locale, MagmaError, Result};

const NAMESPACE_SEPARATOR: &str = "::";
const LOCALE_SEPARATOR: char = ':';

/// Parsed `[namespace::]name[:locale]` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeHeader {
    pub namespace: Option<String>,
    pub name: String,
    pub locale: Option<Locale>,
}

impl AttributeHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (namespace, rest) = match header.split_once(NAMESPACE_SEPARATOR) {
            Some((ns, rest)) => (Some(ns.to_string()), rest),
            None => (None, header),
        };
        let (name, locale) = match rest.split_once(LOCALE_SEPARATOR) {
            Some((name, locale)) => (name, Some(Locale::parse(locale)?)),
            None => (rest, None),
        };
        if name.is_empty() || matches!(namespace.as_deref(), Some("")) {
            return Err(MagmaError::InvalidArgument(format!(
                "Malformed attribute header '{header}'"
            )));
        }
        Ok(Self {
            namespace,
            name: name.to_string(),
            locale,
        })
    }

    /// Header naming the key of `attribute`.
    pub fn of(attribute: &Attribute) -> Self {
        Self {
            namespace: attribute.namespace().map(str::to_string),
            name: attribute.name().to_string(),
            locale: attribute.locale().cloned(),
        }
    }

    /// Text attribute for this key; `None` for an empty cell.
    pub fn to_attribute(&self, text: &str) -> Result<Option<Attribute>> {
        if text.is_empty() {
            return Ok(None);
        }
        let mut builder = Attribute::builder(self.name.clone()).text(text);
        if let Some(ns) = &self.namespace {
            builder = builder.namespace(ns.clone());
        }
        if let Some(locale) = &self.locale {
            builder = builder.locale(locale.as_str());
        }
        builder.build().map(Some)
    }
}

impl fmt::Display for AttributeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}{NAMESPACE_SEPARATOR}")?;
        }
        f.write_str(&self.name)?;
        if let Some(locale) = &self.locale {
            write!(f, "{LOCALE_SEPARATOR}{locale}")?;
        }
        Ok(())
    }
}
