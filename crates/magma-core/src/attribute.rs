//! Namespaced, optionally localized annotations on variables and categories.

use serde::{Deserialize, Serialize};

use crate::error::{MagmaError, Result};
use crate::locale::Locale;
use crate::values::Value;

/// One annotation: `(namespace, name, locale) -> value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locale: Option<Locale>,
    value: Value,
}

impl Attribute {
    pub fn builder(name: impl Into<String>) -> AttributeBuilder {
        AttributeBuilder {
            name: name.into(),
            namespace: None,
            locale: None,
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn is_localized(&self) -> bool {
        self.locale.is_some()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn same_key(&self, other: &Attribute) -> bool {
        self.name == other.name && self.namespace == other.namespace && self.locale == other.locale
    }
}

/// Builder for [`Attribute`]; the value defaults to null text.
#[derive(Debug, Clone)]
pub struct AttributeBuilder {
    name: String,
    namespace: Option<String>,
    locale: Option<String>,
    value: Option<Value>,
}

impl AttributeBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Language tag, validated on `build`.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.value(Value::text(text))
    }

    pub fn build(self) -> Result<Attribute> {
        if self.name.is_empty() {
            return Err(MagmaError::InvalidArgument(
                "Attribute name cannot be empty".to_string(),
            ));
        }
        if matches!(self.namespace.as_deref(), Some("")) {
            return Err(MagmaError::InvalidArgument(format!(
                "Namespace of attribute '{}' cannot be empty",
                self.name
            )));
        }
        let locale = self.locale.as_deref().map(Locale::parse).transpose()?;
        Ok(Attribute {
            name: self.name,
            namespace: self.namespace,
            locale,
            value: self
                .value
                .unwrap_or_else(|| crate::types::ValueType::Text.null_value()),
        })
    }
}

/// Attributes of one owner, in definition order, unique by
/// `(namespace, name, locale)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct Attributes(Vec<Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute; a colliding key fails.
    pub fn insert(&mut self, attribute: Attribute) -> Result<()> {
        if self.0.iter().any(|a| a.same_key(&attribute)) {
            return Err(MagmaError::InvalidArgument(format!(
                "Duplicate attribute {}{}{}",
                attribute
                    .namespace()
                    .map(|ns| format!("{ns}::"))
                    .unwrap_or_default(),
                attribute.name(),
                attribute
                    .locale()
                    .map(|l| format!(":{l}"))
                    .unwrap_or_default(),
            )));
        }
        self.0.push(attribute);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve `(namespace, name)` for `locale`.
    ///
    /// Lookup order: the attribute with exactly that locale, then the
    /// attribute with no locale, then the first one defined.
    pub fn lookup(
        &self,
        namespace: Option<&str>,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<&Attribute> {
        let mut candidates = self
            .0
            .iter()
            .filter(|a| a.name == name && a.namespace.as_deref() == namespace);
        let first = candidates.clone().next()?;
        if let Some(locale) = locale {
            if let Some(exact) = candidates.clone().find(|a| a.locale.as_ref() == Some(locale)) {
                return Some(exact);
            }
        }
        candidates.find(|a| a.locale.is_none()).or(Some(first))
    }

    pub fn contains(&self, namespace: Option<&str>, name: &str) -> bool {
        self.lookup(namespace, name, None).is_some()
    }
}

impl TryFrom<Vec<Attribute>> for Attributes {
    type Error = MagmaError;

    fn try_from(attributes: Vec<Attribute>) -> Result<Self> {
        let mut result = Attributes::new();
        for a in attributes {
            result.insert(a)?;
        }
        Ok(result)
    }
}

impl From<Attributes> for Vec<Attribute> {
    fn from(attributes: Attributes) -> Self {
        attributes.0
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Shared attribute queries of variables and categories.
pub trait AttributeAware {
    fn attributes(&self) -> &Attributes;

    fn has_attributes(&self) -> bool {
        !self.attributes().is_empty()
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attributes().contains(None, name)
    }

    /// Unlocalized lookup of a non-namespaced attribute.
    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().lookup(None, name, None)
    }

    fn attribute_localized(&self, name: &str, locale: &Locale) -> Option<&Attribute> {
        self.attributes().lookup(None, name, Some(locale))
    }

    fn namespaced_attribute(
        &self,
        namespace: &str,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<&Attribute> {
        self.attributes().lookup(Some(namespace), name, locale)
    }

    /// Literal of the resolved attribute value, e.g. a localized label.
    fn attribute_text(&self, name: &str, locale: Option<&Locale>) -> Option<String> {
        self.attributes()
            .lookup(None, name, locale)
            .and_then(|a| a.value().to_literal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(locale: Option<&str>, text: &str) -> Attribute {
        let builder = Attribute::builder("label").text(text);
        match locale {
            Some(l) => builder.locale(l),
            None => builder,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn test_builder_validation() {
        assert!(Attribute::builder("").build().is_err());
        assert!(Attribute::builder("label").namespace("").build().is_err());
        assert!(Attribute::builder("label").locale("not a tag").build().is_err());
        let a = Attribute::builder("label").build().unwrap();
        assert!(a.value().is_null());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut attrs = Attributes::new();
        attrs.insert(label(Some("en"), "Age")).unwrap();
        attrs.insert(label(Some("fr"), "Âge")).unwrap();
        attrs.insert(label(None, "age")).unwrap();
        assert!(attrs.insert(label(Some("en"), "Years")).is_err());
        let namespaced = Attribute::builder("label")
            .namespace("maelstrom")
            .locale("en")
            .text("Age")
            .build()
            .unwrap();
        attrs.insert(namespaced).unwrap();
        assert_eq!(attrs.len(), 4);
    }

    #[test]
    fn test_lookup_falls_back_to_unlocalized() {
        let attrs: Attributes = vec![label(Some("en"), "Age"), label(None, "age")]
            .try_into()
            .unwrap();
        let fr_ca = Locale::parse("fr-CA").unwrap();
        let found = attrs.lookup(None, "label", Some(&fr_ca)).unwrap();
        assert!(found.locale().is_none());
        assert_eq!(found.value().as_text(), Some("age"));
    }

    #[test]
    fn test_lookup_prefers_exact_locale() {
        let attrs: Attributes = vec![label(None, "age"), label(Some("fr-CA"), "âge (CA)")]
            .try_into()
            .unwrap();
        let fr_ca = Locale::parse("fr_CA").unwrap();
        assert_eq!(
            attrs.lookup(None, "label", Some(&fr_ca)).unwrap().value().as_text(),
            Some("âge (CA)")
        );
        assert_eq!(
            attrs.lookup(None, "label", None).unwrap().value().as_text(),
            Some("age")
        );
    }

    #[test]
    fn test_lookup_falls_back_to_first_defined() {
        let attrs: Attributes = vec![label(Some("en"), "Age"), label(Some("fr"), "Âge")]
            .try_into()
            .unwrap();
        let de = Locale::parse("de").unwrap();
        assert_eq!(
            attrs.lookup(None, "label", Some(&de)).unwrap().value().as_text(),
            Some("Age")
        );
        assert!(attrs.lookup(Some("other"), "label", None).is_none());
        assert!(attrs.lookup(None, "description", None).is_none());
    }

    #[test]
    fn test_serde_rejects_duplicates() {
        let json = r#"[
            {"name":"label","value":{"type":"text","literal":"a"}},
            {"name":"label","value":{"type":"text","literal":"b"}}
        ]"#;
        assert!(serde_json::from_str::<Attributes>(json).is_err());
    }
}
