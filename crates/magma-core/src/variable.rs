//! Variable metadata: one column of a value table.
//!
//! [`Variable`] and [`Category`] are immutable once built. Builders reject
//! colliding category names and attribute keys, and a repeatable variable
//! without an occurrence group.

use serde::{Deserialize, Serialize};

use crate::attribute::{Attribute, AttributeAware, Attributes};
use crate::error::{MagmaError, Result};
use crate::types::ValueType;
use crate::values::Value;

// ============================================================================
// Category
// ============================================================================

/// An enumerated code of a variable, optionally flagged as a missing code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attributes: Attributes,
}

impl Category {
    pub fn builder(name: impl Into<String>) -> CategoryBuilder {
        CategoryBuilder {
            name: name.into(),
            code: None,
            missing: false,
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_missing(&self) -> bool {
        self.missing
    }
}

impl AttributeAware for Category {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

#[derive(Debug, Clone)]
pub struct CategoryBuilder {
    name: String,
    code: Option<String>,
    missing: bool,
    attributes: Vec<Attribute>,
}

impl CategoryBuilder {
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn missing(mut self, missing: bool) -> Self {
        self.missing = missing;
        self
    }

    pub fn add_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn build(self) -> Result<Category> {
        if self.name.is_empty() {
            return Err(MagmaError::InvalidArgument(
                "Category name cannot be empty".to_string(),
            ));
        }
        Ok(Category {
            name: self.name,
            code: self.code,
            missing: self.missing,
            attributes: self.attributes.try_into()?,
        })
    }
}

// ============================================================================
// Variable
// ============================================================================

/// Immutable column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "VariableDocument")]
pub struct Variable {
    name: String,
    value_type: ValueType,
    entity_type: String,
    repeatable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    occurrence_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    referenced_entity_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    categories: Vec<Category>,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    attributes: Attributes,
}

impl Variable {
    pub fn builder(
        name: impl Into<String>,
        value_type: ValueType,
        entity_type: impl Into<String>,
    ) -> VariableBuilder {
        VariableBuilder {
            name: name.into(),
            value_type,
            entity_type: entity_type.into(),
            repeatable: false,
            occurrence_group: None,
            mime_type: None,
            unit: None,
            index: 0,
            referenced_entity_type: None,
            categories: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Builder pre-filled with this variable, for rebuilding with changes.
    pub fn to_builder(&self) -> VariableBuilder {
        VariableBuilder {
            name: self.name.clone(),
            value_type: self.value_type,
            entity_type: self.entity_type.clone(),
            repeatable: self.repeatable,
            occurrence_group: self.occurrence_group.clone(),
            mime_type: self.mime_type.clone(),
            unit: self.unit.clone(),
            index: self.index,
            referenced_entity_type: self.referenced_entity_type.clone(),
            categories: self.categories.clone(),
            attributes: self.attributes.iter().cloned().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn is_for_entity_type(&self, entity_type: &str) -> bool {
        self.entity_type == entity_type
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    pub fn occurrence_group(&self) -> Option<&str> {
        self.occurrence_group.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Display order.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn referenced_entity_type(&self) -> Option<&str> {
        self.referenced_entity_type.as_deref()
    }

    pub fn has_categories(&self) -> bool {
        !self.categories.is_empty()
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// A value is missing when it is null or names a missing category.
    /// A sequence is missing when all of its elements are.
    pub fn is_missing_value(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        if value.is_sequence() {
            return value.elements().iter().all(|e| self.is_missing_value(e));
        }
        let Some(literal) = value.to_literal() else {
            return true;
        };
        self.categories
            .iter()
            .any(|c| c.missing && c.name == literal)
    }

    /// Null value of the right shape for this variable.
    pub fn null_value(&self) -> Value {
        if self.repeatable {
            self.value_type.null_sequence()
        } else {
            self.value_type.null_value()
        }
    }

    /// Check that `value` can be stored for this variable.
    ///
    /// The type must match. Single values written to a repeatable variable
    /// are wrapped into a sequence; sequences are refused for
    /// non-repeatable variables.
    pub fn normalize_value(&self, value: Value) -> Result<Value> {
        if value.value_type() != self.value_type {
            return Err(MagmaError::conversion(
                self.value_type,
                &value,
                format!(
                    "variable '{}' expects {} values, got {}",
                    self.name,
                    self.value_type,
                    value.value_type()
                ),
            ));
        }
        match (self.repeatable, value.is_sequence()) {
            (true, false) => Ok(value.as_sequence()),
            (false, true) => Err(MagmaError::InvalidArgument(format!(
                "Variable '{}' is not repeatable and cannot hold a sequence",
                self.name
            ))),
            _ => Ok(value),
        }
    }
}

impl AttributeAware for Variable {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// Accumulates variable metadata; [`VariableBuilder::build`] validates it.
#[derive(Debug, Clone)]
pub struct VariableBuilder {
    name: String,
    value_type: ValueType,
    entity_type: String,
    repeatable: bool,
    occurrence_group: Option<String>,
    mime_type: Option<String>,
    unit: Option<String>,
    index: u32,
    referenced_entity_type: Option<String>,
    categories: Vec<Category>,
    attributes: Vec<Attribute>,
}

impl VariableBuilder {
    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    pub fn occurrence_group(mut self, group: impl Into<String>) -> Self {
        self.occurrence_group = Some(group.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn referenced_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.referenced_entity_type = Some(entity_type.into());
        self
    }

    pub fn add_category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }

    pub fn add_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn add_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn add_attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Drop the categories collected so far.
    pub fn clear_categories(mut self) -> Self {
        self.categories.clear();
        self
    }

    pub fn build(self) -> Result<Variable> {
        if self.name.is_empty() {
            return Err(MagmaError::InvalidArgument(
                "Variable name cannot be empty".to_string(),
            ));
        }
        if self.entity_type.is_empty() {
            return Err(MagmaError::InvalidArgument(format!(
                "Entity type of variable '{}' cannot be empty",
                self.name
            )));
        }
        if self.repeatable && self.occurrence_group.as_deref().map_or(true, str::is_empty) {
            return Err(MagmaError::InvalidArgument(format!(
                "Repeatable variable '{}' needs an occurrence group",
                self.name
            )));
        }
        for (i, category) in self.categories.iter().enumerate() {
            if self.categories[..i].iter().any(|c| c.name == category.name) {
                return Err(MagmaError::InvalidArgument(format!(
                    "Duplicate category '{}' in variable '{}'",
                    category.name, self.name
                )));
            }
        }
        let attributes: Attributes = self.attributes.try_into().map_err(|e| match e {
            MagmaError::InvalidArgument(msg) => {
                MagmaError::InvalidArgument(format!("{msg} in variable '{}'", self.name))
            }
            other => other,
        })?;

        Ok(Variable {
            name: self.name,
            value_type: self.value_type,
            entity_type: self.entity_type,
            repeatable: self.repeatable,
            occurrence_group: self.occurrence_group,
            mime_type: self.mime_type,
            unit: self.unit,
            index: self.index,
            referenced_entity_type: self.referenced_entity_type,
            categories: self.categories,
            attributes,
        })
    }
}

/// Wire form of a variable; deserialization goes through the builder.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariableDocument {
    name: String,
    value_type: ValueType,
    entity_type: String,
    #[serde(default)]
    repeatable: bool,
    #[serde(default)]
    occurrence_group: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    referenced_entity_type: Option<String>,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    attributes: Attributes,
}

impl TryFrom<VariableDocument> for Variable {
    type Error = MagmaError;

    fn try_from(doc: VariableDocument) -> Result<Self> {
        let mut builder = Variable::builder(doc.name, doc.value_type, doc.entity_type)
            .repeatable(doc.repeatable)
            .index(doc.index)
            .add_categories(doc.categories)
            .add_attributes(doc.attributes.iter().cloned());
        if let Some(g) = doc.occurrence_group {
            builder = builder.occurrence_group(g);
        }
        if let Some(m) = doc.mime_type {
            builder = builder.mime_type(m);
        }
        if let Some(u) = doc.unit {
            builder = builder.unit(u);
        }
        if let Some(r) = doc.referenced_entity_type {
            builder = builder.referenced_entity_type(r);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;

    fn sex() -> Variable {
        Variable::builder("sex", ValueType::Text, "Participant")
            .index(2)
            .add_category(Category::builder("M").code("1").build().unwrap())
            .add_category(Category::builder("F").code("2").build().unwrap())
            .add_category(Category::builder("DK").missing(true).build().unwrap())
            .add_attribute(Attribute::builder("label").locale("en").text("Sex").build().unwrap())
            .add_attribute(Attribute::builder("label").text("sex").build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_variable() {
        let v = sex();
        assert_eq!(v.name(), "sex");
        assert_eq!(v.value_type(), ValueType::Text);
        assert!(v.has_categories());
        assert!(v.has_attributes());
        assert_eq!(v.category("F").unwrap().code(), Some("2"));
        assert_eq!(v.index(), 2);
        let fr_ca = Locale::parse("fr-CA").unwrap();
        assert_eq!(v.attribute_text("label", Some(&fr_ca)).as_deref(), Some("sex"));
    }

    #[test]
    fn test_duplicate_category_fails() {
        let err = Variable::builder("v", ValueType::Text, "Participant")
            .add_category(Category::builder("A").build().unwrap())
            .add_category(Category::builder("A").missing(true).build().unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, MagmaError::InvalidArgument(ref m) if m.contains("Duplicate category")));
    }

    #[test]
    fn test_duplicate_attribute_fails() {
        let result = Variable::builder("v", ValueType::Text, "Participant")
            .add_attribute(Attribute::builder("label").text("a").build().unwrap())
            .add_attribute(Attribute::builder("label").text("b").build().unwrap())
            .build();
        assert!(result.is_err());

        let result = Category::builder("A")
            .add_attribute(Attribute::builder("label").locale("en").build().unwrap())
            .add_attribute(Attribute::builder("label").locale("EN").build().unwrap())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_repeatable_requires_occurrence_group() {
        assert!(Variable::builder("visits", ValueType::Date, "Participant")
            .repeatable(true)
            .build()
            .is_err());
        let v = Variable::builder("visits", ValueType::Date, "Participant")
            .repeatable(true)
            .occurrence_group("Visit")
            .build()
            .unwrap();
        assert!(v.is_repeatable());
        assert!(v.null_value().is_sequence());
    }

    #[test]
    fn test_empty_names_fail() {
        assert!(Variable::builder("", ValueType::Text, "Participant").build().is_err());
        assert!(Variable::builder("v", ValueType::Text, "").build().is_err());
        assert!(Category::builder("").build().is_err());
    }

    #[test]
    fn test_missing_values() {
        let v = sex();
        assert!(v.is_missing_value(&ValueType::Text.null_value()));
        assert!(v.is_missing_value(&Value::text("DK")));
        assert!(!v.is_missing_value(&Value::text("M")));
        let seq = ValueType::Text
            .sequence_of(vec![Value::text("DK"), ValueType::Text.null_value()])
            .unwrap();
        assert!(v.is_missing_value(&seq));
    }

    #[test]
    fn test_normalize_value() {
        let age = Variable::builder("age", ValueType::Integer, "Participant")
            .build()
            .unwrap();
        assert!(age.normalize_value(Value::integer(3)).is_ok());
        assert!(matches!(
            age.normalize_value(Value::text("3")),
            Err(MagmaError::ValueConversion { .. })
        ));
        let seq = ValueType::Integer.sequence_of(vec![Value::integer(1)]).unwrap();
        assert!(age.normalize_value(seq).is_err());

        let visits = age
            .to_builder()
            .repeatable(true)
            .occurrence_group("Visit")
            .build()
            .unwrap();
        let normalized = visits.normalize_value(Value::integer(3)).unwrap();
        assert!(normalized.is_sequence());
        assert_eq!(normalized.size(), 1);
    }

    #[test]
    fn test_to_builder_preserves_metadata() {
        let v = sex();
        let rebuilt = v.to_builder().unit("n/a").build().unwrap();
        assert_eq!(rebuilt.categories(), v.categories());
        assert_eq!(rebuilt.attributes(), v.attributes());
        assert_eq!(rebuilt.unit(), Some("n/a"));
        assert_ne!(rebuilt, v);
        assert_eq!(v.to_builder().build().unwrap(), v);
    }

    #[test]
    fn test_document_roundtrip() {
        let v = sex();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["valueType"], "text");
        assert_eq!(json["entityType"], "Participant");
        assert_eq!(json["categories"][2]["missing"], true);
        let back: Variable = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_document_enforces_invariants() {
        let json = r#"{"name":"visits","valueType":"date","entityType":"Participant","repeatable":true}"#;
        assert!(serde_json::from_str::<Variable>(json).is_err());
        let yaml = "name: age\nvalueType: integer\nentityType: Participant\nunit: years\n";
        let v: Variable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(v.unit(), Some("years"));
        assert!(!v.is_repeatable());
    }
}
