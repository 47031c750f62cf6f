//! Entity identity: the row key of every value table.

use std::fmt;

use tracing::warn;

use crate::error::{MagmaError, Result};

/// Separator between the components of a composite identifier.
pub const IDENTIFIER_SEPARATOR: char = '-';

/// Identity of one row: (entity type, identifier), compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableEntity {
    entity_type: String,
    identifier: String,
}

impl VariableEntity {
    pub fn new(entity_type: impl Into<String>, identifier: impl Into<String>) -> Result<Self> {
        let entity_type = entity_type.into();
        let identifier = identifier.into();
        if entity_type.is_empty() {
            return Err(MagmaError::InvalidArgument(
                "Entity type cannot be empty".to_string(),
            ));
        }
        if identifier.is_empty() {
            return Err(MagmaError::InvalidArgument(format!(
                "Identifier of {entity_type} entity cannot be empty"
            )));
        }
        Ok(Self {
            entity_type,
            identifier,
        })
    }

    /// Build an entity whose identifier is made of several key columns,
    /// joined with `-` in column order.
    ///
    /// A component containing `-` cannot be split back unambiguously; it is
    /// accepted and logged.
    pub fn from_components<I, S>(entity_type: impl Into<String>, components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entity_type = entity_type.into();
        let mut identifier = String::new();
        for (i, component) in components.into_iter().enumerate() {
            let component = component.as_ref();
            if component.is_empty() {
                return Err(MagmaError::InvalidArgument(format!(
                    "Component {i} of {entity_type} identifier is empty"
                )));
            }
            if component.contains(IDENTIFIER_SEPARATOR) {
                warn!(
                    "Identifier component '{component}' of {entity_type} contains '{IDENTIFIER_SEPARATOR}'; \
                     the composite identifier cannot be split back unambiguously"
                );
            }
            if i > 0 {
                identifier.push(IDENTIFIER_SEPARATOR);
            }
            identifier.push_str(component);
        }
        Self::new(entity_type, identifier)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Split a composite identifier on `-`.
    pub fn components(&self) -> Vec<&str> {
        self.identifier.split(IDENTIFIER_SEPARATOR).collect()
    }

    /// Whether this entity belongs to `entity_type`.
    pub fn is_of_type(&self, entity_type: &str) -> bool {
        self.entity_type == entity_type
    }
}

impl fmt::Display for VariableEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_equality_and_map_keys() {
        let a = VariableEntity::new("Participant", "1").unwrap();
        let b = VariableEntity::new("Participant", "1").unwrap();
        let mut map = HashMap::new();
        map.insert(a.clone(), "first");
        assert_eq!(map.get(&b), Some(&"first"));

        assert_ne!(a, VariableEntity::new("Participant", "2").unwrap());
        assert_ne!(a, VariableEntity::new("Sample", "1").unwrap());
        assert_ne!(a, VariableEntity::new("participant", "1").unwrap());
    }

    #[test]
    fn test_rejects_empty_fields() {
        assert!(matches!(
            VariableEntity::new("", "1"),
            Err(MagmaError::InvalidArgument(_))
        ));
        assert!(VariableEntity::new("Participant", "").is_err());
    }

    #[test]
    fn test_composite_identifier() {
        let e = VariableEntity::from_components("Visit", ["P01", "2024"]).unwrap();
        assert_eq!(e.identifier(), "P01-2024");
        assert_eq!(e.components(), vec!["P01", "2024"]);
        assert!(VariableEntity::from_components("Visit", ["P01", ""]).is_err());
    }

    #[test]
    fn test_composite_identifier_with_separator_is_ambiguous() {
        let e = VariableEntity::from_components("Visit", ["P-01", "2024"]).unwrap();
        assert_eq!(e.components(), vec!["P", "01", "2024"]);
    }

    #[test]
    fn test_display() {
        let e = VariableEntity::new("Participant", "42").unwrap();
        assert_eq!(e.to_string(), "Participant:42");
    }
}
