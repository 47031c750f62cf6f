//! Value resolution: value sets, value sources and the backend seams that
//! feed a table (entity providers, source factories, timestamps).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entity::VariableEntity;
use crate::error::Result;
use crate::types::ValueType;
use crate::values::Value;
use crate::variable::Variable;

/// Resolution context binding one entity to one table.
///
/// Carries identity only; values are fetched through a [`ValueSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueSet {
    datasource: String,
    table: String,
    entity: VariableEntity,
}

impl ValueSet {
    pub fn new(
        datasource: impl Into<String>,
        table: impl Into<String>,
        entity: VariableEntity,
    ) -> Self {
        Self {
            datasource: datasource.into(),
            table: table.into(),
            entity,
        }
    }

    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn entity(&self) -> &VariableEntity {
        &self.entity
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.datasource, self.table, self.entity)
    }
}

/// Produces a value for a value set.
///
/// Implementations must not mutate the table or entity and must be safe to
/// call repeatedly. Logically absent data is a null [`Value`]; an entity
/// that is not a member of the table is `MagmaError::NoSuchValueSet`.
pub trait ValueSource: Send + Sync {
    fn value_type(&self) -> ValueType;

    fn value(&self, value_set: &ValueSet) -> Result<Value>;
}

/// A value source describing one column of a table.
pub trait VariableValueSource: ValueSource {
    fn variable(&self) -> &Variable;
}

/// Lazily enumerates the members of a table.
pub trait VariableEntityProvider: Send + Sync {
    fn entity_type(&self) -> &str;

    fn is_for_entity_type(&self, entity_type: &str) -> bool {
        self.entity_type() == entity_type
    }

    /// Current members; may be recomputed on every call.
    fn variable_entities(&self) -> Result<BTreeSet<VariableEntity>>;
}

/// Builds the variable sources of a table at initialisation.
///
/// One implementation per strategy: column-derived, metadata-derived,
/// bean-derived, view-derived.
pub trait VariableValueSourceFactory {
    fn create_sources(&self) -> Result<Vec<Arc<dyn VariableValueSource>>>;
}

/// Created and last-update instants, as `datetime` values (null when unknown).
pub trait Timestamps: Send + Sync {
    fn created(&self) -> Value;

    fn last_update(&self) -> Value;
}

/// Timestamps captured at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticTimestamps {
    pub created: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl StaticTimestamps {
    pub fn new(created: Option<DateTime<Utc>>, last_update: Option<DateTime<Utc>>) -> Self {
        Self {
            created,
            last_update,
        }
    }

    /// Both instants unknown.
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl Timestamps for StaticTimestamps {
    fn created(&self) -> Value {
        Value::datetime_or_null(self.created)
    }

    fn last_update(&self) -> Value {
        Value::datetime_or_null(self.last_update)
    }
}
