//! Tables derived from collections of serializable structs.
//!
//! Each serde field becomes a variable. Field types are inferred from the
//! JSON form of the beans: booleans, integers, other numbers (decimal) and
//! strings map to the matching value types; arrays become repeatable
//! variables whose occurrence group is the field name; anything else is
//! text.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use magma_core::{
    MagmaError, Result, StaticTimestamps, Timestamps, Value, ValueSet, ValueSource, ValueTable,
    ValueTableCore, ValueType, Variable, VariableEntity, VariableEntityProvider,
    VariableValueSource, VariableValueSourceFactory,
};
use serde::Serialize;
use serde_json::Map;
use tracing::debug;

type Fields = Map<String, serde_json::Value>;

/// Read-only table over a snapshot of beans.
pub struct BeanValueTable {
    core: ValueTableCore,
    rows: Arc<BTreeMap<VariableEntity, Fields>>,
    variables: Vec<Variable>,
    timestamps: StaticTimestamps,
}

impl BeanValueTable {
    /// Snapshot `beans`, keyed by `id`.
    pub fn new<T, F>(
        datasource: &str,
        name: &str,
        entity_type: &str,
        beans: &[T],
        id: F,
    ) -> Result<Self>
    where
        T: Serialize,
        F: Fn(&T) -> String,
    {
        let mut rows = BTreeMap::new();
        for bean in beans {
            let entity = VariableEntity::new(entity_type, id(bean))?;
            let fields = match serde_json::to_value(bean) {
                Ok(serde_json::Value::Object(fields)) => fields,
                Ok(_) => {
                    return Err(MagmaError::InvalidArgument(format!(
                        "Beans of table '{name}' must serialize to objects"
                    )))
                }
                Err(e) => return Err(MagmaError::runtime_with("Cannot serialize bean", e)),
            };
            if rows.insert(entity.clone(), fields).is_some() {
                return Err(MagmaError::InvalidArgument(format!(
                    "Duplicate bean identifier {entity} in table '{name}'"
                )));
            }
        }
        let variables = infer_variables(entity_type, &rows)?;
        debug!(
            "Bean table '{name}' has {} variable(s) over {} bean(s)",
            variables.len(),
            rows.len()
        );
        let provider = Arc::new(BeanEntities {
            entity_type: entity_type.to_string(),
            entities: rows.keys().cloned().collect(),
        });
        Ok(Self {
            core: ValueTableCore::new(datasource, name, provider),
            rows: Arc::new(rows),
            variables,
            timestamps: StaticTimestamps::new(Some(chrono::Utc::now()), None),
        })
    }
}

impl ValueTable for BeanValueTable {
    fn core(&self) -> &ValueTableCore {
        &self.core
    }

    fn initialise(&self) -> Result<()> {
        self.core.initialise_with(self)
    }

    fn timestamps(&self) -> Arc<dyn Timestamps> {
        Arc::new(self.timestamps)
    }
}

impl VariableValueSourceFactory for BeanValueTable {
    fn create_sources(&self) -> Result<Vec<Arc<dyn VariableValueSource>>> {
        Ok(self
            .variables
            .iter()
            .map(|v| {
                Arc::new(BeanSource {
                    variable: v.clone(),
                    rows: Arc::clone(&self.rows),
                }) as Arc<dyn VariableValueSource>
            })
            .collect())
    }
}

fn infer_variables(
    entity_type: &str,
    rows: &BTreeMap<VariableEntity, Fields>,
) -> Result<Vec<Variable>> {
    let mut kinds: BTreeMap<&str, Option<(ValueType, bool)>> = BTreeMap::new();
    for fields in rows.values() {
        for (name, json) in fields {
            let entry = kinds.entry(name.as_str()).or_insert(None);
            if let Some(next) = infer(json) {
                *entry = Some(match *entry {
                    Some(current) => merge(current, next),
                    None => next,
                });
            }
        }
    }
    let mut variables = Vec::with_capacity(kinds.len());
    for (index, (name, kind)) in kinds.into_iter().enumerate() {
        let (value_type, repeatable) = kind.unwrap_or((ValueType::Text, false));
        let mut builder = Variable::builder(name, value_type, entity_type)
            .index(index as u32)
            .repeatable(repeatable);
        if repeatable {
            builder = builder.occurrence_group(name);
        }
        variables.push(builder.build()?);
    }
    Ok(variables)
}

/// Combine the type seen so far with the type of another bean's field.
/// Integers widen to decimals; other disagreements fall back to text.
fn merge(current: (ValueType, bool), next: (ValueType, bool)) -> (ValueType, bool) {
    let repeatable = current.1 || next.1;
    let value_type = match (current.0, next.0) {
        (a, b) if a == b => a,
        (ValueType::Integer, ValueType::Decimal) | (ValueType::Decimal, ValueType::Integer) => {
            ValueType::Decimal
        }
        _ => ValueType::Text,
    };
    (value_type, repeatable)
}

fn infer(json: &serde_json::Value) -> Option<(ValueType, bool)> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Array(items) => {
            let element = items
                .iter()
                .filter_map(infer)
                .map(|(t, _)| (t, false))
                .reduce(merge)
                .map_or(ValueType::Text, |(t, _)| t);
            Some((element, true))
        }
        other => Some((scalar_type(other), false)),
    }
}

fn scalar_type(json: &serde_json::Value) -> ValueType {
    match json {
        serde_json::Value::Bool(_) => ValueType::Boolean,
        serde_json::Value::Number(n) if n.is_i64() => ValueType::Integer,
        serde_json::Value::Number(_) => ValueType::Decimal,
        _ => ValueType::Text,
    }
}

fn to_value(json: &serde_json::Value, value_type: ValueType) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(value_type.null_value()),
        serde_json::Value::String(s) => value_type.parse(s),
        serde_json::Value::Bool(b) if value_type == ValueType::Boolean => value_type.value_of(*b),
        serde_json::Value::Number(n) if value_type == ValueType::Integer => match n.as_i64() {
            Some(i) => value_type.value_of(i),
            None => Err(MagmaError::conversion(value_type, n, "not a 64-bit integer")),
        },
        serde_json::Value::Number(n) => value_type.parse(&n.to_string()),
        serde_json::Value::Bool(b) => value_type.parse(&b.to_string()),
        other => value_type.value_of(other.to_string()),
    }
}

struct BeanEntities {
    entity_type: String,
    entities: BTreeSet<VariableEntity>,
}

impl VariableEntityProvider for BeanEntities {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn variable_entities(&self) -> Result<BTreeSet<VariableEntity>> {
        Ok(self.entities.clone())
    }
}

struct BeanSource {
    variable: Variable,
    rows: Arc<BTreeMap<VariableEntity, Fields>>,
}

impl ValueSource for BeanSource {
    fn value_type(&self) -> ValueType {
        self.variable.value_type()
    }

    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let fields = self
            .rows
            .get(value_set.entity())
            .ok_or_else(|| MagmaError::NoSuchValueSet {
                table: value_set.table().to_string(),
                entity: value_set.entity().clone(),
            })?;
        let value_type = self.variable.value_type();
        match fields.get(self.variable.name()) {
            None | Some(serde_json::Value::Null) => Ok(self.variable.null_value()),
            Some(serde_json::Value::Array(items)) if self.variable.is_repeatable() => {
                let elements = items
                    .iter()
                    .map(|item| to_value(item, value_type))
                    .collect::<Result<Vec<_>>>()?;
                value_type.sequence_of(elements)
            }
            Some(json) => self.variable.normalize_value(to_value(json, value_type)?),
        }
    }
}

impl VariableValueSource for BeanSource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
}
