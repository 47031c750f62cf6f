//! Value tables: a named set of entities of one type plus the variable
//! sources describing its columns.
//!
//! Backends embed a [`ValueTableCore`] and implement [`ValueTable`]; the
//! core owns the lifecycle, the variable index and the entity cache behind
//! one lock per table.
//!
//! ```text
//! Uninitialised --initialise--> Initialised --dispose--> Disposed
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::entity::VariableEntity;
use crate::error::{MagmaError, Result};
use crate::source::{
    Timestamps, ValueSet, VariableEntityProvider, VariableValueSource, VariableValueSourceFactory,
};
use crate::values::Value;
use crate::variable::Variable;

/// Lifecycle of a table (and of a datasource).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Uninitialised,
    Initialised,
    Disposed,
}

struct CoreState {
    state: TableState,
    sources: BTreeMap<String, Arc<dyn VariableValueSource>>,
    entities: Option<Arc<BTreeSet<VariableEntity>>>,
}

/// Shared bookkeeping of a value table.
pub struct ValueTableCore {
    name: RwLock<String>,
    datasource: String,
    provider: Arc<dyn VariableEntityProvider>,
    inner: RwLock<CoreState>,
}

impl std::fmt::Debug for ValueTableCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueTableCore")
            .field("name", &self.name())
            .field("datasource", &self.datasource)
            .field("entity_type", &self.entity_type())
            .finish_non_exhaustive()
    }
}

impl ValueTableCore {
    pub fn new(
        datasource: impl Into<String>,
        name: impl Into<String>,
        provider: Arc<dyn VariableEntityProvider>,
    ) -> Self {
        Self {
            name: RwLock::new(name.into()),
            datasource: datasource.into(),
            provider,
            inner: RwLock::new(CoreState {
                state: TableState::Uninitialised,
                sources: BTreeMap::new(),
                entities: None,
            }),
        }
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .map(|n| n.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Used by datasources when renaming a table.
    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let mut current = self.name.write().map_err(|_| MagmaError::poisoned("table name"))?;
        *current = name.into();
        Ok(())
    }

    pub fn datasource_name(&self) -> &str {
        &self.datasource
    }

    pub fn entity_type(&self) -> &str {
        self.provider.entity_type()
    }

    pub fn state(&self) -> Result<TableState> {
        Ok(self.read()?.state)
    }

    /// Populate the variable index from `factory`.
    ///
    /// A second call on an initialised table is a no-op.
    pub fn initialise_with(&self, factory: &dyn VariableValueSourceFactory) -> Result<()> {
        let mut inner = self.write()?;
        match inner.state {
            TableState::Initialised => {
                debug!("Table '{}' is already initialised", self.name());
                return Ok(());
            }
            TableState::Disposed => {
                return Err(MagmaError::InvalidArgument(format!(
                    "Table '{}' has been disposed",
                    self.name()
                )));
            }
            TableState::Uninitialised => {}
        }
        let mut sources = BTreeMap::new();
        for source in factory.create_sources()? {
            self.check_source(source.as_ref())?;
            let name = source.variable().name().to_string();
            if sources.insert(name.clone(), source).is_some() {
                return Err(MagmaError::InvalidArgument(format!(
                    "Duplicate variable '{name}' in table '{}'",
                    self.name()
                )));
            }
        }
        info!(
            "Initialised table '{}' of datasource '{}' with {} variable(s)",
            self.name(),
            self.datasource,
            sources.len()
        );
        inner.sources = sources;
        inner.entities = None;
        inner.state = TableState::Initialised;
        Ok(())
    }

    /// Add or replace the source of one variable.
    pub fn add_variable_value_source(&self, source: Arc<dyn VariableValueSource>) -> Result<()> {
        self.check_source(source.as_ref())?;
        let mut inner = self.write()?;
        self.check_open(inner.state)?;
        let name = source.variable().name().to_string();
        if inner.sources.insert(name.clone(), source).is_some() {
            debug!("Replaced variable '{name}' in table '{}'", self.name());
        }
        Ok(())
    }

    pub fn add_variable_value_sources(&self, factory: &dyn VariableValueSourceFactory) -> Result<()> {
        for source in factory.create_sources()? {
            self.add_variable_value_source(source)?;
        }
        Ok(())
    }

    /// Remove a variable; returns whether it existed.
    pub fn remove_variable_value_source(&self, name: &str) -> Result<bool> {
        let mut inner = self.write()?;
        self.check_open(inner.state)?;
        Ok(inner.sources.remove(name).is_some())
    }

    pub fn variable_value_source(&self, name: &str) -> Result<Arc<dyn VariableValueSource>> {
        let inner = self.read()?;
        self.check_readable(inner.state)?;
        inner
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| MagmaError::NoSuchVariable {
                table: self.name(),
                variable: name.to_string(),
            })
    }

    pub fn has_variable(&self, name: &str) -> Result<bool> {
        let inner = self.read()?;
        self.check_readable(inner.state)?;
        Ok(inner.sources.contains_key(name))
    }

    /// Variables in display order (index, then name).
    pub fn variables(&self) -> Result<Vec<Variable>> {
        let inner = self.read()?;
        self.check_readable(inner.state)?;
        let mut variables: Vec<Variable> = inner
            .sources
            .values()
            .map(|s| s.variable().clone())
            .collect();
        variables.sort_by(|a, b| a.index().cmp(&b.index()).then_with(|| a.name().cmp(b.name())));
        Ok(variables)
    }

    /// Members of the table, cached until [`ValueTableCore::invalidate_entities`].
    pub fn entities(&self) -> Result<Arc<BTreeSet<VariableEntity>>> {
        {
            let inner = self.read()?;
            self.check_readable(inner.state)?;
            if let Some(entities) = &inner.entities {
                return Ok(Arc::clone(entities));
            }
        }
        let mut inner = self.write()?;
        self.check_readable(inner.state)?;
        if let Some(entities) = &inner.entities {
            return Ok(Arc::clone(entities));
        }
        let entities = self.provider.variable_entities()?;
        if let Some(stray) = entities.iter().find(|e| !e.is_of_type(self.entity_type())) {
            return Err(MagmaError::InvalidArgument(format!(
                "Entity {stray} does not belong to table '{}' of type {}",
                self.name(),
                self.entity_type()
            )));
        }
        debug!("Loaded {} entities of table '{}'", entities.len(), self.name());
        let entities = Arc::new(entities);
        inner.entities = Some(Arc::clone(&entities));
        Ok(entities)
    }

    /// Drop the entity cache after the provider's membership changed.
    pub fn invalidate_entities(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.entities = None;
        Ok(())
    }

    pub fn value_set(&self, entity: &VariableEntity) -> Result<ValueSet> {
        if self.entities()?.contains(entity) {
            Ok(ValueSet::new(&self.datasource, self.name(), entity.clone()))
        } else {
            Err(MagmaError::NoSuchValueSet {
                table: self.name(),
                entity: entity.clone(),
            })
        }
    }

    /// Release the index; later reads fail.
    pub fn dispose(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.state != TableState::Disposed {
            debug!("Disposing table '{}'", self.name());
            inner.sources.clear();
            inner.entities = None;
            inner.state = TableState::Disposed;
        }
        Ok(())
    }

    fn check_source(&self, source: &dyn VariableValueSource) -> Result<()> {
        let variable = source.variable();
        if !variable.is_for_entity_type(self.entity_type()) {
            return Err(MagmaError::InvalidArgument(format!(
                "Variable '{}' of entity type {} cannot be added to table '{}' of type {}",
                variable.name(),
                variable.entity_type(),
                self.name(),
                self.entity_type()
            )));
        }
        Ok(())
    }

    fn check_open(&self, state: TableState) -> Result<()> {
        if state == TableState::Disposed {
            return Err(MagmaError::InvalidArgument(format!(
                "Table '{}' has been disposed",
                self.name()
            )));
        }
        Ok(())
    }

    fn check_readable(&self, state: TableState) -> Result<()> {
        match state {
            TableState::Initialised => Ok(()),
            TableState::Uninitialised => Err(MagmaError::InvalidArgument(format!(
                "Table '{}' is not initialised",
                self.name()
            ))),
            TableState::Disposed => self.check_open(state),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CoreState>> {
        self.inner.read().map_err(|_| MagmaError::poisoned("table index"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, CoreState>> {
        self.inner.write().map_err(|_| MagmaError::poisoned("table index"))
    }
}

/// A logical table of one datasource.
///
/// Only [`ValueTable::core`], [`ValueTable::initialise`] and
/// [`ValueTable::timestamps`] are backend-specific; everything else is
/// answered by the core.
pub trait ValueTable: Send + Sync {
    fn core(&self) -> &ValueTableCore;

    /// Build the variable index. Safe to call twice.
    fn initialise(&self) -> Result<()>;

    /// Table-level timestamps.
    fn timestamps(&self) -> Arc<dyn Timestamps>;

    /// Timestamps of one row; tables without per-row tracking answer with
    /// the table timestamps.
    fn value_set_timestamps(&self, value_set: &ValueSet) -> Result<Arc<dyn Timestamps>> {
        self.core().value_set(value_set.entity())?;
        Ok(self.timestamps())
    }

    fn name(&self) -> String {
        self.core().name()
    }

    fn datasource_name(&self) -> &str {
        self.core().datasource_name()
    }

    fn entity_type(&self) -> &str {
        self.core().entity_type()
    }

    fn is_for_entity_type(&self, entity_type: &str) -> bool {
        self.entity_type() == entity_type
    }

    fn variable_entities(&self) -> Result<Arc<BTreeSet<VariableEntity>>> {
        self.core().entities()
    }

    fn has_value_set(&self, entity: &VariableEntity) -> Result<bool> {
        Ok(self.core().entities()?.contains(entity))
    }

    fn value_set(&self, entity: &VariableEntity) -> Result<ValueSet> {
        self.core().value_set(entity)
    }

    fn value_sets(&self) -> Result<Vec<ValueSet>> {
        let name = self.name();
        Ok(self
            .core()
            .entities()?
            .iter()
            .map(|e| ValueSet::new(self.datasource_name(), name.clone(), e.clone()))
            .collect())
    }

    fn variables(&self) -> Result<Vec<Variable>> {
        self.core().variables()
    }

    fn has_variable(&self, name: &str) -> Result<bool> {
        self.core().has_variable(name)
    }

    fn variable(&self, name: &str) -> Result<Variable> {
        Ok(self.core().variable_value_source(name)?.variable().clone())
    }

    fn variable_value_source(&self, name: &str) -> Result<Arc<dyn VariableValueSource>> {
        self.core().variable_value_source(name)
    }

    /// Source lookup qualified by entity type; a foreign entity type is a
    /// missing variable.
    fn variable_value_source_for(
        &self,
        entity_type: &str,
        name: &str,
    ) -> Result<Arc<dyn VariableValueSource>> {
        if !self.is_for_entity_type(entity_type) {
            return Err(MagmaError::NoSuchVariable {
                table: self.name(),
                variable: format!("{entity_type}:{name}"),
            });
        }
        self.variable_value_source(name)
    }

    /// Value of one cell.
    fn value(&self, variable: &str, value_set: &ValueSet) -> Result<Value> {
        self.variable_value_source(variable)?.value(value_set)
    }

    fn dispose(&self) -> Result<()> {
        self.core().dispose()
    }
}
