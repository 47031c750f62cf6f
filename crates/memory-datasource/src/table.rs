//! Tables held in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use magma_core::writer::WriteLock;
use magma_core::{
    MagmaError, Result, StaticTimestamps, Timestamps, Value, ValueSet, ValueSource, ValueTable,
    ValueTableCore, ValueType, Variable, VariableEntity, VariableEntityProvider,
    VariableValueSource, VariableValueSourceFactory,
};
use tracing::warn;

#[derive(Debug)]
pub(crate) struct Row {
    pub cells: BTreeMap<String, Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct TableStore {
    pub variables: BTreeMap<String, Variable>,
    pub rows: BTreeMap<VariableEntity, Row>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl TableStore {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            variables: BTreeMap::new(),
            rows: BTreeMap::new(),
            created: now,
            updated: now,
        }
    }

    /// Upsert a variable. A change of type or repeatability drops the
    /// stored cells of that variable.
    pub fn put_variable(&mut self, variable: Variable) {
        let name = variable.name().to_string();
        if let Some(previous) = self.variables.get(&name) {
            if previous.value_type() != variable.value_type()
                || previous.is_repeatable() != variable.is_repeatable()
            {
                warn!(
                    "Variable '{name}' changed from {} to {}; dropping its values",
                    previous.value_type(),
                    variable.value_type()
                );
                self.drop_cells(&name);
            }
        }
        self.variables.insert(name, variable);
    }

    pub fn remove_variable(&mut self, name: &str) -> bool {
        self.drop_cells(name);
        self.variables.remove(name).is_some()
    }

    fn drop_cells(&mut self, name: &str) {
        for row in self.rows.values_mut() {
            row.cells.remove(name);
        }
    }

    /// Apply staged cells; returns whether the entity is new.
    pub fn apply_row(&mut self, entity: VariableEntity, cells: BTreeMap<String, Value>) -> bool {
        let now = Utc::now();
        let mut created = false;
        let row = self.rows.entry(entity).or_insert_with(|| {
            created = true;
            Row {
                cells: BTreeMap::new(),
                created: now,
                updated: now,
            }
        });
        for (name, value) in cells {
            if value.is_null() {
                row.cells.remove(&name);
            } else {
                row.cells.insert(name, value);
            }
        }
        row.updated = now;
        self.updated = now;
        created
    }

    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

pub(crate) type SharedStore = Arc<RwLock<TableStore>>;

pub(crate) fn read(store: &SharedStore) -> Result<RwLockReadGuard<'_, TableStore>> {
    store
        .read()
        .map_err(|_| MagmaError::runtime("Memory table store lock was poisoned"))
}

pub(crate) fn write(store: &SharedStore) -> Result<RwLockWriteGuard<'_, TableStore>> {
    store
        .write()
        .map_err(|_| MagmaError::runtime("Memory table store lock was poisoned"))
}

/// A table whose variables and rows live in memory.
#[derive(Debug)]
pub struct MemoryValueTable {
    core: ValueTableCore,
    store: SharedStore,
    lock: WriteLock,
}

impl MemoryValueTable {
    pub fn new(datasource: &str, name: &str, entity_type: &str) -> Self {
        let store = Arc::new(RwLock::new(TableStore::new()));
        let provider = Arc::new(MemoryEntities {
            entity_type: entity_type.to_string(),
            store: Arc::clone(&store),
        });
        Self {
            core: ValueTableCore::new(datasource, name, provider),
            store,
            lock: WriteLock::new(),
        }
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn write_lock(&self) -> &WriteLock {
        &self.lock
    }

    pub(crate) fn source_for(&self, variable: Variable) -> Arc<dyn VariableValueSource> {
        Arc::new(MemorySource {
            variable,
            store: Arc::clone(&self.store),
        })
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> Result<usize> {
        Ok(read(&self.store)?.rows.len())
    }
}

impl ValueTable for MemoryValueTable {
    fn core(&self) -> &ValueTableCore {
        &self.core
    }

    fn initialise(&self) -> Result<()> {
        self.core.initialise_with(self)
    }

    fn timestamps(&self) -> Arc<dyn Timestamps> {
        match read(&self.store) {
            Ok(store) => Arc::new(StaticTimestamps::new(Some(store.created), Some(store.updated))),
            Err(_) => Arc::new(StaticTimestamps::unknown()),
        }
    }

    fn value_set_timestamps(&self, value_set: &ValueSet) -> Result<Arc<dyn Timestamps>> {
        let store = read(&self.store)?;
        let row = store
            .rows
            .get(value_set.entity())
            .ok_or_else(|| MagmaError::NoSuchValueSet {
                table: self.name(),
                entity: value_set.entity().clone(),
            })?;
        Ok(Arc::new(StaticTimestamps::new(Some(row.created), Some(row.updated))))
    }
}

impl VariableValueSourceFactory for MemoryValueTable {
    fn create_sources(&self) -> Result<Vec<Arc<dyn VariableValueSource>>> {
        let variables: Vec<Variable> = read(&self.store)?.variables.values().cloned().collect();
        Ok(variables.into_iter().map(|v| self.source_for(v)).collect())
    }
}

struct MemoryEntities {
    entity_type: String,
    store: SharedStore,
}

impl VariableEntityProvider for MemoryEntities {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn variable_entities(&self) -> Result<BTreeSet<VariableEntity>> {
        Ok(read(&self.store)?.rows.keys().cloned().collect())
    }
}

struct MemorySource {
    variable: Variable,
    store: SharedStore,
}

impl ValueSource for MemorySource {
    fn value_type(&self) -> ValueType {
        self.variable.value_type()
    }

    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let store = read(&self.store)?;
        let row = store
            .rows
            .get(value_set.entity())
            .ok_or_else(|| MagmaError::NoSuchValueSet {
                table: value_set.table().to_string(),
                entity: value_set.entity().clone(),
            })?;
        Ok(row
            .cells
            .get(self.variable.name())
            .cloned()
            .unwrap_or_else(|| self.variable.null_value()))
    }
}

impl VariableValueSource for MemorySource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
}
