//! Datasources: named registries of value tables with an explicit
//! initialise/dispose lifecycle.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{MagmaError, Result};
use crate::table::{TableState, ValueTable};
use crate::writer::ValueTableWriter;

pub trait Datasource: Send + Sync {
    fn name(&self) -> &str;

    /// Backend identifier, e.g. `memory` or `csv`.
    fn datasource_type(&self) -> &'static str;

    fn initialise(&self) -> Result<()>;

    /// Release backend resources and dispose every cached table.
    fn dispose(&self) -> Result<()>;

    fn value_table_names(&self) -> Result<Vec<String>>;

    fn has_value_table(&self, name: &str) -> Result<bool> {
        Ok(self.value_table_names()?.iter().any(|n| n == name))
    }

    /// The table called `name`, created and initialised on first access.
    fn value_table(&self, name: &str) -> Result<Arc<dyn ValueTable>>;

    fn value_tables(&self) -> Result<Vec<Arc<dyn ValueTable>>> {
        self.value_table_names()?
            .iter()
            .map(|name| self.value_table(name))
            .collect()
    }

    fn can_drop_table(&self, _name: &str) -> bool {
        false
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        Err(MagmaError::Unsupported(format!(
            "Datasource '{}' cannot drop table '{name}'",
            self.name()
        )))
    }

    fn can_rename_table(&self, _name: &str) -> bool {
        false
    }

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()> {
        Err(MagmaError::Unsupported(format!(
            "Datasource '{}' cannot rename table '{name}' to '{new_name}'",
            self.name()
        )))
    }

    /// Open a write session on an existing or new table.
    ///
    /// A new table is not listed until the session commits a variable or a
    /// value set.
    fn create_writer(&self, table: &str, entity_type: &str) -> Result<Box<dyn ValueTableWriter>>;
}

/// Fail unless `name` is usable as a table name.
pub fn check_table_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MagmaError::InvalidArgument(
            "Table name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Initialise-once / dispose-once guard of a datasource.
#[derive(Debug)]
pub struct Lifecycle {
    datasource: String,
    state: RwLock<TableState>,
}

impl Lifecycle {
    pub fn new(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            state: RwLock::new(TableState::Uninitialised),
        }
    }

    /// Run `init` on the first call only.
    pub fn initialise(&self, init: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut state = self.state.write().map_err(|_| MagmaError::poisoned("datasource state"))?;
        match *state {
            TableState::Initialised => Ok(()),
            TableState::Disposed => Err(self.disposed()),
            TableState::Uninitialised => {
                init()?;
                *state = TableState::Initialised;
                info!("Datasource '{}' initialised", self.datasource);
                Ok(())
            }
        }
    }

    /// Run `release` on the first call only.
    pub fn dispose(&self, release: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut state = self.state.write().map_err(|_| MagmaError::poisoned("datasource state"))?;
        if *state == TableState::Disposed {
            return Ok(());
        }
        *state = TableState::Disposed;
        release()?;
        info!("Datasource '{}' disposed", self.datasource);
        Ok(())
    }

    /// Fail unless the datasource is initialised.
    pub fn check_open(&self) -> Result<()> {
        let state = self.state.read().map_err(|_| MagmaError::poisoned("datasource state"))?;
        match *state {
            TableState::Initialised => Ok(()),
            TableState::Uninitialised => Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' is not initialised",
                self.datasource
            ))),
            TableState::Disposed => Err(self.disposed()),
        }
    }

    fn disposed(&self) -> MagmaError {
        MagmaError::InvalidArgument(format!("Datasource '{}' has been disposed", self.datasource))
    }
}

// ============================================================================
// Table cache
// ============================================================================

/// Tables of a datasource, each created and initialised exactly once.
pub struct TableCache<T: ValueTable + ?Sized> {
    datasource: String,
    tables: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: ValueTable + ?Sized> TableCache<T> {
    pub fn new(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<T>>> {
        Ok(self.read()?.get(name).cloned())
    }

    /// Cached table, or `create` + initialise under the cache lock.
    pub fn get_or_init(&self, name: &str, create: impl FnOnce() -> Result<Arc<T>>) -> Result<Arc<T>> {
        if let Some(table) = self.get(name)? {
            return Ok(table);
        }
        let mut tables = self.write()?;
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }
        let table = create()?;
        table.initialise()?;
        debug!("Cached table '{name}' of datasource '{}'", self.datasource);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Register an already initialised table.
    pub fn insert(&self, table: Arc<T>) -> Result<()> {
        let name = table.name();
        let mut tables = self.write()?;
        if tables.contains_key(&name) {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' already has a table '{name}'",
                self.datasource
            )));
        }
        tables.insert(name, table);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Remove and dispose a table.
    pub fn evict(&self, name: &str) -> Result<Option<Arc<T>>> {
        let removed = self.write()?.remove(name);
        if let Some(table) = &removed {
            table.dispose()?;
            debug!("Evicted table '{name}' of datasource '{}'", self.datasource);
        }
        Ok(removed)
    }

    /// Re-key a cached table and update its name.
    pub fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        let mut tables = self.write()?;
        if tables.contains_key(new_name) {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' already has a table '{new_name}'",
                self.datasource
            )));
        }
        if let Some(table) = tables.remove(name) {
            table.core().set_name(new_name)?;
            tables.insert(new_name.to_string(), table);
        }
        Ok(())
    }

    /// Dispose and forget every table.
    pub fn dispose_all(&self) -> Result<()> {
        let drained = std::mem::take(&mut *self.write()?);
        for (_, table) in drained {
            table.dispose()?;
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<T>>>> {
        self.tables.read().map_err(|_| MagmaError::poisoned("table cache"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<T>>>> {
        self.tables.write().map_err(|_| MagmaError::poisoned("table cache"))
    }
}
