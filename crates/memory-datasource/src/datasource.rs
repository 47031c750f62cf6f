use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use magma_core::datasource::check_table_name;
use magma_core::{
    Datasource, Lifecycle, MagmaError, Result, TableCache, ValueTable, ValueTableWriter,
};
use tracing::{debug, info};

use crate::table::MemoryValueTable;
use crate::writer::MemoryTableWriter;

pub const DATASOURCE_TYPE: &str = "memory";

/// Writable tables, plus new tables waiting for their first commit.
pub(crate) struct Registry {
    datasource: String,
    tables: TableCache<MemoryValueTable>,
    pending: RwLock<BTreeMap<String, Arc<MemoryValueTable>>>,
}

impl Registry {
    /// Make a pending table visible. No-op for registered tables.
    pub(crate) fn publish(&self, name: &str) -> Result<()> {
        let mut pending = self.write_pending()?;
        if let Some(table) = pending.remove(name) {
            self.tables.insert(table)?;
            info!("Registered new table '{name}' in datasource '{}'", self.datasource);
        }
        Ok(())
    }

    pub(crate) fn discard_pending(&self, name: &str) {
        if let Ok(mut pending) = self.pending.write() {
            if pending.remove(name).is_some() {
                debug!("Discarded uncommitted table '{name}'");
            }
        }
    }

    /// The table a first writer of `name` writes to: a table published in
    /// the meantime, the pending one, or a new pending table from `create`.
    fn pending_or_create(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<Arc<MemoryValueTable>>,
    ) -> Result<Arc<MemoryValueTable>> {
        let mut pending = self.write_pending()?;
        if let Some(published) = self.tables.get(name)? {
            return Ok(published);
        }
        match pending.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(create()?))),
        }
    }

    fn write_pending(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Arc<MemoryValueTable>>>> {
        self.pending
            .write()
            .map_err(|_| MagmaError::runtime("Pending table lock was poisoned"))
    }
}

/// Datasource holding writable memory tables and registered read-only
/// tables (bean tables, views).
pub struct MemoryDatasource {
    name: String,
    lifecycle: Lifecycle,
    registry: Arc<Registry>,
    registered: TableCache<dyn ValueTable>,
}

impl MemoryDatasource {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            lifecycle: Lifecycle::new(name.clone()),
            registry: Arc::new(Registry {
                datasource: name.clone(),
                tables: TableCache::new(name.clone()),
                pending: RwLock::new(BTreeMap::new()),
            }),
            registered: TableCache::new(name.clone()),
            name,
        }
    }

    /// Register a read-only table; it is initialised here.
    pub fn add_value_table(&self, table: Arc<dyn ValueTable>) -> Result<()> {
        let name = table.name();
        check_table_name(&name)?;
        if self.registry.tables.contains(&name)? {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' already has a table '{name}'",
                self.name
            )));
        }
        table.initialise()?;
        self.registered.insert(table)
    }

    /// Writable table called `name`, if any.
    pub fn memory_table(&self, name: &str) -> Result<Option<Arc<MemoryValueTable>>> {
        self.registry.tables.get(name)
    }
}

impl Datasource for MemoryDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasource_type(&self) -> &'static str {
        DATASOURCE_TYPE
    }

    fn initialise(&self) -> Result<()> {
        self.lifecycle.initialise(|| Ok(()))
    }

    fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose(|| {
            self.registry.tables.dispose_all()?;
            self.registered.dispose_all()
        })
    }

    fn value_table_names(&self) -> Result<Vec<String>> {
        self.lifecycle.check_open()?;
        let mut names = self.registry.tables.names()?;
        names.extend(self.registered.names()?);
        names.sort();
        Ok(names)
    }

    fn value_table(&self, name: &str) -> Result<Arc<dyn ValueTable>> {
        self.lifecycle.check_open()?;
        if let Some(table) = self.registry.tables.get(name)? {
            return Ok(table as Arc<dyn ValueTable>);
        }
        self.registered
            .get(name)?
            .ok_or_else(|| MagmaError::NoSuchValueTable {
                datasource: self.name.clone(),
                table: name.to_string(),
            })
    }

    fn can_drop_table(&self, _name: &str) -> bool {
        true
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        self.lifecycle.check_open()?;
        if let Some(table) = self.registry.tables.get(name)? {
            let _guard = table.write_lock().acquire(name)?;
            self.registry.tables.evict(name)?;
        } else if self.registered.evict(name)?.is_none() {
            return Err(MagmaError::NoSuchValueTable {
                datasource: self.name.clone(),
                table: name.to_string(),
            });
        }
        info!("Dropped table '{name}' from datasource '{}'", self.name);
        Ok(())
    }

    fn can_rename_table(&self, _name: &str) -> bool {
        true
    }

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()> {
        self.lifecycle.check_open()?;
        check_table_name(new_name)?;
        if self.value_table_names()?.iter().any(|n| n == new_name) {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' already has a table '{new_name}'",
                self.name
            )));
        }
        if let Some(table) = self.registry.tables.get(name)? {
            let _guard = table.write_lock().acquire(name)?;
            self.registry.tables.rename(name, new_name)?;
        } else if self.registered.contains(name)? {
            self.registered.rename(name, new_name)?;
        } else {
            return Err(MagmaError::NoSuchValueTable {
                datasource: self.name.clone(),
                table: name.to_string(),
            });
        }
        info!("Renamed table '{name}' to '{new_name}' in datasource '{}'", self.name);
        Ok(())
    }

    fn create_writer(&self, table: &str, entity_type: &str) -> Result<Box<dyn ValueTableWriter>> {
        self.lifecycle.check_open()?;
        check_table_name(table)?;
        if self.registered.contains(table)? {
            return Err(MagmaError::Unsupported(format!(
                "Table '{table}' of datasource '{}' is read-only",
                self.name
            )));
        }
        let target = match self.registry.tables.get(table)? {
            Some(existing) => existing,
            None => self.registry.pending_or_create(table, || {
                let created = Arc::new(MemoryValueTable::new(&self.name, table, entity_type));
                created.initialise()?;
                Ok(created)
            })?,
        };
        if !target.is_for_entity_type(entity_type) {
            return Err(MagmaError::InvalidArgument(format!(
                "Table '{table}' holds {} entities, not {entity_type}",
                target.entity_type()
            )));
        }
        let guard = target.write_lock().acquire(table)?;
        Ok(Box::new(MemoryTableWriter::new(
            target,
            Arc::clone(&self.registry),
            guard,
        )))
    }
}
