use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use magma_core::datasource::check_table_name;
use magma_core::{
    Datasource, Lifecycle, MagmaError, Result, TableCache, ValueTable, ValueTableWriter,
};
use tracing::{debug, info};

use crate::config::CsvDatasourceConfig;
use crate::files::{list_tables, remove_if_exists, rename_if_exists, TableFiles};
use crate::table::CsvValueTable;
use crate::writer::CsvTableWriter;

pub const DATASOURCE_TYPE: &str = "csv";

/// Loaded tables, plus new tables whose files are not written yet.
pub(crate) struct Registry {
    datasource: String,
    tables: TableCache<CsvValueTable>,
    pending: RwLock<BTreeMap<String, Arc<CsvValueTable>>>,
}

impl Registry {
    pub(crate) fn publish(&self, name: &str) -> Result<()> {
        let mut pending = self.write_pending()?;
        if let Some(table) = pending.remove(name) {
            self.tables.insert(table)?;
            info!("Created table '{name}' in CSV datasource '{}'", self.datasource);
        }
        Ok(())
    }

    pub(crate) fn discard_pending(&self, name: &str) {
        if let Ok(mut pending) = self.pending.write() {
            if pending.remove(name).is_some() {
                debug!("Discarded uncommitted CSV table '{name}'");
            }
        }
    }

    /// The table a first writer of `name` writes to: a table published in
    /// the meantime, the pending one, or a new pending table from `create`.
    fn pending_or_create(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<Arc<CsvValueTable>>,
    ) -> Result<Arc<CsvValueTable>> {
        let mut pending = self.write_pending()?;
        if let Some(published) = self.tables.get(name)? {
            return Ok(published);
        }
        match pending.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(create()?))),
        }
    }

    fn write_pending(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Arc<CsvValueTable>>>> {
        self.pending
            .write()
            .map_err(|_| MagmaError::runtime("Pending table lock was poisoned"))
    }

    fn pending(&self, name: &str) -> Result<Option<Arc<CsvValueTable>>> {
        Ok(self
            .pending
            .read()
            .map_err(|_| MagmaError::runtime("Pending table lock was poisoned"))?
            .get(name)
            .cloned())
    }
}

/// A directory of CSV tables.
pub struct CsvDatasource {
    name: String,
    config: Arc<CsvDatasourceConfig>,
    lifecycle: Lifecycle,
    registry: Arc<Registry>,
}

impl CsvDatasource {
    pub fn new(name: impl Into<String>, config: CsvDatasourceConfig) -> Self {
        let name = name.into();
        Self {
            config: Arc::new(config),
            lifecycle: Lifecycle::new(name.clone()),
            registry: Arc::new(Registry {
                datasource: name.clone(),
                tables: TableCache::new(name.clone()),
                pending: RwLock::new(BTreeMap::new()),
            }),
            name,
        }
    }

    pub fn config(&self) -> &CsvDatasourceConfig {
        &self.config
    }

    /// Loaded table called `name`.
    pub fn csv_table(&self, name: &str) -> Result<Arc<CsvValueTable>> {
        self.lifecycle.check_open()?;
        if !list_tables(&self.config.directory)?.iter().any(|n| n == name)
            && !self.registry.tables.contains(name)?
        {
            return Err(self.no_such_table(name));
        }
        self.registry.tables.get_or_init(name, || {
            Ok(Arc::new(CsvValueTable::open(
                &self.name,
                name,
                Arc::clone(&self.config),
            )?))
        })
    }

    fn no_such_table(&self, name: &str) -> MagmaError {
        MagmaError::NoSuchValueTable {
            datasource: self.name.clone(),
            table: name.to_string(),
        }
    }
}

impl Datasource for CsvDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasource_type(&self) -> &'static str {
        DATASOURCE_TYPE
    }

    fn initialise(&self) -> Result<()> {
        self.lifecycle.initialise(|| {
            self.config.delimiter_byte()?;
            let directory = &self.config.directory;
            if !directory.is_dir() {
                fs::create_dir_all(directory)?;
                info!("Created CSV directory {}", directory.display());
            }
            Ok(())
        })
    }

    fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose(|| self.registry.tables.dispose_all())
    }

    fn value_table_names(&self) -> Result<Vec<String>> {
        self.lifecycle.check_open()?;
        let mut names = list_tables(&self.config.directory)?;
        for name in self.registry.tables.names()? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn value_table(&self, name: &str) -> Result<Arc<dyn ValueTable>> {
        Ok(self.csv_table(name)? as Arc<dyn ValueTable>)
    }

    fn can_drop_table(&self, _name: &str) -> bool {
        true
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        self.lifecycle.check_open()?;
        if !self.has_value_table(name)? {
            return Err(self.no_such_table(name));
        }
        match self.registry.tables.get(name)? {
            Some(table) => {
                let _guard = table.write_lock().acquire(name)?;
                let files = table.files()?;
                self.registry.tables.evict(name)?;
                for path in files.all() {
                    remove_if_exists(path)?;
                }
            }
            None => {
                for path in TableFiles::new(&self.config.directory, name).all() {
                    remove_if_exists(path)?;
                }
            }
        }
        info!("Dropped table '{name}' from CSV datasource '{}'", self.name);
        Ok(())
    }

    fn can_rename_table(&self, _name: &str) -> bool {
        true
    }

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()> {
        self.lifecycle.check_open()?;
        check_table_name(new_name)?;
        let names = self.value_table_names()?;
        if !names.iter().any(|n| n == name) {
            return Err(self.no_such_table(name));
        }
        if names.iter().any(|n| n == new_name) || self.registry.pending(new_name)?.is_some() {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{}' already has a table '{new_name}'",
                self.name
            )));
        }
        match self.registry.tables.get(name)? {
            Some(table) => {
                let _guard = table.write_lock().acquire(name)?;
                table.move_files(new_name)?;
                self.registry.tables.rename(name, new_name)?;
            }
            None => {
                let from = TableFiles::new(&self.config.directory, name);
                let to = TableFiles::new(&self.config.directory, new_name);
                for (from, to) in from.all().into_iter().zip(to.all()) {
                    rename_if_exists(from, to)?;
                }
            }
        }
        info!("Renamed table '{name}' to '{new_name}' in CSV datasource '{}'", self.name);
        Ok(())
    }

    fn create_writer(&self, table: &str, entity_type: &str) -> Result<Box<dyn ValueTableWriter>> {
        self.lifecycle.check_open()?;
        check_table_name(table)?;
        let target = if self.has_value_table(table)? {
            self.csv_table(table)?
        } else {
            self.registry.pending_or_create(table, || {
                let created = Arc::new(CsvValueTable::create(
                    &self.name,
                    table,
                    entity_type,
                    Arc::clone(&self.config),
                ));
                created.initialise()?;
                Ok(created)
            })?
        };
        if !target.is_for_entity_type(entity_type) {
            return Err(MagmaError::InvalidArgument(format!(
                "Table '{table}' holds {} entities, not {entity_type}",
                target.entity_type()
            )));
        }
        let guard = target.write_lock().acquire(table)?;
        Ok(Box::new(CsvTableWriter::new(
            target,
            Arc::clone(&self.registry),
            guard,
        )?))
    }
}
