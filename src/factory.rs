//! Datasource bootstrap.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use magma_core::{Datasource, MagmaEngine, MagmaError, Result};
use magma_csv_datasource::{CsvDatasource, CsvDatasourceConfig};
use magma_memory_datasource::MemoryDatasource;
use tracing::{info, warn};

use crate::config::{DatasourceEntry, DatasourceKind, MagmaConfig};

/// Builds one datasource.
pub trait DatasourceFactory {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Arc<dyn Datasource>>;
}

pub struct MemoryDatasourceFactory {
    pub name: String,
}

impl DatasourceFactory for MemoryDatasourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Arc<dyn Datasource>> {
        Ok(Arc::new(MemoryDatasource::new(self.name.clone())))
    }
}

pub struct CsvDatasourceFactory {
    pub name: String,
    pub config: CsvDatasourceConfig,
}

impl DatasourceFactory for CsvDatasourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Arc<dyn Datasource>> {
        Ok(Arc::new(CsvDatasource::new(
            self.name.clone(),
            self.config.clone(),
        )))
    }
}

impl DatasourceEntry {
    pub fn factory(&self) -> Box<dyn DatasourceFactory> {
        match &self.kind {
            DatasourceKind::Memory => Box::new(MemoryDatasourceFactory {
                name: self.name.clone(),
            }),
            DatasourceKind::Csv(config) => Box::new(CsvDatasourceFactory {
                name: self.name.clone(),
                config: config.clone(),
            }),
        }
    }
}

/// Initialised datasources by name.
#[derive(Default)]
pub struct Magma {
    datasources: RwLock<BTreeMap<String, Arc<dyn Datasource>>>,
}

impl Magma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and initialise every configured datasource.
    pub fn from_config(config: &MagmaConfig) -> Result<Self> {
        let magma = Self::new();
        for entry in &config.datasources {
            magma.add_datasource(entry.factory().as_ref())?;
        }
        Ok(magma)
    }

    pub fn add_datasource(&self, factory: &dyn DatasourceFactory) -> Result<Arc<dyn Datasource>> {
        let name = factory.name().to_string();
        if self.read()?.contains_key(&name) {
            return Err(MagmaError::InvalidArgument(format!(
                "Datasource '{name}' is already registered"
            )));
        }
        let datasource = factory.create()?;
        datasource.initialise()?;
        info!(
            "Registered {} datasource '{name}'",
            datasource.datasource_type()
        );
        self.write()?.insert(name, Arc::clone(&datasource));
        Ok(datasource)
    }

    pub fn datasource(&self, name: &str) -> Result<Arc<dyn Datasource>> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| MagmaError::InvalidArgument(format!("No datasource '{name}'")))
    }

    pub fn datasource_names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Dispose and forget one datasource.
    pub fn remove_datasource(&self, name: &str) -> Result<()> {
        let removed = self.write()?.remove(name);
        match removed {
            Some(datasource) => datasource.dispose(),
            None => Err(MagmaError::InvalidArgument(format!("No datasource '{name}'"))),
        }
    }

    /// Dispose every datasource, then stop the engine.
    ///
    /// All datasources are disposed even if one fails; the first failure is
    /// returned.
    pub fn shutdown(&self) -> Result<()> {
        let drained = std::mem::take(&mut *self.write()?);
        let mut first_error = None;
        for (name, datasource) in drained {
            if let Err(e) = datasource.dispose() {
                warn!("Failed to dispose datasource '{name}': {e}");
                first_error.get_or_insert(e);
            }
        }
        MagmaEngine::shutdown();
        info!("Magma shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<dyn Datasource>>>> {
        self.datasources
            .read()
            .map_err(|_| MagmaError::runtime("Datasource registry lock was poisoned"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn Datasource>>>> {
        self.datasources
            .write()
            .map_err(|_| MagmaError::runtime("Datasource registry lock was poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let magma = Magma::new();
        let factory = MemoryDatasourceFactory {
            name: "mem".to_string(),
        };
        let ds = magma.add_datasource(&factory).unwrap();
        assert_eq!(ds.datasource_type(), "memory");
        assert!(magma.add_datasource(&factory).is_err());
        assert_eq!(magma.datasource_names().unwrap(), vec!["mem"]);
        assert!(magma.datasource("other").is_err());

        magma.shutdown().unwrap();
        assert!(magma.datasource_names().unwrap().is_empty());
        assert!(ds.value_table_names().is_err());
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = MagmaConfig {
            datasources: vec![
                DatasourceEntry {
                    name: "mem".to_string(),
                    kind: DatasourceKind::Memory,
                },
                DatasourceEntry {
                    name: "files".to_string(),
                    kind: DatasourceKind::Csv(CsvDatasourceConfig::new(dir.path())),
                },
            ],
        };
        let magma = Magma::from_config(&config).unwrap();
        assert_eq!(magma.datasource("files").unwrap().datasource_type(), "csv");
        magma.remove_datasource("mem").unwrap();
        assert!(magma.remove_datasource("mem").is_err());
    }
}
