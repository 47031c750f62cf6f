//! Datasource configuration files.
//!
//! TOML:
//!
//! ```toml
//! [[datasource]]
//! name = "scratch"
//! type = "memory"
//!
//! [[datasource]]
//! name = "study"
//! type = "csv"
//! directory = "data/study"
//! entity_type = "Participant"
//! id_columns = ["id"]
//! delimiter = ";"
//!
//! [datasource.column_types]
//! age = "integer"
//! ```
//!
//! YAML files carry the same fields under a `datasource:` list. Relative
//! CSV directories are resolved against the directory of the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Context;
use magma_csv_datasource::CsvDatasourceConfig;
use serde::{Deserialize, Serialize};

/// Backend of one configured datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatasourceKind {
    Memory,
    Csv(CsvDatasourceConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceEntry {
    pub name: String,

    #[serde(flatten)]
    pub kind: DatasourceKind,
}

/// Root of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagmaConfig {
    #[serde(rename = "datasource", default)]
    pub datasources: Vec<DatasourceEntry>,
}

impl MagmaConfig {
    /// Load a `.toml`, `.yaml` or `.yml` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mut config = match extension.as_deref() {
            Some("toml") => Self::from_toml(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => anyhow::bail!(
                "Unsupported configuration format {} (expected .toml, .yaml or .yml)",
                path.display()
            ),
        }
        .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_directories(base);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.datasources {
            if entry.name.trim().is_empty() {
                anyhow::bail!("Datasource entries need a name");
            }
            if !seen.insert(entry.name.as_str()) {
                anyhow::bail!("Datasource '{}' is configured twice", entry.name);
            }
        }
        Ok(())
    }

    fn resolve_directories(&mut self, base: &Path) {
        for entry in &mut self.datasources {
            if let DatasourceKind::Csv(csv) = &mut entry.kind {
                if csv.directory.is_relative() {
                    csv.directory = base.join(&csv.directory);
                }
            }
        }
    }
}
