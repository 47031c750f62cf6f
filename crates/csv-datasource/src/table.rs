//! Tables backed by one CSV data file and optional metadata sheets.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use magma_core::writer::WriteLock;
use magma_core::{
    DatasourceParsingError, MagmaError, Result, StaticTimestamps, TableState, Timestamps, Value,
    ValueSet, ValueSource, ValueTable, ValueTableCore, ValueType, Variable, VariableEntity,
    VariableEntityProvider, VariableValueSource, VariableValueSourceFactory,
};
use magma_csv_types::csv_string_to_value;
use tracing::{debug, info, warn};

use crate::config::CsvDatasourceConfig;
use crate::files::TableFiles;
use crate::metadata::{self, cell, Sheet};

/// Where the variables of a table come from, decided when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvVariableStrategy {
    /// One text (or configured type) variable per data column.
    Columns,
    /// The `<table>.variables.csv` sheet.
    Metadata,
}

/// Parsed content of the table files.
#[derive(Debug, Default, Clone)]
pub(crate) struct Snapshot {
    pub variables: Vec<Variable>,
    pub rows: BTreeMap<VariableEntity, BTreeMap<String, Value>>,
    pub last_update: Option<DateTime<Utc>>,
}

type SharedSnapshot = Arc<RwLock<Snapshot>>;

fn read(snapshot: &SharedSnapshot) -> Result<RwLockReadGuard<'_, Snapshot>> {
    snapshot
        .read()
        .map_err(|_| MagmaError::runtime("CSV table snapshot lock was poisoned"))
}

fn write(snapshot: &SharedSnapshot) -> Result<RwLockWriteGuard<'_, Snapshot>> {
    snapshot
        .write()
        .map_err(|_| MagmaError::runtime("CSV table snapshot lock was poisoned"))
}

fn parsing_error<P: ToString>(
    message: impl Into<String>,
    code: &str,
    parameters: impl IntoIterator<Item = P>,
) -> MagmaError {
    DatasourceParsingError::new(message, code)
        .with_parameters(parameters)
        .into()
}

/// A table read from `<table>.csv`.
#[derive(Debug)]
pub struct CsvValueTable {
    core: ValueTableCore,
    config: Arc<CsvDatasourceConfig>,
    files: RwLock<TableFiles>,
    snapshot: SharedSnapshot,
    strategy: RwLock<CsvVariableStrategy>,
    lock: WriteLock,
}

impl CsvValueTable {
    /// Table over existing files; the entity type comes from the variables
    /// sheet, else from the configuration.
    pub(crate) fn open(
        datasource: &str,
        name: &str,
        config: Arc<CsvDatasourceConfig>,
    ) -> Result<Self> {
        let files = TableFiles::new(&config.directory, name);
        let declared = if files.variables.is_file() {
            metadata::sheet_entity_type(&files.variables, config.delimiter_byte()?)?
        } else {
            None
        };
        let entity_type = declared.unwrap_or_else(|| config.entity_type.clone());
        Ok(Self::with_files(datasource, name, &entity_type, config, files))
    }

    /// Table whose files do not exist yet.
    pub(crate) fn create(
        datasource: &str,
        name: &str,
        entity_type: &str,
        config: Arc<CsvDatasourceConfig>,
    ) -> Self {
        let files = TableFiles::new(&config.directory, name);
        Self::with_files(datasource, name, entity_type, config, files)
    }

    fn with_files(
        datasource: &str,
        name: &str,
        entity_type: &str,
        config: Arc<CsvDatasourceConfig>,
        files: TableFiles,
    ) -> Self {
        let snapshot = Arc::new(RwLock::new(Snapshot::default()));
        let provider = Arc::new(CsvEntities {
            entity_type: entity_type.to_string(),
            snapshot: Arc::clone(&snapshot),
        });
        Self {
            core: ValueTableCore::new(datasource, name, provider),
            config,
            files: RwLock::new(files),
            snapshot,
            strategy: RwLock::new(CsvVariableStrategy::Columns),
            lock: WriteLock::new(),
        }
    }

    pub fn strategy(&self) -> CsvVariableStrategy {
        self.strategy
            .read()
            .map(|s| *s)
            .unwrap_or(CsvVariableStrategy::Columns)
    }

    pub(crate) fn config(&self) -> &CsvDatasourceConfig {
        &self.config
    }

    pub(crate) fn files(&self) -> Result<TableFiles> {
        self.files
            .read()
            .map(|f| f.clone())
            .map_err(|_| MagmaError::runtime("CSV table files lock was poisoned"))
    }

    pub(crate) fn write_lock(&self) -> &WriteLock {
        &self.lock
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        Ok(read(&self.snapshot)?.clone())
    }

    /// Move the files of this table to those of `new_name`.
    pub(crate) fn move_files(&self, new_name: &str) -> Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| MagmaError::runtime("CSV table files lock was poisoned"))?;
        let target = TableFiles::new(&self.config.directory, new_name);
        for (from, to) in files.all().into_iter().zip(target.all()) {
            crate::files::rename_if_exists(from, to)?;
        }
        *files = target;
        Ok(())
    }

    /// Re-read the files and resynchronise the variable index.
    pub(crate) fn reload(&self) -> Result<()> {
        let (snapshot, strategy) = self.load()?;
        let current: BTreeSet<String> = snapshot
            .variables
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        for variable in self.core.variables()? {
            if !current.contains(variable.name()) {
                self.core.remove_variable_value_source(variable.name())?;
            }
        }
        for variable in &snapshot.variables {
            self.core
                .add_variable_value_source(self.source_for(variable.clone()))?;
        }
        *write(&self.snapshot)? = snapshot;
        self.set_strategy(strategy)?;
        self.core.invalidate_entities()?;
        debug!("Reloaded CSV table '{}'", self.name());
        Ok(())
    }

    fn set_strategy(&self, strategy: CsvVariableStrategy) -> Result<()> {
        *self
            .strategy
            .write()
            .map_err(|_| MagmaError::runtime("CSV table strategy lock was poisoned"))? = strategy;
        Ok(())
    }

    fn source_for(&self, variable: Variable) -> Arc<dyn VariableValueSource> {
        Arc::new(CsvSource {
            variable,
            snapshot: Arc::clone(&self.snapshot),
        })
    }

    fn load(&self) -> Result<(Snapshot, CsvVariableStrategy)> {
        let files = self.files()?;
        let delimiter = self.config.delimiter_byte()?;
        let entity_type = self.core.entity_type();

        let (declared, strategy) = if files.variables.is_file() {
            let categories = if files.categories.is_file() {
                metadata::read_categories(&files.categories, delimiter)?
            } else {
                BTreeMap::new()
            };
            let variables =
                metadata::read_variables(&files.variables, delimiter, entity_type, categories)?;
            (Some(variables), CsvVariableStrategy::Metadata)
        } else {
            (None, CsvVariableStrategy::Columns)
        };

        if !files.data.is_file() {
            return Ok((
                Snapshot {
                    variables: declared.unwrap_or_default(),
                    ..Snapshot::default()
                },
                strategy,
            ));
        }

        let sheet = Sheet::read(&files.data, delimiter)?;
        let mut id_columns = Vec::with_capacity(self.config.id_columns.len());
        for id in &self.config.id_columns {
            let column = sheet.column(id).ok_or_else(|| {
                parsing_error(
                    format!("Identifier column '{id}' is missing"),
                    "CsvMissingColumn",
                    [sheet.file.clone(), id.clone()],
                )
            })?;
            id_columns.push(column);
        }

        let variables = match declared {
            Some(variables) => variables,
            None => self.column_variables(&sheet)?,
        };
        let mut columns = Vec::with_capacity(variables.len());
        for variable in &variables {
            match sheet.column(variable.name()) {
                Some(column) => columns.push((column, variable)),
                None => debug!(
                    "Variable '{}' has no column in {}",
                    variable.name(),
                    sheet.file
                ),
            }
        }
        for header in &sheet.headers {
            if !self.config.is_id_column(header) && !variables.iter().any(|v| v.name() == header) {
                warn!("Column '{header}' of {} is not a declared variable", sheet.file);
            }
        }

        let mut rows = BTreeMap::new();
        for (line, record) in &sheet.records {
            let components: Vec<&str> = id_columns.iter().map(|c| cell(record, Some(*c))).collect();
            if components.iter().any(|c| c.is_empty()) {
                return Err(parsing_error(
                    "Empty entity identifier",
                    "CsvEmptyIdentifier",
                    [sheet.file.clone(), line.to_string()],
                ));
            }
            let entity = VariableEntity::from_components(entity_type, components)?;
            let mut cells = BTreeMap::new();
            for (column, variable) in &columns {
                let text = record.get(*column).unwrap_or("");
                let value = csv_string_to_value(text, variable.value_type(), variable.is_repeatable())
                    .map_err(|e| {
                        parsing_error(
                            format!("Invalid value: {e}"),
                            "CsvInvalidValue",
                            [sheet.file.clone(), line.to_string(), variable.name().to_string()],
                        )
                    })?;
                if !value.is_null() {
                    cells.insert(variable.name().to_string(), value);
                }
            }
            if rows.insert(entity.clone(), cells).is_some() {
                return Err(parsing_error(
                    format!("Duplicate entity identifier '{}'", entity.identifier()),
                    "CsvDuplicateIdentifier",
                    [sheet.file.clone(), line.to_string()],
                ));
            }
        }

        let last_update = fs::metadata(&files.data)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        info!(
            "Loaded {} row(s) and {} variable(s) from {}",
            rows.len(),
            variables.len(),
            sheet.file
        );
        Ok((
            Snapshot {
                variables,
                rows,
                last_update,
            },
            strategy,
        ))
    }

    fn column_variables(&self, sheet: &Sheet) -> Result<Vec<Variable>> {
        let mut variables = Vec::new();
        for (position, header) in sheet.headers.iter().enumerate() {
            if self.config.is_id_column(header) {
                continue;
            }
            let value_type = self
                .config
                .column_types
                .get(header)
                .copied()
                .unwrap_or(ValueType::Text);
            let variable = Variable::builder(header.as_str(), value_type, self.core.entity_type())
                .index(position as u32)
                .build()
                .map_err(|e| sheet.invalid(1, e))?;
            variables.push(variable);
        }
        Ok(variables)
    }
}

impl ValueTable for CsvValueTable {
    fn core(&self) -> &ValueTableCore {
        &self.core
    }

    fn initialise(&self) -> Result<()> {
        if self.core.state()? != TableState::Uninitialised {
            return self.core.initialise_with(self);
        }
        let (snapshot, strategy) = self.load()?;
        *write(&self.snapshot)? = snapshot;
        self.set_strategy(strategy)?;
        self.core.initialise_with(self)
    }

    fn timestamps(&self) -> Arc<dyn Timestamps> {
        let last_update = read(&self.snapshot).ok().and_then(|s| s.last_update);
        Arc::new(StaticTimestamps::new(None, last_update))
    }
}

impl VariableValueSourceFactory for CsvValueTable {
    fn create_sources(&self) -> Result<Vec<Arc<dyn VariableValueSource>>> {
        let variables = read(&self.snapshot)?.variables.clone();
        Ok(variables.into_iter().map(|v| self.source_for(v)).collect())
    }
}

#[derive(Debug)]
struct CsvEntities {
    entity_type: String,
    snapshot: SharedSnapshot,
}

impl VariableEntityProvider for CsvEntities {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn variable_entities(&self) -> Result<BTreeSet<VariableEntity>> {
        Ok(read(&self.snapshot)?.rows.keys().cloned().collect())
    }
}

struct CsvSource {
    variable: Variable,
    snapshot: SharedSnapshot,
}

impl ValueSource for CsvSource {
    fn value_type(&self) -> ValueType {
        self.variable.value_type()
    }

    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let snapshot = read(&self.snapshot)?;
        let row = snapshot
            .rows
            .get(value_set.entity())
            .ok_or_else(|| MagmaError::NoSuchValueSet {
                table: value_set.table().to_string(),
                entity: value_set.entity().clone(),
            })?;
        Ok(row
            .get(self.variable.name())
            .cloned()
            .unwrap_or_else(|| self.variable.null_value()))
    }
}

impl VariableValueSource for CsvSource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(dir: &std::path::Path, config: CsvDatasourceConfig) -> CsvValueTable {
        let config = Arc::new(CsvDatasourceConfig {
            directory: dir.to_path_buf(),
            ..config
        });
        CsvValueTable::open("csv", "people", config).unwrap()
    }

    #[test]
    fn test_column_strategy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("people.csv"), "id,name,age\n1,Ada,36\n2,,\n").unwrap();
        let mut column_types = BTreeMap::new();
        column_types.insert("age".to_string(), ValueType::Integer);
        let t = table(
            dir.path(),
            CsvDatasourceConfig {
                column_types,
                ..CsvDatasourceConfig::default()
            },
        );
        t.initialise().unwrap();

        assert_eq!(t.strategy(), CsvVariableStrategy::Columns);
        let names: Vec<String> = t.variables().unwrap().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["name", "age"]);
        let one = VariableEntity::new("Participant", "1").unwrap();
        let two = VariableEntity::new("Participant", "2").unwrap();
        let vs = t.value_set(&one).unwrap();
        assert_eq!(t.value("age", &vs).unwrap(), ValueType::Integer.value_of(36).unwrap());
        let vs = t.value_set(&two).unwrap();
        assert!(t.value("name", &vs).unwrap().is_null());
        assert!(t.timestamps().created().is_null());
        assert!(!t.timestamps().last_update().is_null());
    }

    #[test]
    fn test_metadata_strategy_and_entity_type() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("people.variables.csv"),
            "name,valueType,entityType,repeatable,occurrenceGroup\nvisits,date,Sample,true,Visit\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("people.csv"),
            "id,visits,extra\nS1,\"2024-01-02, 2024-02-03\",x\n",
        )
        .unwrap();
        let t = table(dir.path(), CsvDatasourceConfig::default());
        t.initialise().unwrap();

        assert_eq!(t.entity_type(), "Sample");
        assert_eq!(t.strategy(), CsvVariableStrategy::Metadata);
        assert!(!t.has_variable("extra").unwrap());
        let entity = VariableEntity::new("Sample", "S1").unwrap();
        let vs = t.value_set(&entity).unwrap();
        assert_eq!(t.value("visits", &vs).unwrap().size(), 2);
    }

    #[test]
    fn test_composite_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("people.csv"), "site,num,name\nA,1,Ada\nB,1,Bob\n").unwrap();
        let t = table(
            dir.path(),
            CsvDatasourceConfig {
                id_columns: vec!["site".to_string(), "num".to_string()],
                ..CsvDatasourceConfig::default()
            },
        );
        t.initialise().unwrap();
        let ids: Vec<String> = t
            .variable_entities()
            .unwrap()
            .iter()
            .map(|e| e.identifier().to_string())
            .collect();
        assert_eq!(ids, vec!["A-1", "B-1"]);
    }

    fn parse_failure(data: &str, config: CsvDatasourceConfig) -> DatasourceParsingError {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("people.csv"), data).unwrap();
        match table(dir.path(), config).initialise() {
            Err(MagmaError::DatasourceParsing(e)) => e,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identifier_errors() {
        let e = parse_failure("id,name\n1,Ada\n1,Bob\n", CsvDatasourceConfig::default());
        assert_eq!(e.code, "CsvDuplicateIdentifier");
        assert_eq!(e.parameters, vec!["people.csv", "3"]);

        let e = parse_failure("id,name\n ,Ada\n", CsvDatasourceConfig::default());
        assert_eq!(e.code, "CsvEmptyIdentifier");
        assert_eq!(e.parameters, vec!["people.csv", "2"]);

        let e = parse_failure("name\nAda\n", CsvDatasourceConfig::default());
        assert_eq!(e.code, "CsvMissingColumn");
    }

    #[test]
    fn test_invalid_value() {
        let mut column_types = BTreeMap::new();
        column_types.insert("age".to_string(), ValueType::Integer);
        let e = parse_failure(
            "id,age\n1,36\n2,old\n",
            CsvDatasourceConfig {
                column_types,
                ..CsvDatasourceConfig::default()
            },
        );
        assert_eq!(e.code, "CsvInvalidValue");
        assert_eq!(e.parameters, vec!["people.csv", "3", "age"]);
    }

    #[test]
    fn test_missing_data_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t = table(dir.path(), CsvDatasourceConfig::default());
        t.initialise().unwrap();
        assert!(t.variables().unwrap().is_empty());
        assert!(t.variable_entities().unwrap().is_empty());
        assert!(t.timestamps().last_update().is_null());
    }
}
