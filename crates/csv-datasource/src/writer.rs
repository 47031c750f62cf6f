//! Writer sessions on CSV tables.
//!
//! Changes are staged on a working copy of the table and committed when the
//! session closes: the data file and the metadata sheets are rewritten
//! through temporary files, then the table is reloaded from disk.

use std::collections::BTreeMap;
use std::sync::Arc;

use magma_core::writer::{
    check_entity_type, check_stored_variable, check_variable_entity_type, WriteGuard,
};
use magma_core::{
    MagmaError, Result, Value, ValueSetBuffer, ValueSetWriter, ValueTable, ValueTableWriter,
    Variable, VariableEntity, VariableWriter,
};
use magma_csv_types::CsvValue;
use tracing::{debug, info, warn};

use crate::datasource::Registry;
use crate::files::{remove_if_exists, write_atomically};
use crate::metadata;
use crate::table::{CsvValueTable, CsvVariableStrategy, Snapshot};

pub struct CsvTableWriter {
    table: Arc<CsvValueTable>,
    registry: Arc<Registry>,
    working: Snapshot,
    variables_written: bool,
    dirty: bool,
    failed: usize,
    committed: usize,
    _guard: WriteGuard,
}

impl CsvTableWriter {
    pub(crate) fn new(
        table: Arc<CsvValueTable>,
        registry: Arc<Registry>,
        guard: WriteGuard,
    ) -> Result<Self> {
        let working = table.snapshot()?;
        Ok(Self {
            table,
            registry,
            working,
            variables_written: false,
            dirty: false,
            failed: 0,
            committed: 0,
            _guard: guard,
        })
    }

    fn table_name(&self) -> String {
        self.table.name()
    }

    fn check_identifier(&self, entity: &VariableEntity) -> Result<()> {
        let expected = self.table.config().id_columns.len();
        let found = entity.components().len();
        if expected > 1 && found != expected {
            return Err(MagmaError::InvalidArgument(format!(
                "Identifier '{}' has {found} component(s), table '{}' is keyed by {expected} columns",
                entity.identifier(),
                self.table_name()
            )));
        }
        Ok(())
    }

    fn put_variable(&mut self, variable: Variable) {
        let working = &mut self.working;
        match working
            .variables
            .iter_mut()
            .find(|v| v.name() == variable.name())
        {
            Some(previous) => {
                if previous.value_type() != variable.value_type()
                    || previous.is_repeatable() != variable.is_repeatable()
                {
                    warn!(
                        "Variable '{}' changed from {} to {}; dropping its values",
                        variable.name(),
                        previous.value_type(),
                        variable.value_type()
                    );
                    for cells in working.rows.values_mut() {
                        cells.remove(variable.name());
                    }
                }
                *previous = variable;
            }
            None => working.variables.push(variable),
        }
    }

    fn remove_variable(&mut self, name: &str) {
        self.working.variables.retain(|v| v.name() != name);
        for cells in self.working.rows.values_mut() {
            cells.remove(name);
        }
    }

    /// Null and the empty text value both render as an empty cell, and an
    /// empty cell loads as null. Empty text therefore reads back as null.
    fn render_data(&self, variables: &[Variable]) -> Result<Vec<u8>> {
        let config = self.table.config();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(config.delimiter_byte()?)
            .from_writer(Vec::new());
        let header = config
            .id_columns
            .iter()
            .map(String::as_str)
            .chain(variables.iter().map(Variable::name));
        writer.write_record(header).map_err(csv_error)?;

        for (entity, cells) in &self.working.rows {
            let mut record: Vec<String> = if config.id_columns.len() > 1 {
                entity.components().into_iter().map(str::to_string).collect()
            } else {
                vec![entity.identifier().to_string()]
            };
            record.extend(variables.iter().map(|v| {
                cells
                    .get(v.name())
                    .map(|value| CsvValue::from(value).into_inner())
                    .unwrap_or_default()
            }));
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer
            .into_inner()
            .map_err(|e| MagmaError::runtime(format!("Cannot flush CSV buffer: {e}")))
    }

    fn commit(&self) -> Result<()> {
        let files = self.table.files()?;
        let delimiter = self.table.config().delimiter_byte()?;
        let mut variables = self.working.variables.clone();
        variables.sort_by(|a, b| a.index().cmp(&b.index()).then_with(|| a.name().cmp(b.name())));

        write_atomically(&files.data, &self.render_data(&variables)?)?;
        if self.variables_written || self.table.strategy() == CsvVariableStrategy::Metadata {
            write_atomically(&files.variables, &metadata::write_variables(&variables, delimiter)?)?;
            match metadata::write_categories(&variables, delimiter)? {
                Some(sheet) => write_atomically(&files.categories, &sheet)?,
                None => remove_if_exists(&files.categories)?,
            }
        }
        self.table.reload()?;
        self.registry.publish(&self.table_name())
    }
}

fn csv_error(e: csv::Error) -> MagmaError {
    MagmaError::runtime_with("Cannot write CSV record", e)
}

impl ValueTableWriter for CsvTableWriter {
    fn write_variables(&mut self) -> Result<Box<dyn VariableWriter + '_>> {
        Ok(Box::new(CsvVariableWriter {
            session: self,
            staged: Vec::new(),
        }))
    }

    fn write_value_set(&mut self, entity: VariableEntity) -> Result<Box<dyn ValueSetWriter + '_>> {
        let table = self.table_name();
        check_entity_type(&table, self.table.entity_type(), &entity)?;
        self.check_identifier(&entity)?;
        let buffer = ValueSetBuffer::new(table, self.table.entity_type(), entity);
        Ok(Box::new(CsvValueSetWriter {
            session: self,
            buffer,
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let table = self.table_name();
        if self.dirty {
            self.commit()?;
        }
        info!(
            "Closed writer on CSV table '{table}': {} value set(s) written, {} rolled back",
            self.committed, self.failed
        );
        if self.failed > 0 {
            return Err(MagmaError::PartialWrite {
                table,
                failed: self.failed,
            });
        }
        Ok(())
    }
}

impl Drop for CsvTableWriter {
    fn drop(&mut self) {
        self.registry.discard_pending(&self.table.name());
    }
}

enum Change {
    Put(Variable),
    Remove(String),
}

struct CsvVariableWriter<'a> {
    session: &'a mut CsvTableWriter,
    staged: Vec<Change>,
}

impl VariableWriter for CsvVariableWriter<'_> {
    fn write_variable(&mut self, variable: &Variable) -> Result<()> {
        check_variable_entity_type(
            &self.session.table_name(),
            self.session.table.entity_type(),
            variable,
        )?;
        self.staged.push(Change::Put(variable.clone()));
        Ok(())
    }

    fn remove_variable(&mut self, name: &str) -> Result<()> {
        self.staged.push(Change::Remove(name.to_string()));
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        if staged.is_empty() {
            return Ok(());
        }
        for change in staged {
            match change {
                Change::Put(variable) => self.session.put_variable(variable),
                Change::Remove(name) => self.session.remove_variable(&name),
            }
        }
        self.session.variables_written = true;
        self.session.dirty = true;
        debug!("Staged variables of CSV table '{}'", self.session.table_name());
        Ok(())
    }
}

impl Drop for CsvVariableWriter<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            warn!(
                "Variable writer of CSV table '{}' dropped without close; {} change(s) discarded",
                self.session.table.name(),
                self.staged.len()
            );
        }
    }
}

struct CsvValueSetWriter<'a> {
    session: &'a mut CsvTableWriter,
    buffer: ValueSetBuffer,
}

impl ValueSetWriter for CsvValueSetWriter<'_> {
    fn write_value(&mut self, variable: &Variable, value: Value) -> Result<()> {
        let stored = self
            .session
            .working
            .variables
            .iter()
            .find(|v| v.name() == variable.name())
            .cloned();
        let staged = match stored {
            Some(stored) => check_stored_variable(&stored, variable, &value).map(|_| stored),
            None => Err(MagmaError::NoSuchVariable {
                table: self.session.table_name(),
                variable: variable.name().to_string(),
            }),
        };
        match staged {
            Ok(stored) => self.buffer.write(&stored, value),
            Err(err) => {
                self.buffer.fail(err.to_string());
                Err(err)
            }
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        let CsvValueSetWriter { session, buffer } = *self;
        let (entity, cells) = match buffer.finish() {
            Ok(row) => row,
            Err(e) => {
                session.failed += 1;
                return Err(e);
            }
        };
        let row: &mut BTreeMap<String, Value> = session.working.rows.entry(entity).or_default();
        for (name, value) in cells {
            if value.is_null() {
                row.remove(&name);
            } else {
                row.insert(name, value);
            }
        }
        session.committed += 1;
        session.dirty = true;
        Ok(())
    }
}
