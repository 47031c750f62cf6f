//! Writer sessions on memory tables.
//!
//! Variable writers flush at close. A value set becomes visible when its
//! writer closes; a failed row is rolled back and counted, and the session
//! close reports `PartialWrite` if any row was lost.

use std::sync::Arc;

use magma_core::writer::{
    check_entity_type, check_stored_variable, check_variable_entity_type, WriteGuard,
};
use magma_core::{
    MagmaError, Result, Value, ValueSetBuffer, ValueSetWriter, ValueTable, ValueTableWriter,
    Variable, VariableEntity, VariableWriter,
};
use tracing::{debug, info, warn};

use crate::datasource::Registry;
use crate::table::{read, write, MemoryValueTable};

pub struct MemoryTableWriter {
    table: Arc<MemoryValueTable>,
    registry: Arc<Registry>,
    failed: usize,
    committed: usize,
    _guard: WriteGuard,
}

impl MemoryTableWriter {
    pub(crate) fn new(table: Arc<MemoryValueTable>, registry: Arc<Registry>, guard: WriteGuard) -> Self {
        Self {
            table,
            registry,
            failed: 0,
            committed: 0,
            _guard: guard,
        }
    }

    fn table_name(&self) -> String {
        self.table.name()
    }
}

impl ValueTableWriter for MemoryTableWriter {
    fn write_variables(&mut self) -> Result<Box<dyn VariableWriter + '_>> {
        Ok(Box::new(MemoryVariableWriter {
            session: self,
            staged: Vec::new(),
        }))
    }

    fn write_value_set(&mut self, entity: VariableEntity) -> Result<Box<dyn ValueSetWriter + '_>> {
        let table = self.table_name();
        check_entity_type(&table, self.table.entity_type(), &entity)?;
        let buffer = ValueSetBuffer::new(table, self.table.entity_type(), entity);
        Ok(Box::new(MemoryValueSetWriter {
            session: self,
            buffer,
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let table = self.table_name();
        info!(
            "Closed writer on memory table '{table}': {} value set(s) written, {} rolled back",
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

impl Drop for MemoryTableWriter {
    fn drop(&mut self) {
        // a new table that never received a commit stays unregistered
        self.registry.discard_pending(&self.table.name());
    }
}

enum Change {
    Put(Variable),
    Remove(String),
}

struct MemoryVariableWriter<'a> {
    session: &'a mut MemoryTableWriter,
    staged: Vec<Change>,
}

impl VariableWriter for MemoryVariableWriter<'_> {
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
        let table = Arc::clone(&self.session.table);
        {
            let mut store = write(table.store())?;
            for change in &staged {
                match change {
                    Change::Put(variable) => store.put_variable(variable.clone()),
                    Change::Remove(name) => {
                        store.remove_variable(name);
                    }
                }
            }
            store.touch();
        }
        for change in staged {
            match change {
                Change::Put(variable) => {
                    table.core().add_variable_value_source(table.source_for(variable))?
                }
                Change::Remove(name) => {
                    table.core().remove_variable_value_source(&name)?;
                }
            }
        }
        debug!("Flushed variables of memory table '{}'", table.name());
        self.session.registry.publish(&table.name())?;
        Ok(())
    }
}

impl Drop for MemoryVariableWriter<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            warn!(
                "Variable writer of memory table '{}' dropped without close; {} change(s) discarded",
                self.session.table.name(),
                self.staged.len()
            );
        }
    }
}

struct MemoryValueSetWriter<'a> {
    session: &'a mut MemoryTableWriter,
    buffer: ValueSetBuffer,
}

impl ValueSetWriter for MemoryValueSetWriter<'_> {
    fn write_value(&mut self, variable: &Variable, value: Value) -> Result<()> {
        let stored = read(self.session.table.store())?
            .variables
            .get(variable.name())
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
        let MemoryValueSetWriter { session, buffer } = *self;
        let (entity, cells) = match buffer.finish() {
            Ok(row) => row,
            Err(e) => {
                session.failed += 1;
                return Err(e);
            }
        };
        let table = Arc::clone(&session.table);
        let is_new = write(table.store())?.apply_row(entity, cells);
        if is_new {
            table.core().invalidate_entities()?;
        }
        session.committed += 1;
        session.registry.publish(&table.name())?;
        Ok(())
    }
}
