//! Writer protocol.
//!
//! ```text
//! ValueTableWriter (one session per table)
//! ├── write_variables() -> VariableWriter   upsert/remove metadata, flush on close
//! └── write_value_set(e) -> ValueSetWriter  upsert/delete cells of one entity
//! ```
//!
//! Sub-writers borrow the session, so at most one is open at a time. Every
//! writer must be closed; dropping one unclosed discards its changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::entity::VariableEntity;
use crate::error::{MagmaError, Result};
use crate::values::Value;
use crate::variable::Variable;

/// A write session on one table.
pub trait ValueTableWriter {
    fn write_variables(&mut self) -> Result<Box<dyn VariableWriter + '_>>;

    fn write_value_set(&mut self, entity: VariableEntity) -> Result<Box<dyn ValueSetWriter + '_>>;

    /// Finalize the session.
    ///
    /// Fails with `PartialWrite` when some value sets were rolled back
    /// during the session.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Upserts variable metadata.
pub trait VariableWriter {
    fn write_variable(&mut self, variable: &Variable) -> Result<()>;

    fn remove_variable(&mut self, name: &str) -> Result<()>;

    /// Make the written metadata visible to readers.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Writes the cells of one entity.
pub trait ValueSetWriter {
    /// Upsert one cell; a null value deletes it.
    fn write_value(&mut self, variable: &Variable, value: Value) -> Result<()>;

    /// Commit the row, or fail with `WriteRolledBack` if a write failed.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Fail unless `entity` belongs to a table of `entity_type`.
pub fn check_entity_type(table: &str, entity_type: &str, entity: &VariableEntity) -> Result<()> {
    if entity.is_of_type(entity_type) {
        Ok(())
    } else {
        Err(MagmaError::InvalidArgument(format!(
            "Entity {entity} cannot be written to table '{table}' of type {entity_type}"
        )))
    }
}

/// Fail unless `variable` belongs to a table of `entity_type`.
pub fn check_variable_entity_type(table: &str, entity_type: &str, variable: &Variable) -> Result<()> {
    if variable.is_for_entity_type(entity_type) {
        Ok(())
    } else {
        Err(MagmaError::InvalidArgument(format!(
            "Variable '{}' of entity type {} cannot be written to table '{table}' of type {entity_type}",
            variable.name(),
            variable.entity_type()
        )))
    }
}

/// Fail unless `written` has the value type and repeatability of the
/// variable the table stores under the same name.
pub fn check_stored_variable(stored: &Variable, written: &Variable, value: &Value) -> Result<()> {
    if stored.value_type() != written.value_type() {
        return Err(MagmaError::conversion(
            written.value_type(),
            value,
            format!("variable '{}' is stored with another type", written.name()),
        ));
    }
    if stored.is_repeatable() != written.is_repeatable() {
        return Err(MagmaError::conversion(
            written.value_type(),
            value,
            format!(
                "variable '{}' is stored as {}repeatable",
                written.name(),
                if stored.is_repeatable() { "" } else { "not " }
            ),
        ));
    }
    Ok(())
}

// ============================================================================
// Session lock
// ============================================================================

/// Single-writer flag of a table.
#[derive(Debug, Clone, Default)]
pub struct WriteLock(Arc<AtomicBool>);

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for a session on `table`.
    pub fn acquire(&self, table: &str) -> Result<WriteGuard> {
        if self
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MagmaError::TableLocked {
                table: table.to_string(),
            });
        }
        debug!("Writer session opened on table '{table}'");
        Ok(WriteGuard {
            flag: Arc::clone(&self.0),
            table: table.to_string(),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the table's write lock on drop.
#[derive(Debug)]
pub struct WriteGuard {
    flag: Arc<AtomicBool>,
    table: String,
}

impl WriteGuard {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        debug!("Writer session released table '{}'", self.table);
    }
}

// ============================================================================
// Row staging
// ============================================================================

/// In-flight cells of one entity.
///
/// The first failed write poisons the row: later writes are refused and
/// [`ValueSetBuffer::finish`] reports `WriteRolledBack`.
#[derive(Debug)]
pub struct ValueSetBuffer {
    table: String,
    entity_type: String,
    entity: VariableEntity,
    cells: BTreeMap<String, Value>,
    failure: Option<String>,
    finished: bool,
}

impl ValueSetBuffer {
    pub fn new(table: impl Into<String>, entity_type: impl Into<String>, entity: VariableEntity) -> Self {
        Self {
            table: table.into(),
            entity_type: entity_type.into(),
            entity,
            cells: BTreeMap::new(),
            failure: None,
            finished: false,
        }
    }

    pub fn entity(&self) -> &VariableEntity {
        &self.entity
    }

    /// Stage one cell, last write wins. A null value stages a deletion.
    pub fn write(&mut self, variable: &Variable, value: Value) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(MagmaError::WriteRolledBack {
                table: self.table.clone(),
                entity: self.entity.clone(),
                reason: reason.clone(),
            });
        }
        let staged = check_variable_entity_type(&self.table, &self.entity_type, variable)
            .and_then(|_| variable.normalize_value(value));
        match staged {
            Ok(value) => {
                self.cells.insert(variable.name().to_string(), value);
                Ok(())
            }
            Err(e) => {
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Mark the row as failed for a backend-specific reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure.get_or_insert_with(|| reason.into());
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Hand over the staged cells, or report the rollback.
    pub fn finish(mut self) -> Result<(VariableEntity, BTreeMap<String, Value>)> {
        self.finished = true;
        if let Some(reason) = self.failure.take() {
            warn!(
                "Rolled back value set of {} in table '{}': {reason}",
                self.entity, self.table
            );
            return Err(MagmaError::WriteRolledBack {
                table: std::mem::take(&mut self.table),
                entity: self.entity.clone(),
                reason,
            });
        }
        Ok((self.entity.clone(), std::mem::take(&mut self.cells)))
    }
}

impl Drop for ValueSetBuffer {
    fn drop(&mut self) {
        if !self.finished && !self.cells.is_empty() {
            warn!(
                "Value set writer of {} in table '{}' dropped without close; {} cell(s) discarded",
                self.entity,
                self.table,
                self.cells.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    fn age() -> Variable {
        Variable::builder("age", ValueType::Integer, "Participant").build().unwrap()
    }

    fn participant() -> VariableEntity {
        VariableEntity::new("Participant", "1").unwrap()
    }

    #[test]
    fn test_single_writer_lock() {
        let lock = WriteLock::new();
        let guard = lock.acquire("people").unwrap();
        assert!(lock.is_locked());
        assert!(matches!(
            lock.acquire("people"),
            Err(MagmaError::TableLocked { .. })
        ));
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.acquire("people").is_ok());
    }

    #[test]
    fn test_stored_variable_shape_must_match() {
        let repeatable = Variable::builder("age", ValueType::Integer, "Participant")
            .repeatable(true)
            .occurrence_group("Visit")
            .build()
            .unwrap();
        let decimal = Variable::builder("age", ValueType::Decimal, "Participant")
            .build()
            .unwrap();
        let value = Value::integer(1);
        assert!(check_stored_variable(&age(), &age(), &value).is_ok());
        assert!(matches!(
            check_stored_variable(&age(), &repeatable, &value),
            Err(MagmaError::ValueConversion { .. })
        ));
        assert!(matches!(
            check_stored_variable(&age(), &decimal, &value),
            Err(MagmaError::ValueConversion { .. })
        ));
    }

    #[test]
    fn test_buffer_last_write_wins() {
        let mut buffer = ValueSetBuffer::new("people", "Participant", participant());
        buffer.write(&age(), Value::integer(41)).unwrap();
        buffer.write(&age(), Value::integer(42)).unwrap();
        let (_, cells) = buffer.finish().unwrap();
        assert_eq!(cells.get("age"), Some(&Value::integer(42)));
    }

    #[test]
    fn test_buffer_stages_deletion() {
        let mut buffer = ValueSetBuffer::new("people", "Participant", participant());
        buffer.write(&age(), ValueType::Integer.null_value()).unwrap();
        let (_, cells) = buffer.finish().unwrap();
        assert!(cells["age"].is_null());
    }

    #[test]
    fn test_failed_write_rolls_back_row() {
        let mut buffer = ValueSetBuffer::new("people", "Participant", participant());
        buffer.write(&age(), Value::integer(42)).unwrap();
        assert!(buffer.write(&age(), Value::text("old")).is_err());
        assert!(buffer.is_failed());
        assert!(matches!(
            buffer.write(&age(), Value::integer(1)),
            Err(MagmaError::WriteRolledBack { .. })
        ));
        assert!(matches!(
            buffer.finish(),
            Err(MagmaError::WriteRolledBack { .. })
        ));
    }

    #[test]
    fn test_entity_type_checks() {
        let sample = VariableEntity::new("Sample", "1").unwrap();
        assert!(check_entity_type("people", "Participant", &sample).is_err());
        assert!(check_entity_type("people", "Participant", &participant()).is_ok());

        let barcode = Variable::builder("barcode", ValueType::Text, "Sample").build().unwrap();
        let mut buffer = ValueSetBuffer::new("people", "Participant", participant());
        assert!(buffer.write(&barcode, Value::text("x")).is_err());
    }
}
