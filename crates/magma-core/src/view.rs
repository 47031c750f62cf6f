//! Views: a base table exposed under another name, with extra variables
//! computed from each value set.
//!
//! Evaluators receive their context as an explicit argument:
//!
//! ```
//! use std::sync::Arc;
//! use magma_core::view::EvaluationContext;
//! use magma_core::{Value, ValueType, Variable};
//!
//! let bmi = Variable::builder("bmi", ValueType::Decimal, "Participant").build().unwrap();
//! let evaluate = |ctx: &EvaluationContext<'_>| -> magma_core::Result<Value> {
//!     let weight = ctx.value("weight")?;
//!     let height = ctx.value("height")?;
//!     match (weight.as_decimal(), height.as_decimal()) {
//!         (Some(w), Some(h)) if !h.is_zero() => ValueType::Decimal.value_of(w / (h * h)),
//!         _ => Ok(ValueType::Decimal.null_value()),
//!     }
//! };
//! # let _ = (bmi, Arc::new(evaluate));
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entity::VariableEntity;
use crate::error::{MagmaError, Result};
use crate::source::{
    Timestamps, ValueSet, ValueSource, VariableEntityProvider, VariableValueSource,
    VariableValueSourceFactory,
};
use crate::table::{ValueTable, ValueTableCore};
use crate::types::ValueType;
use crate::values::Value;
use crate::variable::Variable;

/// Resolution context handed to an [`Evaluator`].
pub struct EvaluationContext<'a> {
    pub value_set: &'a ValueSet,
    pub table: &'a dyn ValueTable,
}

impl EvaluationContext<'_> {
    /// Value of another variable of the same row.
    pub fn value(&self, variable: &str) -> Result<Value> {
        self.table.value(variable, self.value_set)
    }

    pub fn entity(&self) -> &VariableEntity {
        self.value_set.entity()
    }
}

/// Computes a derived value.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Value>;
}

impl<F> Evaluator for F
where
    F: Fn(&EvaluationContext<'_>) -> Result<Value> + Send + Sync,
{
    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Value> {
        self(context)
    }
}

/// A base table under a new name plus derived variables.
pub struct View {
    core: ValueTableCore,
    base: Arc<dyn ValueTable>,
    derived: Vec<(Variable, Arc<dyn Evaluator>)>,
}

impl View {
    /// View of `base` in the same datasource, named `name`.
    pub fn new(name: impl Into<String>, base: Arc<dyn ValueTable>) -> Self {
        let provider = Arc::new(BaseEntities(Arc::clone(&base)));
        Self {
            core: ValueTableCore::new(base.datasource_name().to_string(), name, provider),
            base,
            derived: Vec::new(),
        }
    }

    /// Add a derived variable; call before [`ValueTable::initialise`].
    pub fn with_derived_variable(
        mut self,
        variable: Variable,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        if !variable.is_for_entity_type(self.base.entity_type()) {
            return Err(MagmaError::InvalidArgument(format!(
                "Derived variable '{}' must be of entity type {}",
                variable.name(),
                self.base.entity_type()
            )));
        }
        self.derived.push((variable, evaluator));
        Ok(self)
    }

    pub fn base(&self) -> &Arc<dyn ValueTable> {
        &self.base
    }
}

impl ValueTable for View {
    fn core(&self) -> &ValueTableCore {
        &self.core
    }

    fn initialise(&self) -> Result<()> {
        self.core.initialise_with(self)
    }

    fn timestamps(&self) -> Arc<dyn Timestamps> {
        self.base.timestamps()
    }

    fn value_set_timestamps(&self, value_set: &ValueSet) -> Result<Arc<dyn Timestamps>> {
        self.base.value_set_timestamps(&rebase(self.base.as_ref(), value_set))
    }
}

impl VariableValueSourceFactory for View {
    fn create_sources(&self) -> Result<Vec<Arc<dyn VariableValueSource>>> {
        let mut sources: Vec<Arc<dyn VariableValueSource>> = Vec::new();
        for variable in self.base.variables()? {
            sources.push(Arc::new(PassThrough {
                source: self.base.variable_value_source(variable.name())?,
                base: Arc::clone(&self.base),
            }));
        }
        for (variable, evaluator) in &self.derived {
            sources.push(Arc::new(Derived {
                variable: variable.clone(),
                evaluator: Arc::clone(evaluator),
                base: Arc::clone(&self.base),
            }));
        }
        Ok(sources)
    }
}

/// The same row, addressed in the base table.
fn rebase(base: &dyn ValueTable, value_set: &ValueSet) -> ValueSet {
    ValueSet::new(base.datasource_name(), base.name(), value_set.entity().clone())
}

struct BaseEntities(Arc<dyn ValueTable>);

impl VariableEntityProvider for BaseEntities {
    fn entity_type(&self) -> &str {
        self.0.entity_type()
    }

    fn variable_entities(&self) -> Result<BTreeSet<VariableEntity>> {
        Ok(self.0.variable_entities()?.as_ref().clone())
    }
}

struct PassThrough {
    source: Arc<dyn VariableValueSource>,
    base: Arc<dyn ValueTable>,
}

impl ValueSource for PassThrough {
    fn value_type(&self) -> ValueType {
        self.source.value_type()
    }

    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        self.source.value(&rebase(self.base.as_ref(), value_set))
    }
}

impl VariableValueSource for PassThrough {
    fn variable(&self) -> &Variable {
        self.source.variable()
    }
}

struct Derived {
    variable: Variable,
    evaluator: Arc<dyn Evaluator>,
    base: Arc<dyn ValueTable>,
}

impl ValueSource for Derived {
    fn value_type(&self) -> ValueType {
        self.variable.value_type()
    }

    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let value_set = self.base.value_set(value_set.entity())?;
        let context = EvaluationContext {
            value_set: &value_set,
            table: self.base.as_ref(),
        };
        let value = self.evaluator.evaluate(&context)?;
        let value = if value.value_type() == self.variable.value_type() {
            value
        } else {
            self.variable.value_type().convert(&value)?
        };
        self.variable.normalize_value(value)
    }
}

impl VariableValueSource for Derived {
    fn variable(&self) -> &Variable {
        &self.variable
    }
}
