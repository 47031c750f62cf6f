//! Process-wide engine context.
//!
//! The engine owns the value type registry: canonical names, `xsd:` schema
//! names and aliases registered by backends. It is started lazily by the
//! first lookup, and [`MagmaEngine::shutdown`] drops every registration so
//! that the next lookup rebuilds a fresh registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::{MagmaError, Result};
use crate::types::ValueType;

static ENGINE: RwLock<Option<Arc<MagmaEngine>>> = RwLock::new(None);

/// Name index of the value types.
#[derive(Debug)]
pub struct TypeRegistry {
    names: RwLock<HashMap<String, ValueType>>,
    xsd_names: HashMap<&'static str, ValueType>,
}

impl TypeRegistry {
    fn new() -> Self {
        let names = ValueType::ALL
            .iter()
            .map(|t| (t.name().to_string(), *t))
            .collect();
        let xsd_names = ValueType::ALL
            .iter()
            .filter_map(|t| t.xsd_name().map(|x| (x, *t)))
            .collect();
        Self {
            names: RwLock::new(names),
            xsd_names,
        }
    }

    /// Resolve a canonical name or alias, case-insensitively.
    pub fn lookup(&self, name: &str) -> Result<ValueType> {
        let names = self.names.read().map_err(|_| MagmaError::poisoned("type names"))?;
        names
            .get(name)
            .or_else(|| names.get(&name.to_ascii_lowercase()))
            .copied()
            .ok_or_else(|| MagmaError::InvalidArgument(format!("Unknown value type '{name}'")))
    }

    /// Resolve an `xsd:` name; the prefix is optional.
    pub fn lookup_xsd(&self, xsd_name: &str) -> Result<ValueType> {
        let qualified = if xsd_name.starts_with("xsd:") {
            xsd_name.to_string()
        } else {
            format!("xsd:{xsd_name}")
        };
        self.xsd_names
            .get(qualified.as_str())
            .copied()
            .ok_or_else(|| MagmaError::InvalidArgument(format!("Unknown schema type '{xsd_name}'")))
    }

    /// Register an extra name for a type, e.g. a backend's native type name.
    ///
    /// Re-registering the same alias for the same type is a no-op; binding
    /// an existing name to another type fails.
    pub fn register_alias(&self, alias: &str, value_type: ValueType) -> Result<()> {
        let key = alias.to_ascii_lowercase();
        let mut names = self.names.write().map_err(|_| MagmaError::poisoned("type names"))?;
        match names.get(&key) {
            Some(existing) if *existing != value_type => Err(MagmaError::InvalidArgument(format!(
                "Type name '{alias}' is already bound to {existing}"
            ))),
            Some(_) => Ok(()),
            None => {
                debug!("Registered type alias '{key}' for {value_type}");
                names.insert(key, value_type);
                Ok(())
            }
        }
    }

    pub fn value_types(&self) -> &'static [ValueType] {
        &ValueType::ALL
    }
}

/// Runtime context holding process-wide registrations.
#[derive(Debug)]
pub struct MagmaEngine {
    registry: TypeRegistry,
}

impl MagmaEngine {
    /// The running engine, started on first use.
    pub fn get() -> Arc<MagmaEngine> {
        if let Some(engine) = ENGINE.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Arc::clone(engine);
        }
        let mut slot = ENGINE.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slot.get_or_insert_with(|| {
            info!("Starting magma engine");
            Arc::new(MagmaEngine {
                registry: TypeRegistry::new(),
            })
        }))
    }

    pub fn is_running() -> bool {
        ENGINE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop all process-wide registrations.
    ///
    /// Handles obtained before shutdown keep working but are detached; the
    /// next [`MagmaEngine::get`] builds a new registry. Returns whether an
    /// engine was running.
    pub fn shutdown() -> bool {
        let previous = ENGINE.write().unwrap_or_else(PoisonError::into_inner).take();
        if previous.is_some() {
            info!("Magma engine shut down");
        }
        previous.is_some()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}
