//! C2 — the type registry.
//!
//! A *type* is a named `(raw) -> (value | error)` converter. Names are
//! unique; registering a name that already exists replaces the previous
//! converter, the way `crudkit_rs`'s `CrudLifetime` impls are swapped out
//! wholesale per resource rather than merged.

pub mod builtin;

use serde_json::Value as RawValue;
use std::collections::HashMap;
use std::sync::Arc;

/// A named value-conversion capability: `{name, convert}` (spec §4.2).
pub trait ValueType: Send + Sync {
    /// The registered name this type is looked up by.
    fn name(&self) -> &str;

    /// Attempt to coerce `raw` into this type's canonical representation.
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError>;
}

/// Why a value failed to coerce into a given type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub type_name: String,
    pub message: String,
}

impl TypeError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' conversion failed: {}", self.type_name, self.message)
    }
}

impl std::error::Error for TypeError {}

/// Keyed dispatcher of registered value types.
#[derive(Clone)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<dyn ValueType>>,
}

impl TypeRegistry {
    /// An empty registry with no built-ins. Most callers want
    /// [`TypeRegistry::with_builtins`] instead.
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// A registry pre-populated with every built-in type from spec §4.2,
    /// using `hasher` for the `password` type.
    pub fn with_builtins(hasher: Arc<dyn builtin::PasswordHasher>) -> Self {
        let mut registry = Self::empty();
        for t in builtin::builtin_types(hasher) {
            registry.register_arc(t);
        }
        registry
    }

    /// Register a type, replacing any previous registration under the same name.
    pub fn register(&mut self, value_type: impl ValueType + 'static) {
        self.register_arc(Arc::new(value_type));
    }

    fn register_arc(&mut self, value_type: Arc<dyn ValueType>) {
        self.types.insert(value_type.name().to_string(), value_type);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ValueType>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }
}
