//! Name-to-object lookup for endpoints, validators and other shared beans.

use crate::error::TestError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Typed registry of named references.
#[derive(Clone, Default)]
pub struct ReferenceResolver {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ReferenceResolver").field("entries", &names).finish()
    }
}

impl ReferenceResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name`, replacing any previous binding.
    pub fn bind<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.entries.insert(name.into(), Arc::new(value));
    }

    /// Resolve a binding by name and type.
    ///
    /// # Errors
    /// Returns `TestError::Reference` when nothing is bound under `name` or
    /// the binding has another type.
    pub fn resolve<T: Any + Send + Sync + Clone>(&self, name: &str) -> Result<T, TestError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| TestError::Reference(format!("no reference bound for name '{name}'")))?;
        entry.downcast_ref::<T>().cloned().ok_or_else(|| {
            TestError::Reference(format!(
                "reference '{name}' is not of type {}",
                std::any::type_name::<T>()
            ))
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
