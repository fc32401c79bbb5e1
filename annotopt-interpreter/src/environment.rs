//! Environment management for lexical scoping

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::{InterpreterError, InterpreterResult};
use crate::value::Value;

/// A binding in the environment
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

/// Environment for variable bindings with lexical scoping
#[derive(Debug, Clone, Default)]
pub struct Environment {
    inner: Arc<RwLock<EnvironmentInner>>,
}

#[derive(Debug, Default)]
struct EnvironmentInner {
    bindings: FxHashMap<String, Binding>,
    parent: Option<Environment>,
}

impl Environment {
    /// Create a new empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new environment with a parent
    pub fn with_parent(parent: Environment) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EnvironmentInner {
                bindings: FxHashMap::default(),
                parent: Some(parent),
            })),
        }
    }

    /// Extend this environment with a new child scope
    pub fn extend(&self) -> Self {
        Self::with_parent(self.clone())
    }

    /// Define a binding in this scope, shadowing any outer one
    pub fn define(&self, name: impl Into<String>, value: Value, mutable: bool) {
        self.inner
            .write()
            .bindings
            .insert(name.into(), Binding { value, mutable });
    }

    /// Update the nearest binding named `name`
    pub fn assign(&self, name: &str, value: Value) -> InterpreterResult<()> {
        let mut inner = self.inner.write();
        if let Some(binding) = inner.bindings.get_mut(name) {
            if !binding.mutable {
                return Err(InterpreterError::ImmutableBinding(name.to_string()));
            }
            binding.value = value;
            return Ok(());
        }
        match &inner.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(InterpreterError::NameError(name.to_string())),
        }
    }

    /// Look up a variable in this environment or its parents
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let inner = self.inner.read();
        match inner.bindings.get(name) {
            Some(binding) => Some(binding.value.clone()),
            None => inner.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Number of bindings in this scope
    pub fn size(&self) -> usize {
        self.inner.read().bindings.len()
    }

    /// Depth of the scope chain
    pub fn depth(&self) -> usize {
        match &self.inner.read().parent {
            Some(parent) => 1 + parent.depth(),
            None => 0,
        }
    }
}
