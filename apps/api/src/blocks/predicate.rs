//! Named predicates backing `custom` block visibility.
//!
//! A custom block stores a predicate name in its `pages` field. Predicates
//! see only the [`RequestContext`] and must not touch engine state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::models::request::RequestContext;

pub type PredicateFn = dyn Fn(&RequestContext) -> Result<bool, PredicateError> + Send + Sync;

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("Unknown predicate '{0}'")]
    Unknown(String),

    #[error("Predicate '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Predicate '{0}' panicked")]
    Panicked(String),
}

#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<PredicateFn>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `is_anonymous` and `is_authenticated`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("is_anonymous", |ctx| Ok(ctx.is_anonymous()));
        registry.register("is_authenticated", |ctx| Ok(!ctx.is_anonymous()));
        registry
    }

    /// Registers `predicate` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&RequestContext) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name.trim())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the predicate named by `source`. A panic inside the predicate is
    /// caught and reported as [`PredicateError::Panicked`].
    pub fn evaluate(&self, source: &str, ctx: &RequestContext) -> Result<bool, PredicateError> {
        let name = source.trim();
        let predicate = self
            .predicates
            .get(name)
            .ok_or_else(|| PredicateError::Unknown(name.to_string()))?;

        catch_unwind(AssertUnwindSafe(|| predicate(ctx)))
            .unwrap_or_else(|_| Err(PredicateError::Panicked(name.to_string())))
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}
