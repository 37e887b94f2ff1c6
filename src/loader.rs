//! Compiled-in handler registry.
//!
//! A job definition names its handler by `(assembly_name, class_name)`. Handlers
//! are registered under that pair at startup and resolved by the reconciler
//! when a job is attached to the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::job::BoxedExecFn;

/// Normalized `(assembly, class)` pair. Matching is case-insensitive; the
/// assembly locator ignores a leading path separator and treats `\` as `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerLocator {
  assembly: String,
  class: String,
}

impl HandlerLocator {
  fn new(assembly_name: &str, class_name: &str) -> Self {
    let assembly = assembly_name.trim().replace('\\', "/");
    Self {
      assembly: assembly.trim_start_matches('/').to_lowercase(),
      class: class_name.trim().to_lowercase(),
    }
  }
}

/// Maps `(assembly_name, class_name)` to an executable handler.
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: RwLock<HashMap<HandlerLocator, Arc<BoxedExecFn>>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `exec_fn` under the pair, replacing any previous handler.
  pub fn register<F>(&self, assembly_name: &str, class_name: &str, exec_fn: F)
  where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'static>>
      + Send
      + Sync
      + 'static,
  {
    self.register_boxed(assembly_name, class_name, Arc::new(Box::new(exec_fn) as BoxedExecFn));
  }

  pub fn register_boxed(&self, assembly_name: &str, class_name: &str, exec_fn: Arc<BoxedExecFn>) {
    let locator = HandlerLocator::new(assembly_name, class_name);
    if self.handlers.write().insert(locator, exec_fn).is_some() {
      warn!(assembly_name, class_name, "Replaced an existing handler registration.");
    } else {
      debug!(assembly_name, class_name, "Registered handler.");
    }
  }

  /// Looks up the handler for the pair, `None` if nothing is registered.
  pub fn resolve(&self, assembly_name: &str, class_name: &str) -> Option<Arc<BoxedExecFn>> {
    let locator = HandlerLocator::new(assembly_name, class_name);
    self.handlers.read().get(&locator).cloned()
  }

  pub fn contains(&self, assembly_name: &str, class_name: &str) -> bool {
    self.resolve(assembly_name, class_name).is_some()
  }

  pub fn len(&self) -> usize {
    self.handlers.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.read().is_empty()
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("handlers", &self.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn noop() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'static>> {
    Box::pin(async { true })
  }

  #[test]
  fn resolves_case_insensitively() {
    let registry = HandlerRegistry::new();
    registry.register("Jobs/Reports.dll", "Reports.Daily", noop);

    assert!(registry.contains("jobs/reports.dll", "reports.daily"));
    assert!(registry.contains("\\Jobs\\Reports.dll", "Reports.Daily"));
    assert!(!registry.contains("Jobs/Reports.dll", "Reports.Weekly"));
  }

  #[test]
  fn missing_pair_is_none() {
    let registry = HandlerRegistry::new();
    assert!(registry.resolve("a", "b").is_none());
    assert!(registry.is_empty());
  }
}
