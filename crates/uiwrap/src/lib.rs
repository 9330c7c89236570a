//! uiwrap: the `create=`/`wrapper=` type registries.
//!
//! Two registries are populated at startup from built-in defaults and, in
//! the hosted runtime, by user-supplied (script) definitions:
//!
//! - the **create factory** registry instantiates a fresh value for
//!   `properties.create=<TypeName>`.
//! - the **wrapper factory** registry wraps a variable's raw value for
//!   `properties.wrapper=<TypeName>`, and is given the chance to reuse an
//!   existing wrapper instance (stateful wrappers like list selection rely
//!   on this).
//!
//! Both lookups are case-sensitive; an unknown type name is the caller's
//! `unknown-type` error to raise, not this crate's.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// A type-registered object that stands in for a variable's raw value
/// during path navigation.
pub trait Wrapper: Send + Sync {
    /// The effective value exposed to the tree for diffing and delivery.
    fn value(&self) -> Value;

    /// Navigates into a named field/index of the wrapped value. Returns
    /// `None` if the wrapper does not recognize `name` (the navigator then
    /// falls back to treating it as nullish, per path-navigation rules).
    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Invoked once, on variable destruction, if present.
    fn on_destroy(&mut self) {}
}

/// Creates a fresh value of a named type, ignoring any incoming `value`.
pub trait CreateFactory: Send + Sync {
    fn create(&self) -> Value;
}

/// Produces (or reuses) a [`Wrapper`] for a variable whose raw value just
/// changed.
///
/// Factories are expected to be idempotent with respect to existing
/// wrappers: if `existing` is `Some`, the factory may return it unchanged,
/// mutate-then-return it, or discard it and return a fresh wrapper. The
/// contract is "wrapper is correct for the new value", not "a new
/// instance is returned on every call" — stateful wrappers (e.g. list
/// selection, scroll position) depend on being able to survive an
/// underlying-array change.
pub trait WrapperFactory: Send + Sync {
    fn wrap(&self, value: &Value, existing: Option<Box<dyn Wrapper>>) -> Option<Box<dyn Wrapper>>;
}

struct Entry<F: ?Sized> {
    factory: Arc<F>,
    module: Option<String>,
}

/// Type-name-keyed registry of create factories, with module-tagged
/// registration so a hosted-runtime module unload can remove only the
/// types it registered.
#[derive(Default)]
pub struct CreateRegistry {
    entries: HashMap<String, Entry<dyn CreateFactory>>,
}

impl CreateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, factory: Arc<dyn CreateFactory>) {
        self.register_for_module(type_name, factory, None);
    }

    pub fn register_for_module(
        &mut self,
        type_name: impl Into<String>,
        factory: Arc<dyn CreateFactory>,
        module: Option<String>,
    ) {
        self.entries
            .insert(type_name.into(), Entry { factory, module });
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn CreateFactory>> {
        self.entries.get(type_name).map(|e| e.factory.clone())
    }

    /// Removes every registration tagged with `module`. Returns the count removed.
    pub fn unload_module(&mut self, module: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.module.as_deref() != Some(module));
        before - self.entries.len()
    }
}

/// Type-name-keyed registry of wrapper factories, with the same
/// module-tagged unload semantics as [`CreateRegistry`].
#[derive(Default)]
pub struct WrapperRegistry {
    entries: HashMap<String, Entry<dyn WrapperFactory>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, factory: Arc<dyn WrapperFactory>) {
        self.register_for_module(type_name, factory, None);
    }

    pub fn register_for_module(
        &mut self,
        type_name: impl Into<String>,
        factory: Arc<dyn WrapperFactory>,
        module: Option<String>,
    ) {
        self.entries
            .insert(type_name.into(), Entry { factory, module });
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn WrapperFactory>> {
        self.entries.get(type_name).map(|e| e.factory.clone())
    }

    pub fn unload_module(&mut self, module: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.module.as_deref() != Some(module));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstFactory(Value);
    impl CreateFactory for ConstFactory {
        fn create(&self) -> Value {
            self.0.clone()
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut reg = CreateRegistry::new();
        reg.register("Contact", Arc::new(ConstFactory(serde_json::json!({}))));
        assert!(reg.get("Contact").is_some());
        assert!(reg.get("contact").is_none());
    }

    #[test]
    fn unload_module_removes_only_its_entries() {
        let mut reg = CreateRegistry::new();
        reg.register_for_module(
            "Contact",
            Arc::new(ConstFactory(serde_json::json!({}))),
            Some("crm".to_owned()),
        );
        reg.register("Builtin", Arc::new(ConstFactory(serde_json::json!({}))));

        let removed = reg.unload_module("crm");
        assert_eq!(removed, 1);
        assert!(reg.get("Contact").is_none());
        assert!(reg.get("Builtin").is_some());
    }

    struct SelectionWrapper {
        items: Vec<Value>,
        selected: usize,
    }
    impl Wrapper for SelectionWrapper {
        fn value(&self) -> Value {
            Value::Array(self.items.clone())
        }
        fn get_field(&self, name: &str) -> Option<Value> {
            if name == "selected" {
                Some(Value::from(self.selected))
            } else {
                None
            }
        }
    }

    struct SelectionFactory;
    impl WrapperFactory for SelectionFactory {
        fn wrap(&self, value: &Value, existing: Option<Box<dyn Wrapper>>) -> Option<Box<dyn Wrapper>> {
            let items = value.as_array()?.clone();
            let selected = existing
                .as_ref()
                .and_then(|w| w.get_field("selected"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let selected = selected.min(items.len().saturating_sub(1));
            Some(Box::new(SelectionWrapper { items, selected }))
        }
    }

    #[test]
    fn wrapper_factory_can_preserve_selection_across_array_changes() {
        let factory = SelectionFactory;
        let first = factory
            .wrap(&serde_json::json!([1, 2, 3]), None)
            .unwrap();
        // Simulate the caller advancing selection to index 2.
        let advanced: Box<dyn Wrapper> = Box::new(SelectionWrapper {
            items: vec![Value::from(1), Value::from(2), Value::from(3)],
            selected: 2,
        });
        let _ = first;
        let second = factory
            .wrap(&serde_json::json!([9, 8, 7, 6]), Some(advanced))
            .unwrap();
        assert_eq!(second.get_field("selected"), Some(Value::from(2)));
    }
}
