//! uiview: the per-session viewdef store.
//!
//! A viewdef is a template string keyed by `(Type, Namespace)`. The store
//! tracks which keys have already been pushed to the frontend (the
//! `delivered` set) so a variable whose `type` changes only triggers a
//! push for viewdefs the frontend doesn't already have, and so a source
//! hot-replacement only re-pushes keys that were actually delivered.

use std::collections::{HashMap, HashSet};

pub type Type = String;
pub type Namespace = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewdefKey {
    pub r#type: Type,
    pub namespace: Namespace,
}

impl ViewdefKey {
    pub fn new(r#type: impl Into<Type>, namespace: impl Into<Namespace>) -> Self {
        Self {
            r#type: r#type.into(),
            namespace: namespace.into(),
        }
    }

    /// Renders the wire form, e.g. `Contact.default`.
    pub fn to_key_string(&self) -> String {
        format!("{}.{}", self.r#type, self.namespace)
    }
}

#[derive(Default)]
pub struct ViewdefStore {
    templates: HashMap<ViewdefKey, String>,
    delivered: HashSet<ViewdefKey>,
}

impl ViewdefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a viewdef's template source. Returns
    /// `true` if this is a hot-replacement of an already-registered
    /// viewdef (the caller should then re-push and force a re-render),
    /// `false` for a first-time registration.
    pub fn set_template(&mut self, key: ViewdefKey, template: impl Into<String>) -> bool {
        let replaced = self.templates.insert(key, template.into()).is_some();
        replaced
    }

    pub fn template(&self, key: &ViewdefKey) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    /// Returns the viewdefs that still need to be delivered for `type_name`
    /// and marks them delivered. A type may have more than one viewdef
    /// (multiple namespaces).
    pub fn pending_for_type(&mut self, type_name: &str) -> Vec<(ViewdefKey, String)> {
        let pending: Vec<(ViewdefKey, String)> = self
            .templates
            .iter()
            .filter(|(k, _)| k.r#type == type_name && !self.delivered.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, _) in &pending {
            self.delivered.insert(key.clone());
        }
        pending
    }

    /// Hot-replacement: returns the re-push payload for `key` only if it
    /// was already delivered this session (an undelivered viewdef is
    /// simply updated in place; the next `pending_for_type` call picks up
    /// the new content naturally).
    pub fn hot_replace(&mut self, key: &ViewdefKey, template: impl Into<String>) -> Option<String> {
        let template = template.into();
        self.templates.insert(key.clone(), template.clone());
        self.delivered.contains(key).then_some(template)
    }

    pub fn is_delivered(&self, key: &ViewdefKey) -> bool {
        self.delivered.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_dotted_wire_form() {
        let key = ViewdefKey::new("Contact", "default");
        assert_eq!(key.to_key_string(), "Contact.default");
    }

    #[test]
    fn pending_for_type_delivers_each_namespace_once() {
        let mut store = ViewdefStore::new();
        store.set_template(ViewdefKey::new("Contact", "default"), "<div/>");
        store.set_template(ViewdefKey::new("Contact", "compact"), "<span/>");

        let first = store.pending_for_type("Contact");
        assert_eq!(first.len(), 2);

        let second = store.pending_for_type("Contact");
        assert!(second.is_empty(), "already delivered, nothing pending");
    }

    #[test]
    fn hot_replace_only_repushes_already_delivered_keys() {
        let mut store = ViewdefStore::new();
        let key = ViewdefKey::new("Contact", "default");
        store.set_template(key.clone(), "<div/>");

        // Not yet delivered: hot_replace updates content but reports no re-push.
        let repush = store.hot_replace(&key, "<div class='v2'/>");
        assert_eq!(repush, None);

        store.pending_for_type("Contact");
        assert!(store.is_delivered(&key));

        // Now delivered: a further hot-replacement does report a re-push.
        let repush2 = store.hot_replace(&key, "<div class='v3'/>");
        assert_eq!(repush2, Some("<div class='v3'/>".to_owned()));
        assert_eq!(store.template(&key), Some("<div class='v3'/>"));
    }
}
