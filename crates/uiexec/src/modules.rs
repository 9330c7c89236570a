//! Module-tagged registration tracking and hot-reload debounce.
//!
//! `uiexec` doesn't own the concrete prototype/wrapper/viewdef
//! registries (those live in `uiwrap` and `uiview`); it only remembers
//! which module registered which named entry in which registry, so
//! `UnloadModule`/`UnloadDirectory` can report the exact set of entries
//! the caller must remove from those registries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Prototype,
    Presenter,
    Wrapper,
    Viewdef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredItem {
    pub kind: RegistryKind,
    pub type_name: String,
}

#[derive(Default)]
pub struct ModuleTracker {
    by_module: HashMap<String, Vec<RegisteredItem>>,
    files_by_module: HashMap<String, String>,
    modules_by_dir: HashMap<String, Vec<String>>,
}

impl ModuleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, module: &str, kind: RegistryKind, type_name: impl Into<String>) {
        self.by_module
            .entry(module.to_owned())
            .or_default()
            .push(RegisteredItem {
                kind,
                type_name: type_name.into(),
            });
    }

    /// Associates `module` with the canonical file path it was loaded
    /// from, grouping it under that file's parent directory for
    /// `unload_directory`.
    pub fn record_source(&mut self, module: &str, canonical_path: &str, dir: &str) {
        self.files_by_module
            .insert(module.to_owned(), canonical_path.to_owned());
        let entry = self.modules_by_dir.entry(dir.to_owned()).or_default();
        if !entry.iter().any(|m| m == module) {
            entry.push(module.to_owned());
        }
    }

    /// Reverses every registration made by `module`. Returns what was
    /// removed so the caller can apply it against the concrete
    /// registries; instances keep their old prototype/wrapper but
    /// receive no future mutations from this module.
    pub fn unload_module(&mut self, module: &str) -> Vec<RegisteredItem> {
        self.files_by_module.remove(module);
        for modules in self.modules_by_dir.values_mut() {
            modules.retain(|m| m != module);
        }
        self.by_module.remove(module).unwrap_or_default()
    }

    /// Unloads every module loaded from within `dir` and drops the
    /// directory's hot-reload tracking.
    pub fn unload_directory(&mut self, dir: &str) -> Vec<RegisteredItem> {
        let modules = self.modules_by_dir.remove(dir).unwrap_or_default();
        modules
            .into_iter()
            .flat_map(|m| self.unload_module(&m))
            .collect()
    }

    pub fn modules_in_directory(&self, dir: &str) -> &[String] {
        self.modules_by_dir.get(dir).map_or(&[], Vec::as_slice)
    }
}

/// Per-path coalescing window for hot-reload file-change events. Rapid
/// successive changes to the same canonical path (or a symlink pointing
/// at it) within `window` are suppressed after the first.
pub struct HotReloadDebouncer {
    window: Duration,
    last_fired: HashMap<String, Instant>,
}

impl HotReloadDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    /// Returns `true` if this event should trigger a reload, given the
    /// caller-supplied `now` (never read from the system clock here so
    /// tests control time explicitly).
    pub fn should_fire(&mut self, canonical_path: &str, now: Instant) -> bool {
        let fire = self
            .last_fired
            .get(canonical_path)
            .map_or(true, |last| now.duration_since(*last) >= self.window);
        if fire {
            self.last_fired.insert(canonical_path.to_owned(), now);
        }
        fire
    }

    pub fn forget(&mut self, canonical_path: &str) {
        self.last_fired.remove(canonical_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_module_returns_only_its_own_registrations() {
        let mut tracker = ModuleTracker::new();
        tracker.record("crm", RegistryKind::Prototype, "Contact");
        tracker.record("crm", RegistryKind::Wrapper, "Selection");
        tracker.record("billing", RegistryKind::Prototype, "Invoice");

        let removed = tracker.unload_module("crm");
        assert_eq!(removed.len(), 2);
        assert!(tracker.unload_module("crm").is_empty(), "already unloaded");
        let still_there = tracker.unload_module("billing");
        assert_eq!(still_there.len(), 1);
    }

    #[test]
    fn unload_directory_unloads_every_module_in_it() {
        let mut tracker = ModuleTracker::new();
        tracker.record("crm", RegistryKind::Prototype, "Contact");
        tracker.record("billing", RegistryKind::Prototype, "Invoice");
        tracker.record_source("crm", "/app/crm.lua", "/app");
        tracker.record_source("billing", "/app/billing.lua", "/app");

        let removed = tracker.unload_directory("/app");
        assert_eq!(removed.len(), 2);
        assert!(tracker.modules_in_directory("/app").is_empty());
    }

    #[test]
    fn debounce_suppresses_rapid_repeats_but_allows_after_window() {
        let mut deb = HotReloadDebouncer::new(Duration::from_millis(50));
        let t0 = Instant::now();
        assert!(deb.should_fire("/app/crm.lua", t0));
        assert!(!deb.should_fire("/app/crm.lua", t0 + Duration::from_millis(10)));
        assert!(deb.should_fire("/app/crm.lua", t0 + Duration::from_millis(60)));
    }
}
