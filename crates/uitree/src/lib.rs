//! uitree: the per-session variable tree, path navigator, and
//! dependency-ordered change tracker.
//!
//! A [`Tree`] owns every [`Variable`] in one session. Nothing here is
//! `Send`-shared across sessions: the session dispatcher (uisession) is
//! the only caller, and it always calls in from a single task, so
//! internally this crate uses plain `HashMap`s rather than locking.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

use uiproto::{error_codes, value_eq, Properties, VarId};
use uiwrap::{CreateRegistry, Wrapper, WrapperRegistry};

pub mod nav;

pub use nav::{NavContext, NavError, NavOutcome};

/// Maps a navigation failure to its wire error code: an unregistered
/// `@NAME` standard variable is `not-found` (spec.md §4.4.1), every other
/// navigation failure (nullish intermediate, method-call failure, bad
/// write target) is `path-failure`.
fn nav_error_code(e: &NavError) -> &'static str {
    match e {
        NavError::NotFound(_) => error_codes::NOT_FOUND,
        NavError::PathFailure(_) => error_codes::PATH_FAILURE,
    }
}

/// Access mode from `properties["access"]` (spec.md §3): `r`/`w`/`rw`/
/// `action`, defaulting to `rw` when unset or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Read,
    Write,
    ReadWrite,
    Action,
}

fn access_mode(properties: &Properties) -> AccessMode {
    match properties.get("access").map(String::as_str) {
        Some("r") => AccessMode::Read,
        Some("w") => AccessMode::Write,
        Some("action") => AccessMode::Action,
        _ => AccessMode::ReadWrite,
    }
}

/// A single tracked variable.
pub struct Variable {
    pub id: VarId,
    pub parent_id: Option<VarId>,
    /// Raw (pre-wrapper) path, from `properties["path"]`, if bound to a
    /// computed path rather than a directly-set value.
    pub path: Option<String>,
    pub properties: Properties,
    pub value: Value,
    pub wrapper: Option<Box<dyn Wrapper>>,
    pub watch_tally: u32,
    /// Bound variables have a source-of-truth on the backend; unbound
    /// variables are server-owned (see `properties.unbound`).
    pub bound: bool,
    pub error: Option<VariableError>,
    pub stats: ComputeStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableError {
    pub code: String,
    pub description: String,
}

/// Per-variable compute diagnostics, exposed for testability; not wired
/// to any HTTP surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeStats {
    pub last_compute: Option<Duration>,
    pub peak_compute: Option<Duration>,
}

impl ComputeStats {
    fn record(&mut self, d: Duration) {
        self.last_compute = Some(d);
        self.peak_compute = Some(self.peak_compute.map_or(d, |p| p.max(d)));
    }
}

impl Variable {
    fn new(id: VarId, parent_id: Option<VarId>, value: Value, properties: Properties) -> Self {
        let bound = properties.get("unbound").map(String::as_str) != Some("true");
        let path = properties.get("path").cloned();
        Self {
            id,
            parent_id,
            path,
            properties,
            value,
            wrapper: None,
            watch_tally: 0,
            bound,
            error: None,
            stats: ComputeStats::default(),
        }
    }
}

/// Outcome of a single refresh batch: which variables changed, and which
/// newly-empty-of-watchers transitions should forward `unwatch`/`watch`
/// to the backend (tracked separately by the caller via tally deltas).
#[derive(Debug, Default)]
pub struct RefreshResult {
    /// Variables whose observable value changed this batch, in
    /// dependency order. Exactly one entry per touched variable, even if
    /// its path was re-navigated more than once within the batch.
    pub updated: Vec<VarId>,
    /// Variables that raised a compute error this batch.
    pub errored: Vec<VarId>,
    /// Variables whose previously-set error was cleared this batch.
    pub cleared_errors: Vec<VarId>,
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("variable {0} not found")]
    NotFound(VarId),
    #[error("unknown create type: {0}")]
    UnknownType(String),
}

/// The variable forest for one session.
pub struct Tree {
    next_id: VarId,
    variables: HashMap<VarId, Variable>,
    children: HashMap<VarId, Vec<VarId>>,
    creates: CreateRegistry,
    wrappers: WrapperRegistry,
}

impl Tree {
    pub fn new(creates: CreateRegistry, wrappers: WrapperRegistry) -> Self {
        Self {
            next_id: 1,
            variables: HashMap::new(),
            children: HashMap::new(),
            creates,
            wrappers,
        }
    }

    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(&id)
    }

    pub fn get_mut(&mut self, id: VarId) -> Option<&mut Variable> {
        self.variables.get_mut(&id)
    }

    /// Every variable id currently live in this tree, in no particular
    /// order. Used by viewdef hot-replacement to find every variable
    /// whose `type` matches a re-pushed template.
    pub fn variable_ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.variables.keys().copied()
    }

    /// Creates a new variable under `parent_id` (or a root variable if
    /// `None`). If `properties["create"]` names a registered type, the
    /// incoming `value` is ignored and the factory's output used instead.
    pub fn create(
        &mut self,
        parent_id: Option<VarId>,
        value: Option<Value>,
        properties: Properties,
    ) -> Result<VarId, TreeError> {
        let resolved = if let Some(type_name) = properties.get("create") {
            let factory = self
                .creates
                .get(type_name)
                .ok_or_else(|| TreeError::UnknownType(type_name.clone()))?;
            factory.create()
        } else {
            value.unwrap_or(Value::Null)
        };

        let id = self.next_id;
        self.next_id += 1;
        let var = Variable::new(id, parent_id, resolved, properties);
        self.variables.insert(id, var);
        if let Some(parent) = parent_id {
            self.children.entry(parent).or_default().push(id);
        }
        self.children.entry(id).or_default();
        Ok(id)
    }

    /// Destroys `id` and every descendant, depth-first. Returns the full
    /// set of ids destroyed, each paired with whether it was bound at
    /// the moment of destruction (caller uses this to emit `destroy` to
    /// observers, drop tallies, and decide whether an `unwatch` is owed
    /// to a bound backend).
    pub fn destroy(&mut self, id: VarId) -> Vec<(VarId, bool)> {
        let mut stack = vec![id];
        let mut destroyed = Vec::new();
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(&current) {
                stack.extend(kids);
            }
            if let Some(mut var) = self.variables.remove(&current) {
                if let Some(w) = var.wrapper.as_mut() {
                    w.on_destroy();
                }
                if let Some(parent) = var.parent_id {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|c| *c != current);
                    }
                }
                destroyed.push((current, var.bound));
            }
        }
        destroyed
    }

    /// Applies an incoming `update`: a value write (if present) plus a
    /// property merge. A variable with a `path` property is a computed
    /// view over its parent's value, so a value write there navigates
    /// `path` against the parent and writes through to it (spec.md
    /// §4.4.1/§7) rather than overwriting this variable's own stored
    /// value, which the next refresh would just re-derive anyway. A
    /// nullish intermediate on that write is a hard `path-failure`,
    /// returned here (and recorded on the variable) so the caller can
    /// broadcast it — see `Self::refresh`'s `NavOutcome::Empty` handling
    /// for why a subsequent read of the same still-broken path must not
    /// silently clear it.
    pub fn update<C: NavContext>(
        &mut self,
        ctx: &C,
        id: VarId,
        value: Option<Value>,
        properties: Properties,
    ) -> Result<Option<VariableError>, TreeError> {
        if !self.variables.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }
        let mut write_error = None;
        if let Some(write_value) = value {
            let access = self
                .variables
                .get(&id)
                .map(|v| access_mode(&v.properties))
                .unwrap_or(AccessMode::ReadWrite);
            if access == AccessMode::Read {
                write_error = self.set_variable_error(
                    id,
                    error_codes::UNAUTHORIZED,
                    "write rejected: variable is read-only (access=r)".to_owned(),
                );
            } else {
                let path = self.variables.get(&id).and_then(|v| v.path.clone());
                match path {
                    Some(path) => write_error = self.write_through_path(ctx, id, &path, write_value),
                    None => {
                        self.variables.get_mut(&id).expect("checked above").value = write_value;
                    }
                }
            }
        }
        let var = self.variables.get_mut(&id).expect("checked above");
        var.properties.extend(properties);
        if let Some(path) = var.properties.get("path").cloned() {
            var.path = Some(path);
        }
        if var.properties.get("unbound").map(String::as_str) == Some("true") {
            var.bound = false;
        }
        Ok(write_error)
    }

    /// Navigates `path` against `id`'s parent's current value and writes
    /// `write_value` through it, storing the result back on the parent
    /// (or on `id` itself, for a root-level path-bound variable). On a
    /// nullish intermediate or unparseable path, records a `path-failure`
    /// on `id` and returns it instead of touching the parent.
    fn write_through_path<C: NavContext>(
        &mut self,
        ctx: &C,
        id: VarId,
        path: &str,
        write_value: Value,
    ) -> Option<VariableError> {
        let parent_id = self.variables.get(&id).and_then(|v| v.parent_id);
        let parent_value = parent_id
            .and_then(|p| self.variables.get(&p))
            .map(|p| p.value.clone())
            .unwrap_or(Value::Null);

        let parsed = match uiproto::parse_path(path) {
            Ok(p) => p,
            Err(e) => return self.set_variable_error(id, error_codes::PATH_FAILURE, e.to_string()),
        };

        match nav::navigate_write(ctx, &parent_value, &parsed.segments, write_value) {
            Ok(updated) => {
                match parent_id {
                    Some(p) => {
                        if let Some(pv) = self.variables.get_mut(&p) {
                            pv.value = updated;
                        }
                    }
                    None => {
                        if let Some(v) = self.variables.get_mut(&id) {
                            v.value = updated;
                        }
                    }
                }
                if let Some(v) = self.variables.get_mut(&id) {
                    v.error = None;
                }
                None
            }
            Err(e) => self.set_variable_error(id, nav_error_code(&e), e.to_string()),
        }
    }

    fn set_variable_error(&mut self, id: VarId, code: &str, description: String) -> Option<VariableError> {
        let error = VariableError {
            code: code.to_owned(),
            description,
        };
        if let Some(var) = self.variables.get_mut(&id) {
            var.error = Some(error.clone());
        }
        Some(error)
    }

    /// `watch(v)`: returns `true` if this is the 0→1 transition (caller
    /// forwards `watch` to the backend only in that case, and only for
    /// bound variables).
    pub fn watch(&mut self, id: VarId) -> Result<bool, TreeError> {
        let var = self.variables.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        var.watch_tally += 1;
        Ok(var.watch_tally == 1)
    }

    /// `unwatch(v)`: returns `true` on the 1→0 transition.
    pub fn unwatch(&mut self, id: VarId) -> Result<bool, TreeError> {
        let var = self.variables.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        var.watch_tally = var.watch_tally.saturating_sub(1);
        Ok(var.watch_tally == 0)
    }

    fn is_observed(&self, id: VarId) -> bool {
        if self.variables.get(&id).is_some_and(|v| v.watch_tally > 0) {
            return true;
        }
        self.children
            .get(&id)
            .is_some_and(|kids| kids.iter().any(|c| self.is_observed(*c)))
    }

    /// Computes a dependency order (parents before children) over every
    /// variable currently in the tree, breaking ties by ascending
    /// insertion (id) order via a Kahn's-algorithm topological sort.
    fn dependency_order(&self) -> Vec<VarId> {
        let mut ids: Vec<VarId> = self.variables.keys().copied().collect();
        ids.sort_unstable();

        let mut indegree: HashMap<VarId, usize> = ids.iter().map(|id| (*id, 0)).collect();
        for id in &ids {
            if let Some(kids) = self.children.get(id) {
                for child in kids {
                    if let Some(d) = indegree.get_mut(child) {
                        *d += 1;
                    }
                }
            }
        }

        let mut ready: VecDeque<VarId> = ids
            .iter()
            .copied()
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(ids.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            if let Some(kids) = self.children.get(&id) {
                let mut newly_ready: Vec<VarId> = Vec::new();
                for child in kids {
                    if let Some(d) = indegree.get_mut(child) {
                        *d -= 1;
                        if *d == 0 {
                            newly_ready.push(*child);
                        }
                    }
                }
                newly_ready.sort_unstable();
                for child in newly_ready {
                    ready.push_back(child);
                }
            }
        }
        order
    }

    /// Runs one refresh batch: re-navigates every path-bound variable in
    /// dependency order, diffs against the previous value, updates
    /// wrappers, and collects the set of variables that changed.
    ///
    /// `now` is supplied by the caller (never read from the system clock
    /// here) so tests and the hosted runtime control time explicitly.
    #[instrument(skip(self, ctx, elapsed))]
    pub fn refresh<C, F>(&mut self, ctx: &C, mut elapsed: F) -> RefreshResult
    where
        C: NavContext,
        F: FnMut() -> Duration,
    {
        let order = self.dependency_order();
        let mut result = RefreshResult::default();

        for id in order {
            let Some(path) = self.variables.get(&id).and_then(|v| v.path.clone()) else {
                continue;
            };
            let access = self
                .variables
                .get(&id)
                .map(|v| access_mode(&v.properties))
                .unwrap_or(AccessMode::ReadWrite);
            // spec.md §3: `access=action` suppresses the initial value
            // computation entirely, so a write-only trigger method is
            // never spuriously invoked by a refresh pass.
            if access == AccessMode::Action {
                continue;
            }
            if access == AccessMode::Write {
                self.record_error(
                    id,
                    &mut result,
                    error_codes::UNAUTHORIZED,
                    "read rejected: variable is write-only (access=w)".to_owned(),
                );
                continue;
            }
            let parent_value = self
                .variables
                .get(&id)
                .and_then(|v| v.parent_id)
                .and_then(|p| self.variables.get(&p))
                .map(|p| p.value.clone())
                .unwrap_or(Value::Null);

            let parsed = match uiproto::parse_path(&path) {
                Ok(p) => p,
                Err(e) => {
                    self.record_error(id, &mut result, error_codes::PATH_FAILURE, e.to_string());
                    continue;
                }
            };

            let outcome = nav::navigate_read(ctx, &parent_value, &parsed.segments);
            // A nullish intermediate (`Empty`) is never an error for a
            // read (spec.md §4.4.1), but it must not be treated the same
            // as a genuinely resolved value for the purpose of clearing
            // an error: a prior failed *write* through this same path
            // (`Self::write_through_path`) stays visible until the path
            // actually resolves to something, not merely until it stops
            // erroring (spec.md §7's nullish-write scenario: the error
            // persists across a refresh that still reads through the
            // same null intermediate, and only clears once the parent is
            // fixed and the read produces a real value).
            let (new_value, resolved) = match outcome {
                Ok(NavOutcome::Value(v)) => (v, true),
                Ok(NavOutcome::Empty) => (Value::Null, false),
                Err(e) => {
                    self.record_error(id, &mut result, nav_error_code(&e), e.to_string());
                    continue;
                }
            };

            let duration = elapsed();
            let var = self.variables.get_mut(&id).expect("id came from this tree");
            var.stats.record(duration);

            let type_changed_wrapper = var.properties.get("wrapper").cloned();
            let had_error = var.error.is_some();
            let changed = !value_eq(&var.value, &new_value);
            if changed {
                var.value = new_value.clone();
            }

            if let Some(type_name) = type_changed_wrapper {
                if changed || var.wrapper.is_none() {
                    if let Some(factory) = self.wrappers.get(&type_name) {
                        let existing = var.wrapper.take();
                        var.wrapper = factory.wrap(&new_value, existing);
                    }
                }
            }

            if resolved {
                if var.error.take().is_some() {
                    result.cleared_errors.push(id);
                }
                if changed && self.is_observed(id) {
                    result.updated.push(id);
                }
            } else if changed && !had_error && self.is_observed(id) {
                result.updated.push(id);
            }
        }

        result
    }

    fn record_error(
        &mut self,
        id: VarId,
        result: &mut RefreshResult,
        code: &str,
        description: String,
    ) {
        if let Some(var) = self.variables.get_mut(&id) {
            var.error = Some(VariableError {
                code: code.to_owned(),
                description,
            });
        }
        result.errored.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uiwrap::{CreateFactory, WrapperFactory};
    use std::sync::Arc;

    struct StubCtx;
    impl NavContext for StubCtx {
        fn call_method(&self, _name: &str, _arg: Option<&Value>) -> Result<Value, NavError> {
            Err(NavError::PathFailure("methods unsupported in stub".into()))
        }
        fn standard_var(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    fn empty_registries() -> (CreateRegistry, WrapperRegistry) {
        (CreateRegistry::new(), WrapperRegistry::new())
    }

    #[test]
    fn create_destroy_returns_to_baseline_modulo_id() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let id = tree
            .create(None, Some(serde_json::json!({"name": "Alice"})), Properties::new())
            .unwrap();
        assert!(tree.get(id).is_some());
        let destroyed = tree.destroy(id);
        assert_eq!(destroyed, vec![(id, true)]);
        assert!(tree.get(id).is_none());
    }

    #[test]
    fn destroy_is_recursive_over_children() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let parent = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        let child = tree
            .create(Some(parent), Some(Value::Null), Properties::new())
            .unwrap();
        let grandchild = tree
            .create(Some(child), Some(Value::Null), Properties::new())
            .unwrap();

        let mut destroyed = tree.destroy(parent);
        destroyed.sort_unstable();
        let mut expected = vec![(parent, true), (child, true), (grandchild, true)];
        expected.sort_unstable();
        assert_eq!(destroyed, expected);
        assert!(tree.get(child).is_none());
        assert!(tree.get(grandchild).is_none());
    }

    #[test]
    fn watch_tally_transitions() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let id = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        assert!(tree.watch(id).unwrap(), "first watch is the 0->1 transition");
        assert!(!tree.watch(id).unwrap(), "second watch is not a transition");
        assert!(!tree.unwatch(id).unwrap(), "first unwatch (2->1) is not a transition");
        assert!(tree.unwatch(id).unwrap(), "second unwatch (1->0) is the transition");
    }

    #[test]
    fn create_unknown_type_fails() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let mut props = Properties::new();
        props.insert("create".to_owned(), "Nope".to_owned());
        let err = tree.create(None, None, props).unwrap_err();
        assert!(matches!(err, TreeError::UnknownType(t) if t == "Nope"));
    }

    struct ConstFactory(Value);
    impl CreateFactory for ConstFactory {
        fn create(&self) -> Value {
            self.0.clone()
        }
    }

    #[test]
    fn create_factory_ignores_incoming_value() {
        let (mut c, w) = empty_registries();
        c.register("Greeting", Arc::new(ConstFactory(serde_json::json!("hello"))));
        let mut tree = Tree::new(c, w);
        let mut props = Properties::new();
        props.insert("create".to_owned(), "Greeting".to_owned());
        let id = tree
            .create(None, Some(serde_json::json!("ignored")), props)
            .unwrap();
        assert_eq!(tree.get(id).unwrap().value, serde_json::json!("hello"));
    }

    #[test]
    fn dependency_order_respects_parent_before_child_with_insertion_tiebreak() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        let b = tree.create(Some(root), Some(Value::Null), Properties::new()).unwrap();
        let a = tree.create(Some(root), Some(Value::Null), Properties::new()).unwrap();
        let order = tree.dependency_order();
        let pos = |id: VarId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(root) < pos(a));
        assert!(pos(root) < pos(b));
        assert!(pos(b) < pos(a), "insertion order b-then-a preserved among siblings");
    }

    #[test]
    fn refresh_emits_exactly_one_update_per_touched_variable() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"name": "Alice"})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "name".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert_eq!(result.updated, vec![derived]);
        assert_eq!(tree.get(derived).unwrap().value, serde_json::json!("Alice"));

        // A second refresh with nothing changed emits no further update.
        let result2 = tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(result2.updated.is_empty());
    }

    #[test]
    fn unobserved_variable_records_value_without_emitting_update() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"name": "Alice"})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "name".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        // No watch() call: derived has no observers.

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(result.updated.is_empty());
        assert_eq!(tree.get(derived).unwrap().value, serde_json::json!("Alice"));
    }

    #[test]
    fn nullish_mid_path_clears_to_empty_without_error() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "missing.field".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(result.errored.is_empty());
        assert_eq!(tree.get(derived).unwrap().value, Value::Null);
    }

    struct SelectionWrapper {
        items: Vec<Value>,
    }
    impl Wrapper for SelectionWrapper {
        fn value(&self) -> Value {
            Value::Array(self.items.clone())
        }
    }
    struct SelectionFactory;
    impl WrapperFactory for SelectionFactory {
        fn wrap(&self, value: &Value, _existing: Option<Box<dyn Wrapper>>) -> Option<Box<dyn Wrapper>> {
            Some(Box::new(SelectionWrapper {
                items: value.as_array()?.clone(),
            }))
        }
    }

    #[test]
    fn wrapper_is_installed_on_first_observed_change() {
        let (c, mut w) = empty_registries();
        w.register("Selection", Arc::new(SelectionFactory));
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"items": [1, 2, 3]})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "items".to_owned());
        props.insert("wrapper".to_owned(), "Selection".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(tree.get(derived).unwrap().wrapper.is_some());
    }

    #[test]
    fn write_through_nullish_intermediate_fails_without_partial_write() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"selectedContact": null})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "selectedContact.firstName".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();

        let ctx = StubCtx;
        let err = tree
            .update(&ctx, derived, Some(serde_json::json!("X")), Properties::new())
            .unwrap()
            .expect("nullish intermediate on write is a path-failure");
        assert_eq!(err.code, "path-failure");
        assert_eq!(
            tree.get(root).unwrap().value,
            serde_json::json!({"selectedContact": null}),
            "no partial write reaches the parent"
        );
        assert_eq!(tree.get(derived).unwrap().error, Some(err));
    }

    #[test]
    fn refresh_does_not_clear_write_error_while_path_still_nullish() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"selectedContact": null})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "selectedContact.firstName".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        tree.update(&ctx, derived, Some(serde_json::json!("X")), Properties::new())
            .unwrap();
        assert!(tree.get(derived).unwrap().error.is_some());

        // Same refresh pass a real caller would run right after the failed
        // write: the parent is still `{selectedContact: null}`, so the read
        // bottoms out at the same nullish intermediate (`Empty`), and the
        // error must survive it.
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(result.cleared_errors.is_empty());
        assert!(tree.get(derived).unwrap().error.is_some());

        // Now the parent is fixed: the path resolves to a real value and
        // the next refresh clears the error and emits the fresh value.
        tree.update(&ctx, root, Some(serde_json::json!({"selectedContact": {"firstName": ""}})), Properties::new())
            .unwrap();
        let result2 = tree.refresh(&ctx, || Duration::from_millis(1));
        assert_eq!(result2.cleared_errors, vec![derived]);
        assert_eq!(result2.updated, vec![derived]);
        assert_eq!(tree.get(derived).unwrap().value, serde_json::json!(""));
        assert!(tree.get(derived).unwrap().error.is_none());
    }

    #[test]
    fn refresh_maps_unregistered_standard_var_to_not_found_not_path_failure() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree.create(None, Some(serde_json::json!({})), Properties::new()).unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "@Missing.field".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert_eq!(result.errored, vec![derived]);
        let err = tree.get(derived).unwrap().error.clone().unwrap();
        assert_eq!(err.code, error_codes::NOT_FOUND);
    }

    #[test]
    fn write_through_unregistered_standard_var_is_not_found_not_path_failure() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree.create(None, Some(serde_json::json!({})), Properties::new()).unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "@Missing.field".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();

        let ctx = StubCtx;
        let err = tree
            .update(&ctx, derived, Some(serde_json::json!("X")), Properties::new())
            .unwrap()
            .expect("unregistered standard var is not-found");
        assert_eq!(err.code, error_codes::NOT_FOUND);
    }

    #[test]
    fn read_only_variable_rejects_write_with_unauthorized() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let mut props = Properties::new();
        props.insert("access".to_owned(), "r".to_owned());
        let id = tree.create(None, Some(serde_json::json!(1)), props).unwrap();
        let ctx = StubCtx;

        let err = tree
            .update(&ctx, id, Some(serde_json::json!(2)), Properties::new())
            .unwrap()
            .expect("write to r-only variable is unauthorized");
        assert_eq!(err.code, error_codes::UNAUTHORIZED);
        assert_eq!(tree.get(id).unwrap().value, serde_json::json!(1), "write did not apply");
    }

    #[test]
    fn action_access_suppresses_refresh_computation() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"name": "Alice"})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "name".to_owned());
        props.insert("access".to_owned(), "action".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert!(result.updated.is_empty());
        assert!(result.errored.is_empty());
        assert_eq!(tree.get(derived).unwrap().value, Value::Null, "never computed");
    }

    #[test]
    fn write_only_variable_read_rejected_with_unauthorized() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let root = tree
            .create(None, Some(serde_json::json!({"name": "Alice"})), Properties::new())
            .unwrap();
        let mut props = Properties::new();
        props.insert("path".to_owned(), "name".to_owned());
        props.insert("access".to_owned(), "w".to_owned());
        let derived = tree.create(Some(root), Some(Value::Null), props).unwrap();
        tree.watch(derived).unwrap();

        let ctx = StubCtx;
        let result = tree.refresh(&ctx, || Duration::from_millis(1));
        assert_eq!(result.errored, vec![derived]);
        let err = tree.get(derived).unwrap().error.clone().unwrap();
        assert_eq!(err.code, error_codes::UNAUTHORIZED);
    }

    #[test]
    fn destroy_removes_the_sibling_entry_from_the_parents_children_list() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let parent = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        let a = tree.create(Some(parent), Some(Value::Null), Properties::new()).unwrap();
        let b = tree.create(Some(parent), Some(Value::Null), Properties::new()).unwrap();

        tree.destroy(a);

        let siblings = tree.children.get(&parent).expect("parent still has a children entry");
        assert!(!siblings.contains(&a), "destroyed sibling left dangling in parent's children list");
        assert!(siblings.contains(&b), "surviving sibling still listed");
    }

    #[test]
    fn write_without_path_sets_value_directly() {
        let (c, w) = empty_registries();
        let mut tree = Tree::new(c, w);
        let id = tree.create(None, Some(Value::Null), Properties::new()).unwrap();
        let ctx = StubCtx;
        let err = tree
            .update(&ctx, id, Some(serde_json::json!(42)), Properties::new())
            .unwrap();
        assert!(err.is_none());
        assert_eq!(tree.get(id).unwrap().value, serde_json::json!(42));
    }
}
