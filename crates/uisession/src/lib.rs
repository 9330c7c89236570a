//! uisession: the process-wide session registry.
//!
//! One `SessionRegistry` is shared across the whole server behind a
//! single `Arc<tokio::sync::RwLock<..>>`; per-session state referenced
//! elsewhere (the variable tree, the executor) is owned by that
//! session's own dispatcher and never touches this lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uiproto::VarId;

/// Internal session id: a 128-bit random value, hex-encoded, never
/// exposed on the wire (only the vended id crosses the backend socket).
pub type InternalId = String;
pub type VendedId = u64;
pub type ConnId = u64;

fn new_internal_id() -> InternalId {
    format!("{:032x}", rand::random::<u128>())
}

pub struct Session {
    pub internal_id: InternalId,
    pub vended_id: VendedId,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub connections: HashSet<ConnId>,
    url_routes: HashMap<String, VarId>,
}

impl Session {
    fn new(internal_id: InternalId, vended_id: VendedId) -> Self {
        let now = Instant::now();
        Self {
            internal_id,
            vended_id,
            created_at: now,
            last_activity: now,
            connections: HashSet::new(),
            url_routes: HashMap::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

type Hook = Arc<dyn Fn(&Session) + Send + Sync>;

#[derive(Default)]
struct Inner {
    sessions: HashMap<InternalId, Session>,
    vended_to_internal: HashMap<VendedId, InternalId>,
    on_create: Vec<Hook>,
    on_destroy: Vec<Hook>,
}

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    next_vended: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_vended: AtomicU64::new(1),
        }
    }

    pub fn on_create(&mut self, hook: Hook) {
        self.inner.get_mut().on_create.push(hook);
    }

    pub fn on_destroy(&mut self, hook: Hook) {
        self.inner.get_mut().on_destroy.push(hook);
    }

    /// Allocates a fresh internal id and the next monotonically
    /// increasing vended id, installs the bidirectional mapping, and
    /// invokes any registered on-create hooks.
    pub async fn create_session(&self) -> (InternalId, VendedId) {
        let internal_id = new_internal_id();
        let vended_id = self.next_vended.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().await;
        inner
            .vended_to_internal
            .insert(vended_id, internal_id.clone());
        let session = Session::new(internal_id.clone(), vended_id);
        for hook in &inner.on_create {
            hook(&session);
        }
        inner.sessions.insert(internal_id.clone(), session);
        (internal_id, vended_id)
    }

    /// Provisions a session for a vended id the caller observed but this
    /// registry has never allocated — the backend-socket counterpart to
    /// `create_session` (spec.md §3: "Sessions are created on first
    /// connection to a fresh URL or first batch carrying an unknown
    /// vended ID on the backend socket"). Bumps the vended-id allocator
    /// past `vended_id` so a later frontend-originated `create_session`
    /// never collides with it.
    pub async fn provision_session(&self, vended_id: VendedId) -> InternalId {
        let internal_id = new_internal_id();
        let mut inner = self.inner.write().await;
        inner
            .vended_to_internal
            .insert(vended_id, internal_id.clone());
        let session = Session::new(internal_id.clone(), vended_id);
        for hook in &inner.on_create {
            hook(&session);
        }
        inner.sessions.insert(internal_id.clone(), session);
        drop(inner);
        self.next_vended.fetch_max(vended_id + 1, Ordering::SeqCst);
        internal_id
    }

    pub async fn get_internal_id(&self, vended: VendedId) -> Option<InternalId> {
        self.inner.read().await.vended_to_internal.get(&vended).cloned()
    }

    pub async fn get_vended_id(&self, internal: &str) -> Option<VendedId> {
        self.inner
            .read()
            .await
            .sessions
            .get(internal)
            .map(|s| s.vended_id)
    }

    pub async fn exists(&self, internal: &str) -> bool {
        self.inner.read().await.sessions.contains_key(internal)
    }

    pub async fn touch_activity(&self, internal: &str) {
        if let Some(session) = self.inner.write().await.sessions.get_mut(internal) {
            session.touch();
        }
    }

    pub async fn register_url_path(&self, internal: &str, path: impl Into<String>, var_id: VarId) {
        if let Some(session) = self.inner.write().await.sessions.get_mut(internal) {
            session.url_routes.insert(path.into(), var_id);
        }
    }

    pub async fn resolve_url_path(&self, internal: &str, path: &str) -> Option<VarId> {
        self.inner
            .read()
            .await
            .sessions
            .get(internal)
            .and_then(|s| s.url_routes.get(path))
            .copied()
    }

    /// Adds a connection to a session's registry.
    pub async fn add_connection(&self, internal: &str, conn: ConnId) {
        if let Some(session) = self.inner.write().await.sessions.get_mut(internal) {
            session.connections.insert(conn);
        }
    }

    /// Removes a connection. Returns `true` when that was the last
    /// connection on the session (callers use this to drive
    /// unwatch-all on the bound backend).
    pub async fn remove_connection(&self, internal: &str, conn: ConnId) -> bool {
        if let Some(session) = self.inner.write().await.sessions.get_mut(internal) {
            session.connections.remove(&conn);
            return session.connections.is_empty();
        }
        false
    }

    /// Removes the session's mappings and runs on-destroy hooks. Returns
    /// `true` if a session existed.
    pub async fn destroy_session(&self, internal: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.remove(internal) else {
            return false;
        };
        inner.vended_to_internal.remove(&session.vended_id);
        for hook in &inner.on_destroy {
            hook(&session);
        }
        true
    }

    /// Destroys every session whose idle time exceeds `timeout`. A
    /// `timeout` of zero disables cleanup entirely.
    pub async fn cleanup_inactive_sessions(&self, timeout: Duration) -> Vec<InternalId> {
        if timeout.is_zero() {
            return Vec::new();
        }
        let expired: Vec<InternalId> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .values()
                .filter(|s| s.idle_for() >= timeout)
                .map(|s| s.internal_id.clone())
                .collect()
        };
        for id in &expired {
            self.destroy_session(id).await;
        }
        expired
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vended_ids_start_at_one_and_increment() {
        let registry = SessionRegistry::new();
        let (_, v1) = registry.create_session().await;
        let (_, v2) = registry.create_session().await;
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn mapping_is_bidirectional() {
        let registry = SessionRegistry::new();
        let (internal, vended) = registry.create_session().await;
        assert_eq!(registry.get_internal_id(vended).await, Some(internal.clone()));
        assert_eq!(registry.get_vended_id(&internal).await, Some(vended));
    }

    #[tokio::test]
    async fn destroy_removes_both_directions() {
        let registry = SessionRegistry::new();
        let (internal, vended) = registry.create_session().await;
        assert!(registry.destroy_session(&internal).await);
        assert_eq!(registry.get_internal_id(vended).await, None);
        assert!(!registry.exists(&internal).await);
    }

    #[tokio::test]
    async fn remove_connection_reports_last_departure() {
        let registry = SessionRegistry::new();
        let (internal, _) = registry.create_session().await;
        registry.add_connection(&internal, 1).await;
        registry.add_connection(&internal, 2).await;
        assert!(!registry.remove_connection(&internal, 1).await);
        assert!(registry.remove_connection(&internal, 2).await);
    }

    #[tokio::test]
    async fn zero_timeout_disables_cleanup() {
        let registry = SessionRegistry::new();
        registry.create_session().await;
        let expired = registry.cleanup_inactive_sessions(Duration::ZERO).await;
        assert!(expired.is_empty());
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn cleanup_destroys_sessions_past_timeout() {
        let registry = SessionRegistry::new();
        let (internal, _) = registry.create_session().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = registry
            .cleanup_inactive_sessions(Duration::from_millis(1))
            .await;
        assert_eq!(expired, vec![internal]);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn provision_session_installs_the_requested_vended_id() {
        let registry = SessionRegistry::new();
        let internal = registry.provision_session(7).await;
        assert_eq!(registry.get_internal_id(7).await, Some(internal.clone()));
        assert_eq!(registry.get_vended_id(&internal).await, Some(7));
    }

    #[tokio::test]
    async fn provision_session_avoids_colliding_with_later_allocations() {
        let registry = SessionRegistry::new();
        registry.provision_session(7).await;
        let (_, vended) = registry.create_session().await;
        assert_eq!(vended, 8, "allocator jumps past the provisioned id");
    }

    #[tokio::test]
    async fn url_path_routing() {
        let registry = SessionRegistry::new();
        let (internal, _) = registry.create_session().await;
        registry.register_url_path(&internal, "/contacts", 42).await;
        assert_eq!(registry.resolve_url_path(&internal, "/contacts").await, Some(42));
        assert_eq!(registry.resolve_url_path(&internal, "/missing").await, None);
    }
}
