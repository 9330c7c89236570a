//! Shared application state: the session registry, per-session
//! dispatcher handles, and the config/storage the whole router needs —
//! the equivalent of the teacher's `AppState` (`state.rs`), minus the
//! fields this system doesn't have (no Postgres pool at this layer; the
//! storage backend is behind `uistorage::Store`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use uiconfig::Config;
use uiproto::Message;
use uisession::{ConnId, SessionRegistry, VendedId};
use uistorage::Store;

use crate::session::SessionHandle;

/// One registered backend connection (a proxied forwarder connected on
/// the backend socket) per session that has one bound.
pub struct BackendLink {
    pub out: mpsc::UnboundedSender<(VendedId, Message)>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub dispatchers: Arc<RwLock<HashMap<VendedId, SessionHandle>>>,
    pub backends: Arc<RwLock<HashMap<VendedId, BackendLink>>>,
    pub store: Arc<dyn Store>,
    next_conn_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            dispatchers: Arc::new(RwLock::new(HashMap::new())),
            backends: Arc::new(RwLock::new(HashMap::new())),
            store,
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Creates a fresh session, spawns its dispatcher, and registers it.
    /// Returns the vended id a client sees.
    pub async fn create_session(&self) -> VendedId {
        let (internal_id, vended_id) = self.sessions.create_session().await;
        let backend_out = self.backends.read().await.get(&vended_id).map(|b| b.out.clone());
        let handle = crate::session::spawn(backend_out, vended_id, self.store.clone(), internal_id.clone());
        self.dispatchers.write().await.insert(vended_id, handle);
        info!(%internal_id, vended_id, "session created");
        vended_id
    }

    pub async fn dispatcher(&self, vended_id: VendedId) -> Option<SessionHandle> {
        self.dispatchers.read().await.get(&vended_id).cloned()
    }

    /// Provisions a session for a vended id first seen on the backend
    /// socket rather than vended by the frontend HTTP surface (spec.md
    /// §3: a batch carrying an unknown vended id implicitly provisions a
    /// new backend session). No-op if a dispatcher is already registered
    /// for this id, so a race between two frames on the same
    /// newly-provisioned connection can't spawn two dispatchers.
    pub async fn provision_session(&self, vended_id: VendedId) {
        if self.dispatchers.read().await.contains_key(&vended_id) {
            return;
        }
        let internal_id = self.sessions.provision_session(vended_id).await;
        let handle = crate::session::spawn(None, vended_id, self.store.clone(), internal_id.clone());
        self.dispatchers.write().await.insert(vended_id, handle);
        info!(%internal_id, vended_id, "session provisioned from backend socket");
    }

    /// Tears down a session's dispatcher registration (the dispatcher
    /// task itself exits once its channel sender is dropped, same as
    /// `uibatch`'s debounce task exits when its last `Batcher` clone
    /// drops).
    pub async fn destroy_session(&self, vended_id: VendedId) {
        self.dispatchers.write().await.remove(&vended_id);
        self.backends.write().await.remove(&vended_id);
        if let Some(internal_id) = self.sessions.get_internal_id(vended_id).await {
            self.sessions.destroy_session(&internal_id).await;
        }
    }
}

/// Spawns the periodic inactive-session sweep, mirroring the teacher's
/// graceful-shutdown signal future in shape (a long-lived future racing
/// against a ticker) but run continuously for the lifetime of the
/// process rather than once at shutdown.
pub fn spawn_session_reaper(state: AppState) {
    let Some(timeout) = state.config.session_timeout else {
        info!("session timeout disabled (0); reaper not started");
        return;
    };
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(timeout.min(std::time::Duration::from_secs(60)));
        loop {
            interval.tick().await;
            // Snapshot which vended ids are currently dispatched, run the
            // sweep, then drop any whose session no longer resolves —
            // `cleanup_inactive_sessions` only hands back internal ids,
            // and by the time it returns the vended mapping for a
            // destroyed session is already gone, so diffing against the
            // snapshot is simpler than threading vended ids through it.
            let before: Vec<VendedId> = state.dispatchers.read().await.keys().copied().collect();
            state.sessions.cleanup_inactive_sessions(timeout).await;
            for vended_id in before {
                if state.sessions.get_internal_id(vended_id).await.is_none() {
                    state.dispatchers.write().await.remove(&vended_id);
                    state.backends.write().await.remove(&vended_id);
                }
            }
        }
    });
}
