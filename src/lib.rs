//! In-process test harness for the integration suites under
//! `tests/integration/`: spins up a full `ui-server` instance (HTTP
//! listener on an ephemeral port, backend Unix socket in a scratch
//! directory, in-memory storage) so each test can drive it with
//! `ui-test-utils`'s `MockWsClient`/`MockBackendConn` without shelling
//! out to a built binary.

use std::sync::Arc;
use std::time::Duration;

use uiconfig::Config;
use uisession::VendedId;
use uistorage::{MemoryStore, Store};

/// Keeps the scratch directory alive for as long as the server runs —
/// it (and the socket file inside it) is removed once this drops.
pub struct TestServer {
    pub handle: ui_server::ServerHandle,
    _scratch: tempfile::TempDir,
}

impl TestServer {
    /// `ws://` URL for this instance's frontend WebSocket endpoint.
    pub fn ws_url(&self, vended_id: VendedId) -> String {
        format!("ws://{}/ws/{vended_id}", self.handle.http_addr)
    }

    /// `http://` base URL for the HTTP surface (root, poll, site).
    pub fn http_url(&self) -> String {
        format!("http://{}", self.handle.http_addr)
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.handle.state.config.socket_path
    }

    /// Vends a fresh session directly against the shared state, the
    /// same work `GET /` does, without a round trip through HTTP.
    pub async fn create_session(&self) -> VendedId {
        self.handle.state.create_session().await
    }

    pub fn shutdown(self) {
        self.handle.shutdown();
    }
}

/// Starts a full instance with a short session timeout and debounce so
/// reaper/watch-tallying tests don't have to wait out the production
/// defaults (30 minutes, 10ms is already short but every millisecond
/// counts against a test suite's wall clock).
pub async fn start_test_server() -> TestServer {
    start_test_server_with(Config {
        session_timeout: Some(Duration::from_millis(200)),
        connection_grace_period: Some(Duration::from_millis(100)),
        batch_debounce: Duration::from_millis(5),
        ..Default::default()
    })
    .await
}

/// Starts a full instance with a caller-supplied config, except for
/// `host`/`port`/`socket_path`, which are always pinned to ephemeral
/// values so concurrently-running tests never collide.
pub async fn start_test_server_with(mut config: Config) -> TestServer {
    let scratch = tempfile::tempdir().expect("failed to create scratch dir for test server");
    config.host = "127.0.0.1".to_owned();
    config.port = 0;
    config.socket_path = scratch.path().join("backend.sock");

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let handle = ui_server::spawn(config, store)
        .await
        .expect("failed to start in-process ui-server for tests");

    TestServer {
        handle,
        _scratch: scratch,
    }
}
