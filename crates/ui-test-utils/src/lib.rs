//! ui-test-utils: shared test utilities for the UI server's integration
//! test suite.
//!
//! Provides a mock frontend WebSocket client, a mock backend socket
//! connection, and fixture builders for the message shapes tests
//! construct repeatedly.

pub mod fixtures;
pub mod mock_backend;
pub mod mock_ws_client;

pub use mock_backend::MockBackendConn;
pub use mock_ws_client::MockWsClient;
