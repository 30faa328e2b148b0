// Test fixtures shared by the rpcmux test suites.
//
// Everything here runs in-process and deterministically: sessions are
// channel-backed, workers are scripted tasks, peers are loopback clients
// dispatching straight into another App, and federation runs over a shared
// in-memory MQ broker.

pub mod fixtures;

use rpcmux_node::AppConfig;

/// An AppConfig with timeouts shrunk for fast test suites.
pub fn create_test_config() -> AppConfig {
    AppConfig::new()
        .with_request_timeout_ms(500)
        .with_status_interval_ms(100)
}
