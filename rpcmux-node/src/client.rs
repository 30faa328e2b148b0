// Outbound peer client seam
//
// INTENTION: Keep the core independent of any particular HTTP stack. A
// RemoteService needs one capability: issue a JSON-RPC call against a peer's
// advertise URL and get the reply message back. Deployments plug in a real
// HTTP client factory; tests plug in loopback factories that dispatch
// straight into another in-process App.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use rpcmux_jsonrpc::Message;

/// A connected outbound JSON-RPC client.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Issue a request and wait for the matching reply.
    async fn call(&self, msg: Message) -> Result<Message>;
}

/// Creates clients for peer advertise URLs. Called lazily, on the first
/// forward to a given peer; the resulting client is cached by the
/// RemoteService.
#[async_trait]
pub trait PeerClientFactory: Send + Sync {
    async fn connect(&self, advertise_url: &str) -> Result<Arc<dyn PeerClient>>;
}
