// Session abstraction
//
// INTENTION: Decouple the routing core from the HTTP/WebSocket transport.
// The transport owns connection lifecycles; the core only needs a stable id,
// a non-blocking send, and a close notification (delivered by the transport
// through `App::handle_close`).

use rpcmux_jsonrpc::Message;
use thiserror::Error;

/// Errors a session can report on send. Both are terminal for the message
/// being sent; neither closes the session from the core's side.
#[derive(Debug, Error)]
pub enum SessionSendError {
    #[error("session closed")]
    Closed,
    #[error("session send buffer full")]
    BufferFull,
}

/// An inbound connection handle.
///
/// `send` must not block beyond the transport's internal buffer and must
/// fail once the connection is gone. Implementations are cheap to clone
/// behind an `Arc` and shared between the router and the MQ actor.
pub trait RpcSession: Send + Sync {
    /// Stable identifier for the connection, unique within the process.
    fn session_id(&self) -> &str;

    /// Queue a message for delivery to the connected peer.
    fn send(&self, msg: Message) -> Result<(), SessionSendError>;
}
