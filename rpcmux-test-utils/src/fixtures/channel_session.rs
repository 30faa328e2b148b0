// Channel-backed session
//
// Stands in for a streaming transport connection: messages sent by the mux
// land on an unbounded channel the test (or a scripted worker) reads from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use rpcmux_jsonrpc::Message;
use rpcmux_node::{RpcSession, SessionSendError};

pub struct ChannelSession {
    id: String,
    tx: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
}

impl ChannelSession {
    /// A fresh session plus the receiving half of its outbound stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: format!("session-{}", &Uuid::new_v4().to_string()[..8]),
            tx,
            closed: AtomicBool::new(false),
        });
        (session, rx)
    }

    /// Mark the connection gone; subsequent sends fail. The transport's
    /// close callback (`App::handle_close`) is still the test's job.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl RpcSession for ChannelSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn send(&self, msg: Message) -> Result<(), SessionSendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionSendError::Closed);
        }
        self.tx.send(msg).map_err(|_| SessionSendError::Closed)
    }
}
