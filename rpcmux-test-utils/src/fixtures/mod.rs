pub mod channel_session;
pub mod loopback;
pub mod worker;

pub use channel_session::ChannelSession;
pub use loopback::LoopbackClientFactory;
pub use worker::TestWorker;

use std::collections::HashMap;
use std::sync::Arc;

use rpcmux_node::{AuthInfo, RpcSession, SessionContext};

/// Build a session context carrying an explicit namespace in its auth info.
pub fn namespace_ctx(session: Option<Arc<dyn RpcSession>>, namespace: &str) -> SessionContext {
    let settings = HashMap::from([(
        "namespace".to_string(),
        serde_json::Value::String(namespace.to_string()),
    )]);
    SessionContext {
        session,
        auth_info: Some(AuthInfo { settings }),
    }
}
