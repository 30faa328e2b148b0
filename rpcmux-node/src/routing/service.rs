// Local service
//
// INTENTION: Represent one attached worker: its transport session and the
// method catalog it declared. The catalog is replaced wholesale by the
// router (never mutated in place), and the router keeps the method index in
// lockstep under its own writer lock. Services hold no reference back to
// their router; the router owns them and passes itself by plain reference
// where needed.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use rpcmux_jsonrpc::{ErrorKind, Message};

use crate::session::{RpcSession, SessionSendError};

pub struct Service {
    session_id: String,
    // dropped on dismissal; send fails afterwards
    session: RwLock<Option<std::sync::Arc<dyn RpcSession>>>,
    // method name -> declared schema (None = declared untyped)
    methods: RwLock<HashMap<String, Option<Value>>>,
}

impl Service {
    pub fn new(session: std::sync::Arc<dyn RpcSession>) -> Self {
        Self {
            session_id: session.session_id().to_string(),
            session: RwLock::new(Some(session)),
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward a message to the worker. Correlation-id bookkeeping is the
    /// router's job and must happen before this call.
    pub fn send(&self, msg: Message) -> Result<(), ErrorKind> {
        let session = self.session.read().unwrap();
        match session.as_ref() {
            Some(session) => session.send(msg).map_err(|e| match e {
                SessionSendError::Closed => ErrorKind::SendError("session closed".into()),
                SessionSendError::BufferFull => {
                    ErrorKind::SendError("session buffer full".into())
                }
            }),
            None => Err(ErrorKind::SendError("service dismissed".into())),
        }
    }

    /// The declared schema for a method, if any.
    pub fn schema(&self, method: &str) -> Option<Value> {
        self.methods.read().unwrap().get(method).cloned().flatten()
    }

    pub fn serves(&self, method: &str) -> bool {
        self.methods.read().unwrap().contains_key(method)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.read().unwrap().keys().cloned().collect()
    }

    /// Replace the catalog. Called by the router inside its index writer
    /// lock so the catalog and the method index change together.
    pub(crate) fn set_methods(&self, new_methods: HashMap<String, Option<Value>>) {
        *self.methods.write().unwrap() = new_methods;
    }

    /// Idempotent. The router detaches the catalog before calling this.
    pub fn dismiss(&self) {
        self.session.write().unwrap().take();
    }
}
