// MQ Actor
//
// INTENTION: Expose the message queue to clients as JSON-RPC methods
// (mq.add / mq.get / mq.tail / mq.sub), each operating on the caller's
// namespace as its section. Subscriptions are per-session: items flow back
// on the subscribing session as `rpcmux.item` notifies, and the session
// close cancels exactly that subscription.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use rpcmux_common::{log_debug, log_error, log_info, log_warn, Component, Logger};
use rpcmux_jsonrpc::{Message, RpcError};

use crate::mq::{MqClient, MqItem};
use crate::session::{RpcSession, SessionSendError};

/// Largest page a single mq.get / mq.tail may request.
const MAX_GET_COUNT: u64 = 1000;

struct Subscription {
    sub_id: String,
    tasks: Vec<JoinHandle<()>>,
}

/// JSON-RPC facade over the MQ client.
pub struct MqActor {
    mq_client: Arc<dyn MqClient>,
    // session id -> active subscription (at most one per session)
    subscriptions: DashMap<String, Subscription>,
    logger: Logger,
}

impl MqActor {
    pub fn new(mq_client: Arc<dyn MqClient>, logger: &Logger) -> Self {
        Self {
            mq_client,
            subscriptions: DashMap::new(),
            logger: logger.with_component(Component::Mq),
        }
    }

    /// Whether this actor serves the given method name.
    pub fn handles(&self, method: &str) -> bool {
        matches!(method, "mq.add" | "mq.get" | "mq.tail" | "mq.sub")
    }

    /// Self-description of the mq.* surface, consulted by the rpcz.schema
    /// lookup before worker catalogs.
    pub fn schema(&self, method: &str) -> Option<Value> {
        match method {
            "mq.add" => Some(json!({
                "type": "method",
                "description": "publish a notify to the namespace stream",
                "params": [{"name": "notifymethod", "type": "string"}],
                "additionalParams": {"type": "any"},
            })),
            "mq.get" => Some(json!({
                "type": "method",
                "description": "read items after an offset; an empty prevID probes the stream end",
                "params": [
                    {"name": "prevID", "type": "string"},
                    {"name": "count", "type": "integer", "minimum": 1, "maximum": MAX_GET_COUNT},
                ],
            })),
            "mq.tail" => Some(json!({
                "type": "method",
                "description": "read the most recent items of the namespace stream",
                "params": [{"name": "count", "type": "integer", "minimum": 1}],
            })),
            "mq.sub" => Some(json!({
                "type": "method",
                "description": "follow the namespace stream on this session, filtered by the given method names",
                "params": [],
                "additionalParams": {"name": "followedMethod", "type": "string"},
            })),
            _ => None,
        }
    }

    /// Dispatch one mq.* request. Notifies are dropped (these methods all
    /// produce results). Returns the reply message for requests.
    pub async fn handle(
        &self,
        namespace: &str,
        session: Option<&Arc<dyn RpcSession>>,
        msg: &Message,
    ) -> Option<Message> {
        let Message::Request { id, method, params } = msg else {
            return None;
        };
        let reply = match method.as_str() {
            "mq.add" => self.handle_add(namespace, params).await,
            "mq.get" => self.handle_get(namespace, params).await,
            "mq.tail" => self.handle_tail(namespace, params).await,
            "mq.sub" => self.handle_sub(namespace, session, params),
            _ => Err(RpcError::method_not_found()),
        };
        Some(match reply {
            Ok(result) => Message::result(id.clone(), result),
            Err(error) => Message::error(id.clone(), error),
        })
    }

    async fn handle_add(&self, namespace: &str, params: &Value) -> Result<Value, RpcError> {
        let args = params
            .as_array()
            .ok_or_else(|| RpcError::params_error("params must be an array"))?;
        let Some(first) = args.first() else {
            return Err(RpcError::params_error("notify method not provided"));
        };
        let method = first
            .as_str()
            .ok_or_else(|| RpcError::params_error("method is not string"))?;

        let ntf = Message::notify(method, Value::Array(args[1..].to_vec()));
        let offset = self
            .mq_client
            .add(namespace, &ntf)
            .await
            .map_err(|e| RpcError::transport_error(e.to_string()))?;
        Ok(Value::String(offset))
    }

    async fn handle_get(&self, namespace: &str, params: &Value) -> Result<Value, RpcError> {
        let args = params
            .as_array()
            .ok_or_else(|| RpcError::params_error("params must be an array"))?;
        let prev_offset = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::params_error("prevID must be a string"))?;
        let count = parse_count(args.get(1))?;

        let chunk = self
            .mq_client
            .chunk(namespace, prev_offset, count as usize)
            .await
            .map_err(|e| RpcError::transport_error(e.to_string()))?;
        chunk
            .to_map()
            .map_err(|e| RpcError::internal(e.to_string()))
    }

    async fn handle_tail(&self, namespace: &str, params: &Value) -> Result<Value, RpcError> {
        let args = params
            .as_array()
            .ok_or_else(|| RpcError::params_error("params must be an array"))?;
        let count = parse_count(args.first())?;

        let chunk = self
            .mq_client
            .tail(namespace, count as usize)
            .await
            .map_err(|e| RpcError::transport_error(e.to_string()))?;
        chunk
            .to_map()
            .map_err(|e| RpcError::internal(e.to_string()))
    }

    fn handle_sub(
        &self,
        namespace: &str,
        session: Option<&Arc<dyn RpcSession>>,
        params: &Value,
    ) -> Result<Value, RpcError> {
        // subscriptions only make sense on a streaming session
        let Some(session) = session else {
            return Err(RpcError::method_not_found());
        };
        let session_id = session.session_id().to_string();
        if self.subscriptions.contains_key(&session_id) {
            log_warn!(self.logger, "mq.sub already called on session {session_id}");
            return Err(RpcError::method_not_found());
        }

        let mut followed: Vec<String> = Vec::new();
        if let Some(args) = params.as_array() {
            for arg in args {
                let method = arg
                    .as_str()
                    .ok_or_else(|| RpcError::params_error("followed method is not string"))?;
                followed.push(method.to_string());
            }
        }

        let sub_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel::<MqItem>(100);

        let mq_client = Arc::clone(&self.mq_client);
        let section = namespace.to_string();
        let sub_logger = self.logger.with_namespace(namespace);
        let poll_task = tokio::spawn(async move {
            if let Err(e) = mq_client.subscribe(&section, tx).await {
                log_error!(sub_logger, "subscribe error {e}");
            }
        });

        let deliver_task = tokio::spawn(deliver_items(
            rx,
            Arc::clone(session),
            sub_id.clone(),
            followed,
            self.logger.with_namespace(namespace),
        ));

        log_info!(self.logger, "subscription {sub_id} created");
        self.subscriptions.insert(
            session_id,
            Subscription {
                sub_id: sub_id.clone(),
                tasks: vec![poll_task, deliver_task],
            },
        );
        Ok(Value::String(sub_id))
    }

    /// Cancel every active subscription. Called on App shutdown.
    pub fn shutdown(&self) {
        let sessions: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in sessions {
            self.handle_close(&session_id);
        }
    }

    /// Cancel the subscription held by a closing session. Returns true when
    /// a subscription existed.
    pub fn handle_close(&self, session_id: &str) -> bool {
        if let Some((_, sub)) = self.subscriptions.remove(session_id) {
            log_info!(self.logger, "cancel subscription {}", sub.sub_id);
            for task in sub.tasks {
                task.abort();
            }
            true
        } else {
            false
        }
    }
}

fn parse_count(arg: Option<&Value>) -> Result<u64, RpcError> {
    let count = arg
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::params_error("count must be a positive integer"))?;
    if count == 0 || count > MAX_GET_COUNT {
        return Err(RpcError::params_error("count out of range"));
    }
    Ok(count)
}

/// Forward matching items to the subscribing session as rpcmux.item
/// notifies.
async fn deliver_items(
    mut rx: mpsc::Receiver<MqItem>,
    session: Arc<dyn RpcSession>,
    sub_id: String,
    followed: Vec<String>,
    logger: Logger,
) {
    while let Some(item) = rx.recv().await {
        if !followed.is_empty() && !followed.iter().any(|m| m == &item.brief) {
            continue;
        }
        let ntf = match item.notify() {
            Ok(ntf) => ntf,
            Err(e) => {
                log_error!(logger, "bad item at offset {}: {e}", item.offset);
                continue;
            }
        };
        let delivery = Message::notify(
            "rpcmux.item",
            json!({
                "subscription": sub_id,
                "offset": item.offset,
                "msg": ntf.to_value(),
            }),
        );
        match session.send(delivery) {
            Ok(()) => {}
            Err(SessionSendError::Closed) => {
                log_debug!(logger, "session gone, ending delivery for {sub_id}");
                return;
            }
            Err(SessionSendError::BufferFull) => {
                log_warn!(logger, "session buffer full, dropping item for {sub_id}");
            }
        }
    }
}
