// App glue
//
// INTENTION: Own the namespace -> Router map and front the routing core for
// the transport layer. The transport parses JSON-RPC frames, attaches the
// session and auth info, and calls `dispatch`; the App serves the built-in
// methods (rpcz.declare / rpcz.schema / rpc.methods), delegates mq.* to the
// MQ actor, and passes everything else to the namespace router. The App is
// an explicit value, not a global, so several muxes can coexist in one
// process.

use anyhow::Result;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use rpcmux_common::{log_debug, Component, Logger};
use rpcmux_jsonrpc::{Message, MsgId, RpcError};

use crate::client::PeerClientFactory;
use crate::config::AppConfig;
use crate::mq::{self, MqActor, MqClient};
use crate::routing::Router;
use crate::session::RpcSession;

/// Namespace used when the session's auth info does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Auth data attached to a session by the transport's auth layer.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub settings: HashMap<String, Value>,
}

/// Per-request context the transport hands to `dispatch`.
///
/// `session` is present for streaming transports (websocket, h2) and absent
/// for plain request/response HTTP; session-bound operations require it.
#[derive(Clone, Default)]
pub struct SessionContext {
    pub session: Option<Arc<dyn RpcSession>>,
    pub auth_info: Option<AuthInfo>,
}

impl SessionContext {
    pub fn with_session(session: Arc<dyn RpcSession>) -> Self {
        Self {
            session: Some(session),
            auth_info: None,
        }
    }

    pub fn with_auth_info(mut self, auth_info: AuthInfo) -> Self {
        self.auth_info = Some(auth_info);
        self
    }

    /// The tenancy partition for this request.
    pub fn namespace(&self) -> &str {
        self.auth_info
            .as_ref()
            .and_then(|auth| auth.settings.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// One mux instance.
pub struct App {
    config: AppConfig,
    routers: DashMap<String, Arc<Router>>,
    mq_client: Option<Arc<dyn MqClient>>,
    mq_actor: Option<MqActor>,
    client_factory: Option<Arc<dyn PeerClientFactory>>,
    shutdown_tx: watch::Sender<bool>,
    logger: Logger,
}

impl App {
    /// Build an App from its config. Connects the MQ client when `mq.url`
    /// is set; use `with_mq_client` to share a broker between instances.
    pub fn new(config: AppConfig) -> Result<Self> {
        if let Some(logging) = &config.logging {
            logging.apply();
        }
        let mux_id = if config.server.advertise_url.is_empty() {
            format!("mux-{}", &Uuid::new_v4().to_string()[..8])
        } else {
            config.server.advertise_url.clone()
        };
        let logger = Logger::new_root(Component::App, &mux_id);

        let mq_client = if config.mq.is_empty() {
            None
        } else {
            Some(mq::memory::connect(&config.mq.url)?)
        };
        let mq_actor = mq_client
            .as_ref()
            .map(|client| MqActor::new(Arc::clone(client), &logger));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            routers: DashMap::new(),
            mq_client,
            mq_actor,
            client_factory: None,
            shutdown_tx,
            logger,
        })
    }

    /// Replace the MQ client (and its actor). Call before creating routers.
    pub fn with_mq_client(mut self, client: Arc<dyn MqClient>) -> Self {
        self.mq_actor = Some(MqActor::new(Arc::clone(&client), &self.logger));
        self.mq_client = Some(client);
        self
    }

    /// Install the outbound peer client factory. Call before creating
    /// routers.
    pub fn with_client_factory(mut self, factory: Arc<dyn PeerClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The namespace's router, created and started on first use.
    pub fn get_router(&self, namespace: &str) -> Arc<Router> {
        let router = match self.routers.entry(namespace.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let router = Router::new(
                    namespace,
                    &self.config,
                    self.mq_client.clone(),
                    self.client_factory.clone(),
                    &self.logger,
                );
                entry.insert(Arc::clone(&router));
                router
            }
        };
        router.start(self.shutdown_tx.subscribe());
        router
    }

    /// Entry point for every inbound message. Requests yield a reply
    /// message; notifies and worker replies yield none.
    pub async fn dispatch(&self, ctx: &SessionContext, msg: Message) -> Option<Message> {
        match &msg {
            Message::Request { id, method, params } => match method.as_str() {
                "rpcz.declare" => {
                    let reply = self.handle_declare(ctx, params).await;
                    Some(build_reply(id, reply))
                }
                "rpcz.schema" => {
                    let reply = self.handle_schema(ctx, params).await;
                    Some(build_reply(id, reply))
                }
                "rpc.methods" => {
                    let reply = self.handle_methods(ctx).await;
                    Some(build_reply(id, reply))
                }
                method if method.starts_with("mq.") => match &self.mq_actor {
                    Some(actor) if actor.handles(method) => {
                        actor
                            .handle(ctx.namespace(), ctx.session.as_ref(), &msg)
                            .await
                    }
                    // no MQ configured (or unknown mq.*): the router answers
                    _ => self.get_router(ctx.namespace()).feed(msg).await,
                },
                _ => self.get_router(ctx.namespace()).feed(msg).await,
            },
            Message::Notify { method, .. } => {
                if is_builtin(method) {
                    // built-ins are request/response; a notify has no reply
                    log_debug!(self.logger, "notify to built-in {method} dropped");
                    return None;
                }
                self.get_router(ctx.namespace()).feed(msg).await
            }
            // worker results and errors flow back through the router
            _ => self.get_router(ctx.namespace()).feed(msg).await,
        }
    }

    /// Transport callback for a closed session: detach its service, or
    /// failing that, cancel its MQ subscription.
    pub async fn handle_close(&self, ctx: &SessionContext, session_id: &str) {
        let router = self.get_router(ctx.namespace());
        if !router.dismiss_service(session_id).await {
            if let Some(actor) = &self.mq_actor {
                actor.handle_close(session_id);
            }
        }
    }

    /// Signal shutdown: every router publishes its tombstone status and
    /// stops, and active MQ subscriptions are cancelled.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(actor) = &self.mq_actor {
            actor.shutdown();
        }
    }

    async fn handle_declare(
        &self,
        ctx: &SessionContext,
        params: &Value,
    ) -> Result<Value, RpcError> {
        // only callable via stream requests
        let Some(session) = ctx.session.as_ref() else {
            return Err(RpcError::method_not_found());
        };

        let declared = match params {
            Value::Array(args) => args.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        let entries = match declared {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            _ => return Err(RpcError::params_error("methods must be an object")),
        };

        let mut catalog: HashMap<String, Option<Value>> = HashMap::new();
        for (name, schema) in entries {
            match schema {
                Value::Null => {
                    catalog.insert(name, None);
                }
                Value::Object(_) => {
                    catalog.insert(name, Some(schema));
                }
                _ => {
                    return Err(RpcError::params_error(format!(
                        "schema of {name} build failed"
                    )))
                }
            }
        }

        let router = self.get_router(ctx.namespace());
        let (service, created) = router.get_or_create_service(Arc::clone(session));
        if created {
            log_debug!(
                self.logger,
                "service attached for session {}",
                session.session_id()
            );
        }
        router.update_service_methods(&service, catalog).await;
        Ok(json!("ok"))
    }

    async fn handle_schema(
        &self,
        ctx: &SessionContext,
        params: &Value,
    ) -> Result<Value, RpcError> {
        let method = params
            .as_array()
            .and_then(|args| args.first())
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::params_error("method must be a string"))?;

        // built-ins describe themselves; worker catalogs come after
        if let Some(schema) = builtin_schema(method) {
            return Ok(schema);
        }
        if let Some(actor) = &self.mq_actor {
            if let Some(schema) = actor.schema(method) {
                return Ok(schema);
            }
        }

        let router = self.get_router(ctx.namespace());
        if let Some(service) = router.select_service(method).await {
            if let Some(schema) = service.schema(method) {
                return Ok(schema);
            }
        }
        Err(RpcError::params_error("no schema"))
    }

    async fn handle_methods(&self, ctx: &SessionContext) -> Result<Value, RpcError> {
        let router = self.get_router(ctx.namespace());
        Ok(json!({
            "methods": router.serving_methods().await,
            "remotes": router.remote_methods().await,
        }))
    }
}

fn is_builtin(method: &str) -> bool {
    matches!(
        method,
        "rpcz.declare" | "rpcz.schema" | "rpc.methods" | "mq.add" | "mq.get" | "mq.tail" | "mq.sub"
    )
}

/// Self-description of the methods the App serves directly. The mq.*
/// surface describes itself on the MqActor; declared worker methods carry
/// whatever schema the worker sent.
fn builtin_schema(method: &str) -> Option<Value> {
    match method {
        "rpcz.declare" => Some(json!({
            "type": "method",
            "description": "declare the methods this session serves, keyed by name; stream sessions only",
            "params": [{"anyOf": [{"type": "object"}, {"type": "null"}]}],
        })),
        "rpcz.schema" => Some(json!({
            "type": "method",
            "description": "look up the schema of a served method",
            "params": [{"name": "method", "type": "string"}],
        })),
        "rpc.methods" => Some(json!({
            "type": "method",
            "description": "list the methods served locally and by peers",
            "params": [],
        })),
        _ => None,
    }
}

fn build_reply(id: &MsgId, outcome: Result<Value, RpcError>) -> Message {
    match outcome {
        Ok(result) => Message::result(id.clone(), result),
        Err(error) => Message::error(id.clone(), error),
    }
}
