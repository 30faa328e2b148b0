// Scripted worker
//
// Plays the role of a backend worker process: attaches to an App through a
// channel session, declares its methods over rpcz.declare, and answers
// forwarded requests from a handler closure. A handler returning None
// swallows the request, which is how the timeout suites model a stuck
// worker.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use rpcmux_jsonrpc::Message;
use rpcmux_node::{App, RpcSession, SessionContext};

use super::channel_session::ChannelSession;
use super::namespace_ctx;

pub type WorkerHandler = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

pub struct TestWorker {
    session: Arc<ChannelSession>,
    ctx: SessionContext,
    task: JoinHandle<()>,
}

impl TestWorker {
    /// Attach a worker to `app`, declare `methods` (untyped), and start
    /// answering requests with `handler`.
    pub async fn spawn<F>(
        app: Arc<App>,
        namespace: Option<&str>,
        methods: &[&str],
        handler: F,
    ) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let (session, mut rx) = ChannelSession::new();
        let ctx = match namespace {
            Some(ns) => namespace_ctx(Some(session.clone()), ns),
            None => SessionContext::with_session(session.clone()),
        };

        let mut catalog = serde_json::Map::new();
        for method in methods {
            catalog.insert(method.to_string(), Value::Null);
        }
        let declare = Message::request(1, "rpcz.declare", json!([catalog]));
        let reply = app
            .dispatch(&ctx, declare)
            .await
            .expect("declare returned no reply");
        assert!(reply.is_result(), "declare failed: {reply:?}");

        let handler: WorkerHandler = Arc::new(handler);
        let task_ctx = ctx.clone();
        let task_app = Arc::clone(&app);
        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Message::Request { id, method, params } = msg else {
                    continue;
                };
                let reply = if method == "_ping" {
                    Some(json!("pong"))
                } else {
                    handler(&method, &params)
                };
                if let Some(result) = reply {
                    let _ = task_app
                        .dispatch(&task_ctx, Message::result(id, result))
                        .await;
                }
            }
        });

        Self { session, ctx, task }
    }

    /// A worker that echoes its first string argument as "echo: <arg>".
    pub async fn spawn_echo(app: Arc<App>, namespace: Option<&str>) -> Self {
        Self::spawn(app, namespace, &["echo"], |_, params| {
            let text = params
                .as_array()
                .and_then(|args| args.first())
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(json!(format!("echo: {text}")))
        })
        .await
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn ctx(&self) -> &SessionContext {
        &self.ctx
    }

    /// Drop the connection the way a transport would: the session stops
    /// accepting sends and the close event reaches the App.
    pub async fn disconnect(&self, app: &App) {
        self.session.close();
        self.task.abort();
        app.handle_close(&self.ctx, self.session.session_id()).await;
    }
}
