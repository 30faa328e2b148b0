// End-to-end tests for the routing core
//
// These drive the App the way a transport would: messages go in through
// dispatch with a session context, workers are scripted tasks on channel
// sessions, and replies come back as messages.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use rpcmux_jsonrpc::error::{CODE_INVALID_PARAMS, CODE_METHOD_NOT_FOUND, CODE_TIMEOUT};
use rpcmux_jsonrpc::{Message, MsgId};
use rpcmux_node::{App, SessionContext};
use rpcmux_test_utils::create_test_config;
use rpcmux_test_utils::fixtures::{ChannelSession, TestWorker};

fn client_ctx() -> SessionContext {
    SessionContext::default()
}

/// INTENTION: the basic echo path. A worker declares "echo", a client calls
/// it, the worker sees a minted correlation id (never the client's id), and
/// the client gets the reply under its own id.
#[tokio::test]
async fn test_basic_echo() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());
        let _worker = TestWorker::spawn_echo(Arc::clone(&app), None).await;

        let req = Message::request(1, "echo", json!(["hi"]));
        let reply = app.dispatch(&client_ctx(), req).await.unwrap();
        match reply {
            Message::Result { id, result } => {
                assert_eq!(id, MsgId::Num(1));
                assert_eq!(result, json!("echo: hi"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// The worker must never observe the caller's id; forwarding mints a fresh
/// correlation id per request.
#[tokio::test]
async fn test_worker_sees_minted_id() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());

        let (session, mut rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session.clone());
        let declare = Message::request(1, "rpcz.declare", json!([{"echo": null}]));
        let reply = app.dispatch(&ctx, declare).await.unwrap();
        assert!(reply.is_result());

        let call_app = Arc::clone(&app);
        let caller = tokio::spawn(async move {
            call_app
                .dispatch(&SessionContext::default(), Message::request(1, "echo", json!(["hi"])))
                .await
        });

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.method(), Some("echo"));
        let cid = forwarded.id().unwrap().clone();
        assert_ne!(cid, MsgId::Num(1));

        let fed = app
            .dispatch(&ctx, Message::result(cid, json!("echo: hi")))
            .await;
        assert!(fed.is_none());
        let reply = caller.await.unwrap().unwrap();
        assert_eq!(reply.id(), Some(&MsgId::Num(1)));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_method_not_found() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();
        let req = Message::request(1, "nope", json!([]));
        let reply = app.dispatch(&client_ctx(), req).await.unwrap();
        match reply {
            Message::Error { id, error } => {
                assert_eq!(id, MsgId::Num(1));
                assert_eq!(error.code, CODE_METHOD_NOT_FOUND);
            }
            other => panic!("expected error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// INTENTION: a worker that declares a method but never answers must not
/// hang the caller; the pending expires and the caller gets a timeout error
/// under its original id.
#[tokio::test]
async fn test_worker_timeout() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());
        let _worker = TestWorker::spawn(Arc::clone(&app), None, &["slow"], |_, _| None).await;

        let started = std::time::Instant::now();
        let req = Message::request(1, "slow", json!([]));
        let reply = app.dispatch(&client_ctx(), req).await.unwrap();
        match reply {
            Message::Error { id, error } => {
                assert_eq!(id, MsgId::Num(1));
                assert_eq!(error.code, CODE_TIMEOUT);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // the test config shrinks the 10s default to 500ms
        assert!(started.elapsed() >= Duration::from_millis(450));
        assert!(started.elapsed() < Duration::from_secs(5));
    })
    .await
    .expect("test timed out");
}

/// INTENTION: a worker dropping its connection mid-call completes the
/// pending immediately through the dismissal sweep; the caller does not
/// wait out the full timeout.
#[tokio::test]
async fn test_worker_disconnect_mid_call() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());
        let worker = TestWorker::spawn(Arc::clone(&app), None, &["slow"], |_, _| None).await;

        let call_app = Arc::clone(&app);
        let caller = tokio::spawn(async move {
            call_app
                .dispatch(&SessionContext::default(), Message::request(1, "slow", json!([])))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        worker.disconnect(&app).await;

        let reply = timeout(Duration::from_millis(300), caller)
            .await
            .expect("caller still blocked after disconnect")
            .unwrap()
            .unwrap();
        match reply {
            Message::Error { id, error } => {
                assert_eq!(id, MsgId::Num(1));
                assert_eq!(error.code, CODE_TIMEOUT);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// Two workers declaring the same method split the traffic.
#[tokio::test]
async fn test_round_robin_between_workers() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());
        let _a = TestWorker::spawn(Arc::clone(&app), None, &["who"], |_, _| Some(json!("a"))).await;
        let _b = TestWorker::spawn(Arc::clone(&app), None, &["who"], |_, _| Some(json!("b"))).await;

        let mut hits_a = 0;
        let mut hits_b = 0;
        for i in 0..6 {
            let reply = app
                .dispatch(&client_ctx(), Message::request(i, "who", json!([])))
                .await
                .unwrap();
            match reply {
                Message::Result { result, .. } if result == json!("a") => hits_a += 1,
                Message::Result { result, .. } if result == json!("b") => hits_b += 1,
                other => panic!("unexpected reply {other:?}"),
            }
        }
        assert_eq!(hits_a, 3);
        assert_eq!(hits_b, 3);
    })
    .await
    .expect("test timed out");
}

/// Notifies go to a declaring worker verbatim and produce no reply.
#[tokio::test]
async fn test_notify_is_forwarded_without_reply() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());

        let (session, mut rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session);
        let declare = Message::request(1, "rpcz.declare", json!([{"evt": null}]));
        app.dispatch(&ctx, declare).await.unwrap();

        let reply = app
            .dispatch(&client_ctx(), Message::notify("evt", json!([42])))
            .await;
        assert!(reply.is_none());

        let delivered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notify was not delivered")
            .unwrap();
        assert_eq!(delivered, Message::notify("evt", json!([42])));

        // an unserved notify is dropped silently
        let reply = app
            .dispatch(&client_ctx(), Message::notify("unknown", json!([])))
            .await;
        assert!(reply.is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_declare_requires_session() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();
        let declare = Message::request(1, "rpcz.declare", json!([{"echo": null}]));
        let reply = app.dispatch(&client_ctx(), declare).await.unwrap();
        match reply {
            Message::Error { error, .. } => assert_eq!(error.code, CODE_METHOD_NOT_FOUND),
            other => panic!("expected error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_declare_rejects_bad_schema() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();
        let (session, _rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session);

        let declare = Message::request(1, "rpcz.declare", json!([{"echo": 5}]));
        let reply = app.dispatch(&ctx, declare).await.unwrap();
        match reply {
            Message::Error { error, .. } => {
                assert_eq!(error.code, CODE_INVALID_PARAMS);
                assert!(error.message.contains("echo"));
            }
            other => panic!("expected params error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// Redeclaring replaces the catalog wholesale; rpc.methods reflects it.
#[tokio::test]
async fn test_redeclare_and_rpc_methods() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();
        let (session, _rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session);

        let declare = Message::request(1, "rpcz.declare", json!([{"add": null, "sub": null}]));
        app.dispatch(&ctx, declare).await.unwrap();

        let reply = app
            .dispatch(&client_ctx(), Message::request(2, "rpc.methods", Value::Null))
            .await
            .unwrap();
        match &reply {
            Message::Result { result, .. } => {
                assert_eq!(result["methods"], json!(["add", "sub"]));
                assert_eq!(result["remotes"], json!([]));
            }
            other => panic!("expected result, got {other:?}"),
        }

        let redeclare = Message::request(3, "rpcz.declare", json!([{"sub": null, "mul": null}]));
        app.dispatch(&ctx, redeclare).await.unwrap();

        let reply = app
            .dispatch(&client_ctx(), Message::request(4, "rpc.methods", Value::Null))
            .await
            .unwrap();
        match &reply {
            Message::Result { result, .. } => {
                assert_eq!(result["methods"], json!(["mul", "sub"]));
            }
            other => panic!("expected result, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_schema_lookup() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();
        let (session, _rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session);

        let schema = json!({"type": "method", "params": [{"type": "string"}]});
        let declare = Message::request(1, "rpcz.declare", json!([{"greet": schema}]));
        app.dispatch(&ctx, declare).await.unwrap();

        let reply = app
            .dispatch(&client_ctx(), Message::request(2, "rpcz.schema", json!(["greet"])))
            .await
            .unwrap();
        match reply {
            Message::Result { result, .. } => assert_eq!(result, schema),
            other => panic!("expected schema, got {other:?}"),
        }

        // untyped and unknown methods both report "no schema"
        let reply = app
            .dispatch(&client_ctx(), Message::request(3, "rpcz.schema", json!(["missing"])))
            .await
            .unwrap();
        match reply {
            Message::Error { error, .. } => {
                assert_eq!(error.code, CODE_INVALID_PARAMS);
                assert_eq!(error.message, "no schema");
            }
            other => panic!("expected error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// Built-in methods describe themselves; mq.* only does when an MQ is
/// configured.
#[tokio::test]
async fn test_schema_covers_builtins() {
    timeout(Duration::from_secs(10), async {
        let app = App::new(create_test_config()).unwrap();

        for method in ["rpcz.declare", "rpcz.schema", "rpc.methods"] {
            let reply = app
                .dispatch(
                    &client_ctx(),
                    Message::request(1, "rpcz.schema", json!([method])),
                )
                .await
                .unwrap();
            match reply {
                Message::Result { result, .. } => {
                    assert_eq!(result["type"], json!("method"), "schema of {method}");
                    assert!(result["params"].is_array(), "schema of {method}");
                }
                other => panic!("expected schema of {method}, got {other:?}"),
            }
        }

        // no MQ attached: the mq.* surface is not served, so no schema
        let reply = app
            .dispatch(&client_ctx(), Message::request(2, "rpcz.schema", json!(["mq.get"])))
            .await
            .unwrap();
        match reply {
            Message::Error { error, .. } => assert_eq!(error.message, "no schema"),
            other => panic!("expected error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// INTENTION: the keepalive loop probes attached workers with _ping through
/// the normal pending protocol; a healthy worker just answers.
#[tokio::test]
async fn test_keepalive_pings_attached_workers() {
    timeout(Duration::from_secs(10), async {
        let config = create_test_config().with_keepalive_interval_ms(100);
        let app = Arc::new(App::new(config).unwrap());

        let (session, mut rx) = ChannelSession::new();
        let ctx = SessionContext::with_session(session);
        let declare = Message::request(1, "rpcz.declare", json!([{"echo": null}]));
        app.dispatch(&ctx, declare).await.unwrap();

        let ping = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no keepalive ping arrived")
            .unwrap();
        assert_eq!(ping.method(), Some("_ping"));
        assert!(ping.is_request());

        // an unanswered ping must not dismiss the service
        tokio::time::sleep(Duration::from_millis(600)).await;
        let reply = app
            .dispatch(&client_ctx(), Message::request(2, "rpc.methods", Value::Null))
            .await
            .unwrap();
        match reply {
            Message::Result { result, .. } => assert_eq!(result["methods"], json!(["echo"])),
            other => panic!("expected result, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

/// Namespaces are isolated: a worker in one namespace is invisible to
/// callers in another.
#[tokio::test]
async fn test_namespace_isolation() {
    timeout(Duration::from_secs(10), async {
        let app = Arc::new(App::new(create_test_config()).unwrap());
        let _worker = TestWorker::spawn_echo(Arc::clone(&app), Some("tenant-a")).await;

        let reply = app
            .dispatch(
                &rpcmux_test_utils::fixtures::namespace_ctx(None, "tenant-a"),
                Message::request(1, "echo", json!(["hi"])),
            )
            .await
            .unwrap();
        assert!(reply.is_result());

        let reply = app
            .dispatch(
                &rpcmux_test_utils::fixtures::namespace_ctx(None, "tenant-b"),
                Message::request(2, "echo", json!(["hi"])),
            )
            .await
            .unwrap();
        match reply {
            Message::Error { error, .. } => assert_eq!(error.code, CODE_METHOD_NOT_FOUND),
            other => panic!("expected error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}
