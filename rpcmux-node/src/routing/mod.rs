// Routing Module
//
// INTENTION:
// This module is the heart of the mux: the per-namespace Router that indexes
// locally attached worker services and federated peer muxes, correlates
// requests with worker replies through the pending table, and keeps both
// indices consistent as workers declare, re-declare, and disconnect.
//
// ARCHITECTURAL PRINCIPLES:
// 1. Single entry point - every inbound message goes through `feed`
// 2. Single-winner removal - a pending call is completed by exactly one of
//    {worker reply, timeout, dismissal}, decided by an atomic remove on the
//    pending table
// 3. Wholesale catalogs - a service's method set is replaced atomically
//    under the index writer lock, never mutated in place
// 4. Local precedence - local services win over peers for the same method

pub mod remote_service;
pub mod service;
mod status;

use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use rpcmux_common::{log_debug, log_error, log_warn, Component, Logger};
use rpcmux_jsonrpc::{Message, MsgId, RpcError};

use crate::client::PeerClientFactory;
use crate::config::{AppConfig, RouterOptions};
use crate::mq::MqClient;

pub use remote_service::{unix_now, RemoteService, ServiceStatus};
pub use service::Service;

/// Internal liveness probe issued by the keepalive loop.
pub const PING_METHOD: &str = "_ping";

/// An in-flight request awaiting its worker reply.
///
/// The oneshot sender is owned by whichever completion path wins the
/// `pendings.remove`, so the channel is written at most once by
/// construction.
struct PendingCall {
    orig_id: MsgId,
    method: String,
    reply_tx: oneshot::Sender<Message>,
    session_id: String,
}

/// Per-namespace router.
pub struct Router {
    namespace: String,
    mq_section: String,
    advertise_url: String,
    options: RouterOptions,

    // service indices
    services: DashMap<String, Arc<Service>>,
    method_services: RwLock<HashMap<String, Vec<Arc<Service>>>>,
    service_rotation: DashMap<String, AtomicUsize>,

    // remote service indices
    remote_services: DashMap<String, Arc<RemoteService>>,
    method_remotes: RwLock<HashMap<String, Vec<Arc<RemoteService>>>>,
    remote_rotation: DashMap<String, AtomicUsize>,

    // pending requests, keyed by minted correlation id
    pendings: Arc<DashMap<MsgId, PendingCall>>,

    mq_client: Option<Arc<dyn MqClient>>,
    client_factory: Option<Arc<dyn PeerClientFactory>>,

    started: AtomicBool,
    logger: Logger,
}

impl Router {
    pub fn new(
        namespace: impl Into<String>,
        config: &AppConfig,
        mq_client: Option<Arc<dyn MqClient>>,
        client_factory: Option<Arc<dyn PeerClientFactory>>,
        parent_logger: &Logger,
    ) -> Arc<Self> {
        let namespace = namespace.into();
        Arc::new(Self {
            mq_section: format!("ns:{namespace}"),
            logger: parent_logger
                .with_component(Component::Router)
                .with_namespace(&namespace),
            namespace,
            advertise_url: config.server.advertise_url.clone(),
            options: config.router.clone(),
            services: DashMap::new(),
            method_services: RwLock::new(HashMap::new()),
            service_rotation: DashMap::new(),
            remote_services: DashMap::new(),
            method_remotes: RwLock::new(HashMap::new()),
            remote_rotation: DashMap::new(),
            pendings: Arc::new(DashMap::new()),
            mq_client,
            client_factory,
            started: AtomicBool::new(false),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn mq_section(&self) -> &str {
        &self.mq_section
    }

    /// Launch the background loops (status broadcast, keepalive). Idempotent.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).run(shutdown.clone()));
        tokio::spawn(Arc::clone(self).keepalive_loop(shutdown));
    }

    // ---- service registration ----

    /// The service attached to a session, created on first use. The bool is
    /// true when the service was just created.
    pub fn get_or_create_service(
        &self,
        session: Arc<dyn crate::session::RpcSession>,
    ) -> (Arc<Service>, bool) {
        match self.services.entry(session.session_id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let service = Arc::new(Service::new(session));
                entry.insert(Arc::clone(&service));
                (service, true)
            }
        }
    }

    pub fn get_service(&self, session_id: &str) -> Option<Arc<Service>> {
        self.services.get(session_id).map(|e| Arc::clone(e.value()))
    }

    /// Replace a service's catalog and bring the method index in line, in
    /// one writer critical section. An empty catalog detaches the service
    /// from every method (the dismissal path).
    pub async fn update_service_methods(
        &self,
        service: &Arc<Service>,
        new_methods: HashMap<String, Option<Value>>,
    ) {
        let mut index = self.method_services.write().await;
        let old: HashSet<String> = service.method_names().into_iter().collect();
        let fresh: HashSet<String> = new_methods.keys().cloned().collect();

        for method in old.difference(&fresh) {
            let emptied = match index.get_mut(method) {
                Some(list) => {
                    list.retain(|s| !Arc::ptr_eq(s, service));
                    list.is_empty()
                }
                None => false,
            };
            if emptied {
                index.remove(method);
            }
        }
        for method in fresh.difference(&old) {
            index
                .entry(method.clone())
                .or_default()
                .push(Arc::clone(service));
        }
        service.set_methods(new_methods);
    }

    /// Detach a closing session's service: remove it from the indices and
    /// complete every pending call targeting it with a timeout reply.
    /// Returns false when the session had no service (the caller may route
    /// the close to sibling actors instead).
    pub async fn dismiss_service(&self, session_id: &str) -> bool {
        log_debug!(self.logger, "dismiss service {session_id}");
        let Some((_, service)) = self.services.remove(session_id) else {
            return false;
        };
        self.update_service_methods(&service, HashMap::new()).await;

        let stranded: Vec<MsgId> = self
            .pendings
            .iter()
            .filter(|entry| entry.value().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        for cid in stranded {
            if let Some((_, pt)) = self.pendings.remove(&cid) {
                let _ = pt.reply_tx.send(Message::error(pt.orig_id, RpcError::timeout()));
            }
        }

        service.dismiss();
        true
    }

    // ---- selection ----

    /// Pick a local service for a method by rotating round-robin, so
    /// repeated calls spread over every declaring worker.
    pub async fn select_service(&self, method: &str) -> Option<Arc<Service>> {
        let index = self.method_services.read().await;
        let list = index.get(method)?;
        if list.is_empty() {
            return None;
        }
        let turn = self
            .service_rotation
            .entry(method.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&list[turn % list.len()]))
    }

    pub async fn select_remote_service(&self, method: &str) -> Option<Arc<RemoteService>> {
        let index = self.method_remotes.read().await;
        let list = index.get(method)?;
        if list.is_empty() {
            return None;
        }
        let turn = self
            .remote_rotation
            .entry(method.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&list[turn % list.len()]))
    }

    /// Union of method names across all attached services, sorted.
    pub async fn serving_methods(&self) -> Vec<String> {
        let index = self.method_services.read().await;
        let mut methods: Vec<String> = index
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(method, _)| method.clone())
            .collect();
        methods.sort();
        methods
    }

    /// Method names currently offered by peers, sorted.
    pub async fn remote_methods(&self) -> Vec<String> {
        let index = self.method_remotes.read().await;
        let mut methods: Vec<String> = index
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(method, _)| method.clone())
            .collect();
        methods.sort();
        methods
    }

    // ---- dispatch ----

    /// Single entry point for inbound messages. Requests produce a reply;
    /// notifies and worker replies produce none.
    pub async fn feed(&self, msg: Message) -> Option<Message> {
        match &msg {
            Message::Request { id, method, .. } => {
                let (id, method) = (id.clone(), method.clone());
                Some(self.handle_request(id, &method, msg).await)
            }
            Message::Notify { .. } => {
                self.handle_notify(msg).await;
                None
            }
            _ => {
                self.handle_reply(msg);
                None
            }
        }
    }

    async fn handle_request(&self, orig_id: MsgId, method: &str, msg: Message) -> Message {
        if let Some(service) = self.select_service(method).await {
            return self.request_service(&service, orig_id, method, msg).await;
        }
        if let Some(remote) = self.select_remote_service(method).await {
            return self.call_remote(&remote, orig_id, msg).await;
        }
        log_debug!(self.logger, "no route for method {method}");
        Message::error(orig_id, RpcError::method_not_found())
    }

    /// Forward a request to a local service under a fresh correlation id and
    /// wait for exactly one completion (reply, timeout, or dismissal).
    pub(crate) async fn request_service(
        &self,
        service: &Arc<Service>,
        orig_id: MsgId,
        method: &str,
        msg: Message,
    ) -> Message {
        let cid = MsgId::Str(Uuid::new_v4().to_string());
        let forwarded = msg.clone_with_id(cid.clone());

        // the pending must exist before the worker can possibly reply, so
        // register first and roll back if the send is refused
        let (reply_tx, reply_rx) = oneshot::channel();
        let expires_at = Instant::now() + self.options.request_timeout();
        self.pendings.insert(
            cid.clone(),
            PendingCall {
                orig_id: orig_id.clone(),
                method: method.to_string(),
                reply_tx,
                session_id: service.session_id().to_string(),
            },
        );
        if let Err(kind) = service.send(forwarded) {
            log_debug!(self.logger, "forward of {method} failed: {kind}");
            self.pendings.remove(&cid);
            return Message::error(orig_id, kind.to_rpc_error());
        }

        let pendings = Arc::clone(&self.pendings);
        let logger = self.logger.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some((_, pt)) = pendings.remove(&cid) {
                log_debug!(logger, "request {} timed out (cid={cid})", pt.method);
                let _ = pt.reply_tx.send(Message::error(pt.orig_id, RpcError::timeout()));
            }
        });

        match reply_rx.await {
            Ok(reply) => reply,
            // the sender can only disappear if the runtime is tearing down
            Err(_) => Message::error(orig_id, RpcError::timeout()),
        }
    }

    async fn call_remote(
        &self,
        remote: &Arc<RemoteService>,
        orig_id: MsgId,
        msg: Message,
    ) -> Message {
        let Some(factory) = self.client_factory.as_ref() else {
            log_warn!(
                self.logger,
                "no peer client factory, cannot forward to {}",
                remote.advertise_url()
            );
            return Message::error(
                orig_id,
                RpcError::transport_error("peer forwarding not configured"),
            );
        };
        let client = match remote.client(factory).await {
            Ok(client) => client,
            Err(e) => return Message::error(orig_id, RpcError::transport_error(e.to_string())),
        };
        match client.call(msg).await {
            Ok(reply) => reply,
            Err(e) => Message::error(orig_id, RpcError::transport_error(e.to_string())),
        }
    }

    async fn handle_notify(&self, msg: Message) {
        let Some(method) = msg.method().map(str::to_string) else {
            return;
        };
        if let Some(service) = self.select_service(&method).await {
            if let Err(kind) = service.send(msg) {
                log_debug!(self.logger, "notify {method} not delivered: {kind}");
            }
        } else {
            // notifications have no reply; nothing to do
            log_debug!(self.logger, "notify {method} dropped, no service");
        }
    }

    /// A worker's result or error referencing a minted correlation id.
    fn handle_reply(&self, msg: Message) {
        let Some(cid) = msg.id() else {
            return;
        };
        let Some((_, pt)) = self.pendings.remove(cid) else {
            log_warn!(self.logger, "cannot find pending request for reply {cid}");
            return;
        };
        let reply = match msg {
            Message::Result { result, .. } => Message::result(pt.orig_id, result),
            Message::Error { error, .. } => Message::error(pt.orig_id, error),
            _ => return,
        };
        let _ = pt.reply_tx.send(reply);
    }

    // ---- keepalive ----

    /// Probe every attached service through the full pending protocol. A
    /// failed probe is logged; the session close event stays the
    /// authoritative liveness signal.
    async fn keepalive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.keepalive_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    for entry in self.services.iter() {
                        let service = Arc::clone(entry.value());
                        let router = Arc::clone(&self);
                        tokio::spawn(async move {
                            let ping_id = MsgId::Str(Uuid::new_v4().to_string());
                            let ping = Message::request(
                                ping_id.clone(),
                                PING_METHOD,
                                Value::Null,
                            );
                            let reply = router
                                .request_service(&service, ping_id, PING_METHOD, ping)
                                .await;
                            if reply.is_error() {
                                log_error!(
                                    router.logger,
                                    "ping error for service {}",
                                    service.session_id()
                                );
                            }
                        });
                    }
                }
            }
        }
    }

    // ---- remote index maintenance (driven by the status loop) ----

    /// Upsert a peer from a received status and apply the catalog diff to
    /// the remote method index. Self-echoes and stale statuses are ignored.
    pub async fn update_remote_status(&self, status: ServiceStatus) {
        if !self.advertise_url.is_empty() && status.advertise_url == self.advertise_url {
            return;
        }
        let stale_cutoff = unix_now() - self.options.status_stale_after().as_secs() as i64;
        if status.timestamp < stale_cutoff {
            return;
        }
        log_debug!(
            self.logger,
            "got service status advurl: {}, ts: {}, methods: {:?}",
            status.advertise_url,
            status.timestamp,
            status.methods
        );

        let remote = Arc::clone(
            self.remote_services
                .entry(status.advertise_url.clone())
                .or_insert_with(|| Arc::new(RemoteService::new(&status.advertise_url)))
                .value(),
        );
        let (removed, added) = remote.update_status(&status);
        if removed.is_empty() && added.is_empty() {
            return;
        }

        let mut index = self.method_remotes.write().await;
        for method in &removed {
            let emptied = match index.get_mut(method) {
                Some(list) => {
                    list.retain(|rs| !Arc::ptr_eq(rs, &remote));
                    list.is_empty()
                }
                None => false,
            };
            if emptied {
                index.remove(method);
            }
        }
        for method in &added {
            index
                .entry(method.clone())
                .or_default()
                .push(Arc::clone(&remote));
        }
    }

    pub fn remote_service(&self, advertise_url: &str) -> Option<Arc<RemoteService>> {
        self.remote_services
            .get(advertise_url)
            .map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    pub(crate) fn mq_client(&self) -> Option<Arc<dyn MqClient>> {
        self.mq_client.clone()
    }

    pub(crate) fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub(crate) fn advertise_url(&self) -> &str {
        &self.advertise_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RpcSession, SessionSendError};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    // Local stand-in for `rpcmux_test_utils::fixtures::ChannelSession`: that
    // fixture lives in a crate that depends on this one, so using it here
    // would require cargo to compile this lib twice (once for the unit
    // test binary, once for the fixture's own build), producing two
    // distinct `RpcSession` trait instances that don't satisfy each other.
    struct ChannelSession {
        id: String,
        tx: mpsc::UnboundedSender<Message>,
        closed: AtomicBool,
    }

    impl ChannelSession {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Arc::new(Self {
                id: format!("session-{}", &Uuid::new_v4().to_string()[..8]),
                tx,
                closed: AtomicBool::new(false),
            });
            (session, rx)
        }

        fn close(&self) {
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

    fn test_router() -> Arc<Router> {
        let config = AppConfig::new();
        let logger = Logger::new_root(Component::App, "test");
        Router::new("default", &config, None, None, &logger)
    }

    fn catalog(methods: &[&str]) -> HashMap<String, Option<Value>> {
        methods.iter().map(|m| (m.to_string(), None)).collect()
    }

    /// After every update_methods, the method index and the service catalog
    /// must agree exactly.
    #[tokio::test]
    async fn update_methods_keeps_index_consistent() {
        let router = test_router();
        let (session, _rx) = ChannelSession::new();
        let (service, created) = router.get_or_create_service(session);
        assert!(created);

        router
            .update_service_methods(&service, catalog(&["add", "sub"]))
            .await;
        assert_eq!(router.serving_methods().await, vec!["add", "sub"]);
        assert!(router.select_service("add").await.is_some());

        // replacement drops old methods and picks up new ones atomically
        router
            .update_service_methods(&service, catalog(&["sub", "mul"]))
            .await;
        assert_eq!(router.serving_methods().await, vec!["mul", "sub"]);
        assert!(router.select_service("add").await.is_none());
        assert!(router.select_service("mul").await.is_some());

        // empty catalog detaches everywhere
        router.update_service_methods(&service, HashMap::new()).await;
        assert!(router.serving_methods().await.is_empty());
        assert!(router.select_service("sub").await.is_none());
    }

    #[tokio::test]
    async fn selection_rotates_over_declaring_services() {
        let router = test_router();
        let (session_a, _rx_a) = ChannelSession::new();
        let (session_b, _rx_b) = ChannelSession::new();
        let (service_a, _) = router.get_or_create_service(session_a);
        let (service_b, _) = router.get_or_create_service(session_b);
        router
            .update_service_methods(&service_a, catalog(&["echo"]))
            .await;
        router
            .update_service_methods(&service_b, catalog(&["echo"]))
            .await;

        let mut hits_a = 0;
        let mut hits_b = 0;
        for _ in 0..6 {
            let picked = router.select_service("echo").await.unwrap();
            if Arc::ptr_eq(&picked, &service_a) {
                hits_a += 1;
            } else if Arc::ptr_eq(&picked, &service_b) {
                hits_b += 1;
            }
        }
        assert_eq!(hits_a, 3);
        assert_eq!(hits_b, 3);
    }

    #[tokio::test]
    async fn dismissal_removes_service_and_sweeps_pendings() {
        let router = test_router();
        let (session, _rx) = ChannelSession::new();
        let (service, _) = router.get_or_create_service(session.clone());
        router
            .update_service_methods(&service, catalog(&["slow"]))
            .await;

        let caller = {
            let router = Arc::clone(&router);
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let req = Message::request(1, "slow", Value::Null);
                router
                    .request_service(&service, MsgId::Num(1), "slow", req)
                    .await
            })
        };
        // let the call register its pending before dismissing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(router.dismiss_service(session.session_id()).await);
        assert!(router.select_service("slow").await.is_none());
        assert!(router.get_service(session.session_id()).is_none());

        let reply = tokio::time::timeout(std::time::Duration::from_secs(1), caller)
            .await
            .expect("dismissal did not complete the pending call")
            .unwrap();
        match reply {
            Message::Error { id, error } => {
                assert_eq!(id, MsgId::Num(1));
                assert_eq!(error.code, rpcmux_jsonrpc::error::CODE_TIMEOUT);
            }
            other => panic!("expected timeout error, got {other:?}"),
        }

        // dismissal is idempotent: a second close finds nothing
        assert!(!router.dismiss_service(session.session_id()).await);
    }

    #[tokio::test]
    async fn send_failure_reports_error_without_registering_a_pending() {
        let router = test_router();
        let (session, rx) = ChannelSession::new();
        let (service, _) = router.get_or_create_service(session.clone());
        router
            .update_service_methods(&service, catalog(&["echo"]))
            .await;
        drop(rx);
        session.close();

        let req = Message::request(1, "echo", Value::Null);
        let reply = router
            .request_service(&service, MsgId::Num(1), "echo", req)
            .await;
        match reply {
            Message::Error { error, .. } => {
                assert_eq!(error.code, rpcmux_jsonrpc::error::CODE_SEND_ERROR);
            }
            other => panic!("expected send error, got {other:?}"),
        }
        assert!(router.pendings.is_empty());
    }

    #[tokio::test]
    async fn late_reply_after_timeout_is_dropped() {
        let config = AppConfig::new().with_request_timeout_ms(50);
        let logger = Logger::new_root(Component::App, "test");
        let router = Router::new("default", &config, None, None, &logger);

        let (session, mut rx) = ChannelSession::new();
        let (service, _) = router.get_or_create_service(session);
        router
            .update_service_methods(&service, catalog(&["slow"]))
            .await;

        let req = Message::request(9, "slow", Value::Null);
        let reply = router
            .request_service(&service, MsgId::Num(9), "slow", req)
            .await;
        assert!(reply.is_error());

        // the worker answers after the pending already timed out
        let forwarded = rx.recv().await.unwrap();
        let cid = forwarded.id().unwrap().clone();
        assert!(router.feed(Message::result(cid, Value::Null)).await.is_none());
        assert!(router.pendings.is_empty());
    }
}
