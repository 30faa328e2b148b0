// Loopback peer clients
//
// Stands in for the outbound HTTP client: a registry mapping advertise URLs
// to in-process Apps, with `call` dispatching straight into the target App.
// Federation suites register both muxes here and wire the factory into each
// App, so peer forwarding never leaves the process.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use rpcmux_jsonrpc::Message;
use rpcmux_node::{App, PeerClient, PeerClientFactory, SessionContext};

#[derive(Default)]
pub struct LoopbackClientFactory {
    apps: DashMap<String, Arc<App>>,
}

impl LoopbackClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `app` reachable at `advertise_url`.
    pub fn register(&self, advertise_url: &str, app: Arc<App>) {
        self.apps.insert(advertise_url.to_string(), app);
    }
}

#[async_trait]
impl PeerClientFactory for LoopbackClientFactory {
    async fn connect(&self, advertise_url: &str) -> Result<Arc<dyn PeerClient>> {
        let app = self
            .apps
            .get(advertise_url)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| anyhow!("no app registered at {advertise_url}"))?;
        Ok(Arc::new(LoopbackClient { app }))
    }
}

struct LoopbackClient {
    app: Arc<App>,
}

#[async_trait]
impl PeerClient for LoopbackClient {
    async fn call(&self, msg: Message) -> Result<Message> {
        self.app
            .dispatch(&SessionContext::default(), msg)
            .await
            .ok_or_else(|| anyhow!("peer returned no reply"))
    }
}
