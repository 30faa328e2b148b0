// Status broadcast loop
//
// INTENTION: Federate routers across mux instances through the message bus.
// Each router periodically publishes its method catalog on the namespace
// section and consumes peers' catalogs to keep its remote-service index
// current. A final empty-methods status is published on shutdown so peers
// withdraw this mux promptly instead of waiting out the staleness cutoff.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use rpcmux_common::{log_debug, log_error, log_warn};
use rpcmux_jsonrpc::Message;

use crate::mq::{MqClient, MqItem};
use crate::routing::{Router, ServiceStatus};

/// Method name of the peer status notify on the bus.
pub const STATUS_METHOD: &str = "rpcmux.status";

/// How many recent statuses to replay before entering the live subscribe
/// loop, so a fresh router sees the current fleet state immediately.
const STATUS_PREFETCH: usize = 10;

impl Router {
    /// Status loop body. A no-op unless both an MQ client and an advertise
    /// URL are configured.
    pub(crate) async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mq) = self.mq_client() else {
            return;
        };
        if self.advertise_url().is_empty() {
            log_warn!(
                self.logger(),
                "advertise url is empty, server status will not be published"
            );
            return;
        }
        log_debug!(self.logger(), "router {} runs", self.namespace());

        let (tx, mut rx) = mpsc::channel::<MqItem>(100);
        tokio::spawn(Arc::clone(&self).subscribe_status(tx));

        // a failed initial publish is fatal to this router's federation;
        // local routing keeps working
        if let Err(e) = self.publish_status(&mq).await {
            log_error!(
                self.logger(),
                "initial status publish failed, status loop stopped: {e}"
            );
            return;
        }

        let mut ticker = tokio::time::interval(self.options().status_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if let Err(e) = self.publish_empty_status(&mq).await {
                            log_error!(self.logger(), "publish empty status error, {e}");
                        }
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_status(&mq).await {
                        log_error!(self.logger(), "status publish error, {e}");
                    }
                }
                item = rx.recv() => {
                    match item {
                        Some(item) => self.apply_status_item(item).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// Replay the recent fleet state, then follow the live stream. Ends
    /// when the router's status loop drops its receiver.
    async fn subscribe_status(self: Arc<Self>, tx: mpsc::Sender<MqItem>) {
        let Some(mq) = self.mq_client() else {
            return;
        };
        log_debug!(self.logger(), "subscribe status");

        match mq.tail(self.mq_section(), STATUS_PREFETCH).await {
            Ok(chunk) => {
                for item in chunk.items {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => log_error!(self.logger(), "tailing error {e}"),
        }

        if let Err(e) = mq.subscribe(self.mq_section(), tx).await {
            log_error!(self.logger(), "subscribe error {e}");
        }
    }

    async fn apply_status_item(&self, item: MqItem) {
        if item.brief != STATUS_METHOD {
            return;
        }
        let ntf = match item.notify() {
            Ok(ntf) => ntf,
            Err(e) => {
                log_error!(self.logger(), "bad status item at {}: {e}", item.offset);
                return;
            }
        };
        let Some(first) = ntf.params().and_then(|p| p.as_array()).and_then(|a| a.first())
        else {
            log_error!(self.logger(), "status notify carries no params object");
            return;
        };
        let status: ServiceStatus = match serde_json::from_value(first.clone()) {
            Ok(status) => status,
            Err(e) => {
                log_error!(self.logger(), "bad decode service status: {e}");
                return;
            }
        };
        self.update_remote_status(status).await;
    }

    async fn publish_status(&self, mq: &Arc<dyn MqClient>) -> anyhow::Result<()> {
        let methods = self.serving_methods().await;
        let status = ServiceStatus::now(self.advertise_url(), methods);
        log_debug!(self.logger(), "publish service status, {status:?}");
        let ntf = Message::notify(STATUS_METHOD, json!([status]));
        mq.add(self.mq_section(), &ntf).await?;
        Ok(())
    }

    async fn publish_empty_status(&self, mq: &Arc<dyn MqClient>) -> anyhow::Result<()> {
        let status = ServiceStatus::now(self.advertise_url(), Vec::new());
        log_debug!(self.logger(), "publish empty service status, {status:?}");
        let ntf = Message::notify(STATUS_METHOD, json!([status]));
        mq.add(self.mq_section(), &ntf).await?;
        Ok(())
    }
}
