// Message Queue Module
//
// INTENTION: Abstract the ordered per-section log that drives peer
// federation and the client-facing pub/sub facade. The trait is the
// integration seam for a real streams backend; the in-memory broker is the
// shipped implementation and the deterministic test double.
//
// Sections are independent ordered logs, capped at MAX_STREAM_LEN entries
// (oldest evicted). Offsets are opaque strings, strictly increasing within
// a section.

pub mod actor;
pub mod memory;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use rpcmux_jsonrpc::Message;

pub use actor::MqActor;
pub use memory::MemoryMqBroker;

/// Hard cap on entries retained per section; oldest entries are evicted.
pub const MAX_STREAM_LEN: usize = 10_000;

/// Sleep between empty polls in the subscribe loop.
pub const EMPTY_POLL_SLEEP: Duration = Duration::from_millis(3);

/// Per-poll batch size used by the subscribe loop.
const SUBSCRIBE_CHUNK_SIZE: usize = 100;

/// One stored entry. `brief` carries the notify's method name so consumers
/// can filter without decoding `msg_data`.
#[derive(Debug, Clone)]
pub struct MqItem {
    pub offset: String,
    pub kind: String,
    pub brief: String,
    pub msg_data: Vec<u8>,
}

impl MqItem {
    /// Build an item from a notify message. The offset is assigned by the
    /// backend on append.
    pub fn from_notify(ntf: &Message) -> Result<Self> {
        if !ntf.is_notify() {
            return Err(anyhow!("mq item requires a notify message"));
        }
        let brief = ntf
            .method()
            .ok_or_else(|| anyhow!("mq item requires a notify message"))?
            .to_string();
        Ok(Self {
            offset: String::new(),
            kind: "Notify".to_string(),
            brief,
            msg_data: ntf.to_json().into_bytes(),
        })
    }

    /// Decode the stored notify message.
    pub fn notify(&self) -> Result<Message> {
        let text = std::str::from_utf8(&self.msg_data)
            .map_err(|e| anyhow!("mq item payload is not utf-8: {e}"))?;
        Message::from_json(text).map_err(|e| anyhow!("mq item payload is not a message: {e}"))
    }

    /// JSON shape used by the mq.* facade.
    pub fn to_map(&self) -> Result<Value> {
        Ok(json!({
            "offset": self.offset,
            "kind": self.kind,
            "brief": self.brief,
            "msg": self.notify()?.to_value(),
        }))
    }
}

/// A page of items plus the cursor for the next read.
///
/// When no items match, `last_offset` echoes the requested cursor so the
/// caller's position does not move.
#[derive(Debug, Clone, Default)]
pub struct MqChunk {
    pub items: Vec<MqItem>,
    pub last_offset: String,
}

impl MqChunk {
    /// JSON shape used by mq.get / mq.tail results.
    pub fn to_map(&self) -> Result<Value> {
        let items = self
            .items
            .iter()
            .map(MqItem::to_map)
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({
            "items": items,
            "lastOffset": self.last_offset,
        }))
    }
}

/// Client for an ordered, capped, per-section message log.
#[async_trait]
pub trait MqClient: Send + Sync {
    /// Append a notify to a section, returning the assigned offset.
    async fn add(&self, section: &str, ntf: &Message) -> Result<String>;

    /// Up to `count` most-recent items, in chronological order.
    async fn tail(&self, section: &str, count: usize) -> Result<MqChunk>;

    /// Items strictly after `prev_offset`. An empty `prev_offset` is an
    /// offset-only probe: it returns the current end-of-section cursor with
    /// no item bodies, used to initialize a subscribe position.
    async fn chunk(&self, section: &str, prev_offset: &str, count: usize) -> Result<MqChunk>;

    /// Poll the section and forward new items to `tx` until the receiver is
    /// dropped. Sleeps between empty polls. Returns Ok(()) on cancellation
    /// (receiver gone) and Err on backend failures.
    async fn subscribe(&self, section: &str, tx: mpsc::Sender<MqItem>) -> Result<()> {
        let mut cursor = String::new();
        loop {
            let chunk = self.chunk(section, &cursor, SUBSCRIBE_CHUNK_SIZE).await?;
            let advanced = chunk.last_offset != cursor;
            cursor = chunk.last_offset;
            if chunk.items.is_empty() {
                if !advanced {
                    if tx.is_closed() {
                        return Ok(());
                    }
                    tokio::time::sleep(EMPTY_POLL_SLEEP).await;
                }
                continue;
            }
            for item in chunk.items {
                if tx.send(item).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
