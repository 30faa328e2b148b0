// In-memory MQ backend
//
// INTENTION: Provide the ordered-log backend as a per-process broker of
// named sections. Every client created from the same broker shares state,
// which is the federation seam: muxes in one process (or one test) exchange
// status traffic by sharing a broker.
//
// Offsets are decimal sequence numbers starting at 1; "0" is the
// beginning-of-section cursor handed out when probing an empty section.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use rpcmux_jsonrpc::Message;

use super::{MqChunk, MqClient, MqItem, MAX_STREAM_LEN};

#[derive(Default)]
struct Section {
    next_seq: u64,
    // (seq, item) pairs in append order
    items: VecDeque<(u64, MqItem)>,
}

impl Section {
    fn append(&mut self, mut item: MqItem) -> String {
        self.next_seq += 1;
        let seq = self.next_seq;
        item.offset = seq.to_string();
        let offset = item.offset.clone();
        self.items.push_back((seq, item));
        while self.items.len() > MAX_STREAM_LEN {
            self.items.pop_front();
        }
        offset
    }

    fn latest_offset(&self) -> Option<String> {
        self.items.back().map(|(seq, _)| seq.to_string())
    }
}

/// Broker of named in-memory sections. Cheap to share behind an Arc.
#[derive(Default)]
pub struct MemoryMqBroker {
    sections: Mutex<HashMap<String, Section>>,
}

impl MemoryMqBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a client bound to this broker.
    pub fn client(self: &Arc<Self>) -> Arc<dyn MqClient> {
        Arc::new(MemoryMq {
            broker: Arc::clone(self),
        })
    }
}

/// Client handle onto a shared broker.
pub struct MemoryMq {
    broker: Arc<MemoryMqBroker>,
}

#[async_trait]
impl MqClient for MemoryMq {
    async fn add(&self, section: &str, ntf: &Message) -> Result<String> {
        let item = MqItem::from_notify(ntf)?;
        let mut sections = self.broker.sections.lock().unwrap();
        let section = sections.entry(section.to_string()).or_default();
        Ok(section.append(item))
    }

    async fn tail(&self, section: &str, count: usize) -> Result<MqChunk> {
        if count == 0 {
            return Err(anyhow!("tail count must be positive"));
        }
        let sections = self.broker.sections.lock().unwrap();
        let Some(section) = sections.get(section) else {
            return Ok(MqChunk::default());
        };
        let skip = section.items.len().saturating_sub(count);
        let items: Vec<MqItem> = section
            .items
            .iter()
            .skip(skip)
            .map(|(_, item)| item.clone())
            .collect();
        let last_offset = items
            .last()
            .map(|item| item.offset.clone())
            .unwrap_or_default();
        Ok(MqChunk { items, last_offset })
    }

    async fn chunk(&self, section: &str, prev_offset: &str, count: usize) -> Result<MqChunk> {
        if count == 0 {
            return Err(anyhow!("chunk count must be positive"));
        }
        let sections = self.broker.sections.lock().unwrap();
        let Some(section) = sections.get(section) else {
            // probing an unknown section parks the cursor at the beginning
            let last_offset = if prev_offset.is_empty() {
                "0".to_string()
            } else {
                prev_offset.to_string()
            };
            return Ok(MqChunk {
                items: Vec::new(),
                last_offset,
            });
        };

        if prev_offset.is_empty() {
            // offset-only probe: report the current end of the section
            let last_offset = section.latest_offset().unwrap_or_else(|| "0".to_string());
            return Ok(MqChunk {
                items: Vec::new(),
                last_offset,
            });
        }

        let prev: u64 = prev_offset
            .parse()
            .map_err(|_| anyhow!("invalid offset: {prev_offset}"))?;
        let items: Vec<MqItem> = section
            .items
            .iter()
            .filter(|(seq, _)| *seq > prev)
            .take(count)
            .map(|(_, item)| item.clone())
            .collect();
        let last_offset = items
            .last()
            .map(|item| item.offset.clone())
            .unwrap_or_else(|| prev_offset.to_string());
        Ok(MqChunk { items, last_offset })
    }
}

/// Connect to an MQ backend by URL. Only the `memory` scheme is built in;
/// each call creates an independent broker, so federation across App
/// instances requires sharing a broker client explicitly.
pub fn connect(url: &str) -> Result<Arc<dyn MqClient>> {
    if url.starts_with("memory:") {
        Ok(MemoryMqBroker::new().client())
    } else {
        Err(anyhow!("unsupported mq url scheme: {url}"))
    }
}
