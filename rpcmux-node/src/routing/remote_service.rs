// Remote service
//
// INTENTION: Represent one peer mux known from the status stream: its
// advertise URL (the primary key), the last-seen method catalog, and a
// lazily created outbound client. The entry stays alive while status
// messages keep it fresh; a tombstone status empties its catalog.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::{PeerClient, PeerClientFactory};

/// Wire form of one peer's broadcast, carried as the single params object of
/// the `rpcmux.status` notify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub advertise_url: String,
    pub methods: Vec<String>,
    pub timestamp: i64,
}

impl ServiceStatus {
    pub fn now(advertise_url: impl Into<String>, methods: Vec<String>) -> Self {
        Self {
            advertise_url: advertise_url.into(),
            methods,
            timestamp: unix_now(),
        }
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct RemoteService {
    advertise_url: String,
    methods: RwLock<HashSet<String>>,
    updated_at: RwLock<i64>,
    client: tokio::sync::RwLock<Option<Arc<dyn PeerClient>>>,
}

impl RemoteService {
    pub fn new(advertise_url: impl Into<String>) -> Self {
        Self {
            advertise_url: advertise_url.into(),
            methods: RwLock::new(HashSet::new()),
            updated_at: RwLock::new(0),
            client: tokio::sync::RwLock::new(None),
        }
    }

    pub fn advertise_url(&self) -> &str {
        &self.advertise_url
    }

    pub fn serves(&self, method: &str) -> bool {
        self.methods.read().unwrap().contains(method)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.read().unwrap().iter().cloned().collect()
    }

    pub fn updated_at(&self) -> i64 {
        *self.updated_at.read().unwrap()
    }

    /// Diff the cached catalog against a fresh status. Returns the methods
    /// that disappeared and the methods that are new, in that order; the
    /// router applies the same diff to its method index.
    pub fn update_status(&self, status: &ServiceStatus) -> (Vec<String>, Vec<String>) {
        let fresh: HashSet<String> = status.methods.iter().cloned().collect();
        let mut methods = self.methods.write().unwrap();
        let removed: Vec<String> = methods.difference(&fresh).cloned().collect();
        let added: Vec<String> = fresh.difference(&methods).cloned().collect();
        *methods = fresh;
        *self.updated_at.write().unwrap() = status.timestamp;
        (removed, added)
    }

    /// The outbound client for this peer, created on first use and cached.
    pub async fn client(&self, factory: &Arc<dyn PeerClientFactory>) -> Result<Arc<dyn PeerClient>> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }
        let mut slot = self.client.write().await;
        // double-checked: another forward may have connected while we waited
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = factory
            .connect(&self.advertise_url)
            .await
            .map_err(|e| anyhow!("connect {}: {e}", self.advertise_url))?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }
}
