//! Shared capability records published by transports.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a transport advertises about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    /// Version of the crate providing the transport.
    pub version: String,
    /// Local ports of the transport's bound listeners.
    pub local_ports: Vec<u16>,
}

impl CapabilityRecord {
    /// A record with the given version and no ports.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            local_ports: Vec::new(),
        }
    }
}

/// A shared, cloneable map of capability records keyed by transport name.
///
/// Clones refer to the same map.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    inner: Arc<RwLock<BTreeMap<String, CapabilityRecord>>>,
}

impl Capabilities {
    /// Create an empty capability map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn publish(&self, key: impl Into<String>, record: CapabilityRecord) {
        self.inner.write().insert(key.into(), record);
    }

    /// A copy of the record stored under `key`.
    pub fn get(&self, key: &str) -> Option<CapabilityRecord> {
        self.inner.read().get(key).cloned()
    }

    /// Modify the record stored under `key` in place.
    ///
    /// Returns `false` if there is no such record.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut CapabilityRecord),
    {
        match self.inner.write().get_mut(key) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Remove and return the record stored under `key`.
    pub fn remove(&self, key: &str) -> Option<CapabilityRecord> {
        self.inner.write().remove(key)
    }

    /// Keys of all published records, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Serialize all records as a JSON object.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&*self.inner.read())?)
    }
}
