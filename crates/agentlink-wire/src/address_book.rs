//! Address book: resolves agent addresses to socket endpoints.
//!
//! The [`AddressBook`] is a thread-safe map seeded from configuration and
//! extended at runtime with endpoints learned from verified inbound envelopes.
//! Configured entries always take priority over learned ones. Learned entries
//! are capped at [`MAX_LEARNED_ENTRIES`]; past that the oldest is evicted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Upper bound on endpoints learned from the network.
pub const MAX_LEARNED_ENTRIES: usize = 1024;

/// How an endpoint became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    /// From the `[endpoints]` configuration table.
    Configured,
    /// From the `reply_endpoint` of a verified inbound envelope.
    Learned,
}

/// A single address -> endpoint mapping.
#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub address: String,
    pub endpoint: SocketAddr,
    pub source: EndpointSource,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe registry of known agent endpoints.
#[derive(Debug, Clone)]
pub struct AddressBook {
    entries: Arc<RwLock<HashMap<String, AddressEntry>>>,
    max_learned: usize,
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::with_learned_limit(MAX_LEARNED_ENTRIES)
    }
}

impl AddressBook {
    /// Create a new empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty address book holding at most `max_learned` learned
    /// entries. Configured entries do not count against the limit.
    pub fn with_learned_limit(max_learned: usize) -> Self {
        Self {
            entries: Arc::default(),
            max_learned,
        }
    }

    /// Create an address book pre-populated with configured endpoints.
    pub fn with_endpoints<I>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = (String, SocketAddr)>,
    {
        let book = Self::new();
        for (address, endpoint) in endpoints {
            book.insert(address, endpoint);
        }
        book
    }

    /// Insert or replace a configured endpoint.
    pub fn insert(&self, address: String, endpoint: SocketAddr) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            address.clone(),
            AddressEntry {
                address,
                endpoint,
                source: EndpointSource::Configured,
                updated_at: Utc::now(),
            },
        );
    }

    /// Record an endpoint learned from the network. Returns `false` if a
    /// configured entry for the address already exists or the limit is zero.
    pub fn learn(&self, address: &str, endpoint: SocketAddr) -> bool {
        if self.max_learned == 0 {
            return false;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get(address) {
            Some(existing) if existing.source == EndpointSource::Configured => return false,
            Some(_) => {}
            None => {
                let learned = entries
                    .values()
                    .filter(|e| e.source == EndpointSource::Learned)
                    .count();
                if learned >= self.max_learned {
                    let oldest = entries
                        .values()
                        .filter(|e| e.source == EndpointSource::Learned)
                        .min_by_key(|e| e.updated_at)
                        .map(|e| e.address.clone());
                    if let Some(oldest) = oldest {
                        entries.remove(&oldest);
                    }
                }
            }
        }
        entries.insert(
            address.to_string(),
            AddressEntry {
                address: address.to_string(),
                endpoint,
                source: EndpointSource::Learned,
                updated_at: Utc::now(),
            },
        );
        true
    }

    /// Look up the endpoint for an address.
    pub fn resolve(&self, address: &str) -> Option<SocketAddr> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(address).map(|e| e.endpoint)
    }

    /// Remove an address entirely.
    pub fn remove(&self, address: &str) -> Option<AddressEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(address)
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<AddressEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
