// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::entry::Entry;
use crate::error::StoreError;
use overlay_net::CidrV4;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Entries keyed by bare IP (prefix stripped).
pub type EntryMap = HashMap<Ipv4Addr, Entry>;

/// One refresh worth of classified inventory.
///
/// Built once per reload and published as a whole; readers never observe a
/// partially updated classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// This agent's own entry.
    pub self_entry: Entry,
    /// All retained entries, in source order.
    pub entries: Vec<Entry>,
    /// Entries hosted on this agent's host.
    pub local: EntryMap,
    /// Entries hosted elsewhere.
    pub remote: EntryMap,
    /// Entries running a sibling agent (self excluded).
    pub peers: EntryMap,
    /// Remote entries without a sibling agent.
    pub remote_non_peers: EntryMap,
}

impl Projection {
    /// Classify a raw entry list.
    ///
    /// The first entry flagged `self` anchors the classification; `override_ip`
    /// replaces its overlay address before anything is derived. Duplicate bare
    /// IPs resolve first-wins within the refresh.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingSelf`] when no entry is flagged `self`.
    pub fn build(raw: Vec<Entry>, override_ip: Option<CidrV4>) -> Result<Projection, StoreError> {
        let mut raw = raw;
        let self_pos = raw
            .iter()
            .position(|e| e.is_self)
            .ok_or(StoreError::MissingSelf)?;
        if let Some(ip) = override_ip {
            raw[self_pos].ip = ip;
        }
        let self_entry = raw[self_pos].clone();
        debug!(self_ip = %self_entry.ip, self_host = %self_entry.host_ip, "classifying inventory");

        let mut seen: HashSet<Ipv4Addr> = HashSet::new();
        let mut entries = Vec::with_capacity(raw.len());
        let mut local = EntryMap::new();
        let mut remote = EntryMap::new();
        let mut peers = EntryMap::new();
        let mut remote_non_peers = EntryMap::new();

        for entry in raw {
            let ip = entry.bare_ip();
            if !seen.insert(ip) {
                debug!(%ip, "duplicate bare IP, keeping first entry");
                continue;
            }

            if entry.host_ip == self_entry.host_ip {
                local.insert(ip, entry.clone());
            } else {
                remote.insert(ip, entry.clone());
                if !entry.is_peer {
                    remote_non_peers.insert(ip, entry.clone());
                }
            }

            if entry.is_peer && !entry.is_self {
                peers.insert(ip, entry.clone());
            }

            entries.push(entry);
        }

        Ok(Projection {
            self_entry,
            entries,
            local,
            remote,
            peers,
            remote_non_peers,
        })
    }

    /// Classify an IP as remote: known, and not hosted on this host.
    #[must_use]
    pub fn is_remote(&self, ip: Ipv4Addr) -> bool {
        if self.local.contains_key(&ip) {
            return false;
        }
        self.remote.contains_key(&ip)
    }
}

/// The atomically swapped projection cell shared between a store and its
/// readers.
///
/// Readers clone the inner [`Arc`] under a short read lock; the writer swaps
/// the whole projection at the end of a successful reload.
#[derive(Clone, Default)]
pub struct SharedProjection(Arc<RwLock<Option<Arc<Projection>>>>);

impl SharedProjection {
    /// An empty cell; reads return `None` until the first publish.
    #[must_use]
    pub fn new() -> SharedProjection {
        SharedProjection::default()
    }

    /// The latest published projection.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Projection>> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the projection.
    pub fn publish(&self, projection: Projection) {
        let projection = Arc::new(projection);
        match self.0.write() {
            Ok(mut guard) => *guard = Some(projection),
            Err(poisoned) => *poisoned.into_inner() = Some(projection),
        }
    }
}
