// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Inventory store: the source of truth the reconcilers program the kernel
//! from.
//!
//! Two interchangeable implementations sit behind the [`Store`] trait: a
//! file-backed snapshot ([`SimpleStore`]) and a live view over the metadata
//! service ([`MetadataStore`]). Both project raw records into the same
//! [`Projection`] of classified entries, swapped atomically on successful
//! reload.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

mod classifier;
mod entry;
mod error;
pub mod metadata;
mod projection;
mod simple;

pub use classifier::{ClassifierHandle, ClassifierReader, ClassifierWriter};
pub use entry::Entry;
pub use error::StoreError;
pub use metadata::MetadataStore;
pub use projection::{EntryMap, Projection, SharedProjection};
pub use simple::SimpleStore;

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// The store interface consumed by the reconcilers and the ARP responder.
///
/// `reload` rebuilds all projections from the backing source; reads observe
/// either the entire previous projection or the entire new one, never a mix.
pub trait Store: Send + Sync {
    /// Rebuild all projections from the backing source.
    ///
    /// On failure the previous projection is retained.
    fn reload(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// The current projection, if a reload ever succeeded.
    fn projection(&self) -> Option<Arc<Projection>>;

    /// All classified entries, in informational order.
    fn entries(&self) -> Vec<Entry> {
        self.projection()
            .map(|p| p.entries.clone())
            .unwrap_or_default()
    }

    /// Peer entries keyed by bare IP.
    fn peer_entries(&self) -> EntryMap {
        self.projection()
            .map(|p| p.peers.clone())
            .unwrap_or_default()
    }

    /// Remote entries keyed by bare IP.
    fn remote_entries(&self) -> EntryMap {
        self.projection()
            .map(|p| p.remote.clone())
            .unwrap_or_default()
    }

    /// Remote entries without a sibling agent, keyed by bare IP.
    fn remote_non_peer_entries(&self) -> EntryMap {
        self.projection()
            .map(|p| p.remote_non_peers.clone())
            .unwrap_or_default()
    }

    /// Classify an IP as remote. Local and unknown addresses are not remote.
    fn is_remote(&self, ip: Ipv4Addr) -> bool {
        self.projection().is_some_and(|p| p.is_remote(ip))
    }

    /// The physical address of the host this agent runs on.
    fn local_host_ip(&self) -> Option<Ipv4Addr> {
        self.projection().map(|p| p.self_entry.host_ip)
    }

    /// This agent's own overlay address, prefix stripped.
    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.projection().map(|p| p.self_entry.ip.addr())
    }
}
