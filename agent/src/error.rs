// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use overlay_arp::ArpError;
use overlay_backend::BackendError;
use overlay_ike::IkeError;
use overlay_store::StoreError;
use thiserror::Error;

/// Terminal failures of the agent and its supervised tasks.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A reconcile or backend task failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The ARP responder died.
    #[error("arp responder: {0}")]
    Arp(#[from] ArpError),
    /// The inventory store could not be constructed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The IKE daemon probe failed.
    #[error(transparent)]
    Ike(#[from] IkeError),
    /// Bootstrap I/O failed.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The command line is unusable.
    #[error("configuration: {0}")]
    Config(String),
}
