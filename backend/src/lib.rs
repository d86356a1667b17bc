// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The overlay reconcilers.
//!
//! On every refresh a backend computes the kernel state the current
//! inventory calls for, reads what is actually installed, and applies the
//! minimal mutation sequence to converge. The IPsec variant programs XFRM
//! policies and drives the IKE daemon; the VXLAN variant programs routes,
//! ARP neighbors and forwarding-database entries on the tunnel link.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod ipsec;
pub mod vxlan;

use overlay_ike::{ControlClient, IkeError};
use overlay_kernel::xfrm::XfrmSocket;
use overlay_kernel::{KernelError, Netlink};
use overlay_store::{Store, StoreError};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// The reasons a reconcile may fail.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The inventory could not be reloaded.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A kernel operation failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),
    /// The IKE daemon could not be driven.
    #[error(transparent)]
    Ike(#[from] IkeError),
    /// The inventory is unusable for reconciliation.
    #[error("classification: {0}")]
    Classification(String),
    /// Some mutations of one table failed; the rest were still attempted.
    #[error("{failures} {table} mutation(s) failed, first: {first}")]
    Table {
        /// Which table.
        table: &'static str,
        /// How many mutations failed.
        failures: usize,
        /// The first failure.
        #[source]
        first: Box<BackendError>,
    },
}

/// The active overlay backend, as the supervisor sees it.
pub enum Backend<S> {
    /// IPsec/ESP transport via the IKE daemon and XFRM policies.
    Ipsec(ipsec::IpsecOverlay<S, XfrmSocket, ControlClient>),
    /// VXLAN encapsulation via the tunnel link.
    Vxlan(vxlan::VxlanOverlay<S, Netlink>),
}

impl<S: Store + 'static> Backend<S> {
    /// Bring the backend up.
    ///
    /// For IPsec this spawns the daemon task (launch or attach supervision,
    /// surfacing its terminal error on `errors`) and indexes the connections
    /// already loaded. For VXLAN it disables TX offload and runs a
    /// best-effort initial reconcile; the supervisor's explicit reload right
    /// after is the hard one.
    ///
    /// # Errors
    ///
    /// Propagates IPsec connection indexing failures; they are fatal.
    pub async fn start(
        &self,
        launch: bool,
        charon_log: Option<PathBuf>,
        errors: mpsc::Sender<BackendError>,
    ) -> Result<(), BackendError> {
        match self {
            Backend::Ipsec(overlay) => {
                let client = overlay.control_client().clone();
                let debug = tracing::enabled!(tracing::Level::DEBUG);
                tokio::spawn(async move {
                    let error = if launch {
                        overlay_ike::daemon::run(charon_log.as_deref(), debug).await
                    } else {
                        overlay_ike::daemon::monitor(&client).await
                    };
                    let _ = errors.send(error.into()).await;
                });
                overlay.load_conns().await
            }
            Backend::Vxlan(overlay) => {
                overlay.start().await;
                Ok(())
            }
        }
    }

    /// Reload the inventory and reconcile the kernel against it.
    ///
    /// # Errors
    ///
    /// Surfaces the first error of the cycle; later best-effort work was
    /// still attempted.
    pub async fn reload(&self) -> Result<(), BackendError> {
        match self {
            Backend::Ipsec(overlay) => overlay.reload().await,
            Backend::Vxlan(overlay) => overlay.reload().await,
        }
    }

    /// Classify an IP as remote, per the classifier this backend maintains.
    #[must_use]
    pub fn is_remote(&self, ip: Ipv4Addr) -> bool {
        match self {
            Backend::Ipsec(overlay) => overlay.is_remote(ip),
            Backend::Vxlan(overlay) => overlay.classifier().reader().is_remote(ip),
        }
    }
}

/// Record `error` as the cycle's outcome if it is the first one, and keep
/// going; best-effort work continues after a failure.
fn record_first(first: &mut Option<BackendError>, error: BackendError, context: &str) {
    tracing::error!("{context}: {error}");
    if first.is_none() {
        *first = Some(error);
    }
}
