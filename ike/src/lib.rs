// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The IKE daemon collaborator.
//!
//! The daemon (charon) negotiates SAs and installs them in the kernel; this
//! crate holds everything the agent needs to drive it: the typed connection
//! documents, the template store they are instantiated from, the
//! control-socket client, and the launch/attach process supervisor.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

mod client;
pub mod daemon;
mod error;
mod proto;
mod templates;

pub use client::{ControlClient, RetryPolicy};
pub use error::IkeError;
pub use proto::{AuthSection, ChildSa, IkeConnection, Request, Response, SharedKey};
pub use templates::TemplateStore;

/// The daemon's default control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/charon.vici";

/// Where the daemon records its PID.
pub const PID_FILE_PATH: &str = "/var/run/charon.pid";

/// Owner string loading a key for any peer.
pub const WILDCARD_KEY_OWNER: &str = "any";
