// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed link-layer and overlay-addressing primitives shared by the agent.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod arp;
pub mod cidr;
pub mod iface;
pub mod mac;
pub mod vni;

pub use cidr::CidrV4;
pub use iface::InterfaceName;
pub use mac::Mac;
pub use vni::Vni;
