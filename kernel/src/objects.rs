// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use derive_builder::Builder;
use overlay_net::{CidrV4, InterfaceName, Mac, Vni};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// The intended state of the VXLAN tunnel link.
///
/// Learning is disabled (membership comes from inventory, not flooding),
/// proxy mode and the miss notifications are enabled so the kernel answers
/// and reports ARP misses, and route short-circuiting is on.
#[derive(Builder, Clone, Debug, PartialEq, Eq)]
pub struct VtepSpec {
    /// Name of the tunnel link.
    pub name: InterfaceName,
    /// VXLAN network identifier.
    pub vni: Vni,
    /// UDP port carrying the encapsulated traffic.
    pub port: u16,
    /// Link MTU.
    #[builder(default = "1500")]
    pub mtu: u32,
    /// Link-layer address, derived from the agent's overlay IP.
    pub mac: Mac,
}

/// An observed link, identified by its kernel interface index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkRef {
    /// Kernel interface index.
    pub index: u32,
}

/// Observed or desired /32 routes out of the tunnel link, keyed by bare IP.
pub type RouteTable = HashMap<Ipv4Addr, CidrV4>;

/// Observed or desired neighbor entries on the tunnel link, keyed by IP.
///
/// With the IPv4 family these are ARP entries (container IP to peer MAC);
/// with the bridge family they are forwarding-database entries (peer MAC
/// reachable at host IP).
pub type NeighborTable = HashMap<Ipv4Addr, Mac>;
