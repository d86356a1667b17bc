// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use overlay_net::CidrV4;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// The normalized inventory record for one container.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Overlay address in CIDR form.
    pub ip: CidrV4,
    /// Physical address of the host running the container.
    #[serde(rename = "hostIp")]
    pub host_ip: Ipv4Addr,
    /// This agent's own container.
    #[serde(rename = "self", default)]
    pub is_self: bool,
    /// The container runs a sibling agent, i.e. a tunnel endpoint.
    #[serde(rename = "peer", default)]
    pub is_peer: bool,
}

impl Entry {
    /// The bare overlay address, prefix stripped: the key of every derived map.
    #[must_use]
    pub fn bare_ip(&self) -> Ipv4Addr {
        self.ip.addr()
    }
}
