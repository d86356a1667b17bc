// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed XFRM policies and their structural diff key.

mod socket;

pub use socket::XfrmSocket;

use overlay_net::CidrV4;
use std::fmt::Display;
use std::net::Ipv4Addr;

/// Direction an XFRM policy applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyDirection {
    /// Inbound traffic.
    In,
    /// Outbound traffic.
    Out,
    /// Forwarded traffic.
    Fwd,
}

impl Display for PolicyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyDirection::In => write!(f, "in"),
            PolicyDirection::Out => write!(f, "out"),
            PolicyDirection::Fwd => write!(f, "fwd"),
        }
    }
}

/// An XFRM policy with a single ESP tunnel-mode template.
///
/// This is the selector the kernel matches traffic on plus the transform
/// endpoints; the negotiated state it binds to is identified by the
/// request id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct XfrmPolicy {
    /// Policy direction.
    pub direction: PolicyDirection,
    /// Source subnet selector.
    pub src: CidrV4,
    /// Destination subnet selector.
    pub dst: CidrV4,
    /// Template (outer tunnel) source address.
    pub tmpl_src: Ipv4Addr,
    /// Template (outer tunnel) destination address.
    pub tmpl_dst: Ipv4Addr,
    /// Request id binding the policy to its SA pair.
    pub req_id: u32,
    /// Policy priority.
    pub priority: u32,
}

impl XfrmPolicy {
    /// The structural key policies are diffed by.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            self.direction, self.src, self.dst, self.tmpl_src, self.tmpl_dst, self.req_id
        )
    }
}
