// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The XFRM policy triple guarding one remote container.

use overlay_kernel::xfrm::{PolicyDirection, XfrmPolicy};
use overlay_net::CidrV4;
use overlay_store::Entry;
use std::net::Ipv4Addr;

/// Priority shared by every policy the agent installs.
pub const POLICY_PRIORITY: u32 = 10_000;

/// Request id binding every policy to the per-peer SA pair.
pub const POLICY_REQ_ID: u32 = 1234;

/// The OUT/IN/FWD policies for a remote container.
///
/// OUT matches the self subnet towards the container /32 and transforms into
/// the ESP tunnel from this agent to the remote host; IN and FWD mirror it
/// for the return path.
#[must_use]
pub fn policy_triple(entry: &Entry, local_ip: Ipv4Addr) -> [XfrmPolicy; 3] {
    let subnet = entry.ip.network();
    let container = CidrV4::host(entry.bare_ip());
    let remote_host = entry.host_ip;

    let out = XfrmPolicy {
        direction: PolicyDirection::Out,
        src: subnet,
        dst: container,
        tmpl_src: local_ip,
        tmpl_dst: remote_host,
        req_id: POLICY_REQ_ID,
        priority: POLICY_PRIORITY,
    };
    let r#in = XfrmPolicy {
        direction: PolicyDirection::In,
        src: container,
        dst: subnet,
        tmpl_src: remote_host,
        tmpl_dst: local_ip,
        req_id: POLICY_REQ_ID,
        priority: POLICY_PRIORITY,
    };
    let fwd = XfrmPolicy {
        direction: PolicyDirection::Fwd,
        ..r#in.clone()
    };
    [out, r#in, fwd]
}
