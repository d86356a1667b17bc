// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! XFRM-family netlink transport.
//!
//! rtnetlink does not cover the XFRM family, so policies are marshalled onto
//! `netlink-packet-xfrm` messages and exchanged over a dedicated
//! `netlink-sys` socket. Each operation opens its own socket and runs on the
//! blocking pool; the reconciler serializes calls anyway.

use crate::error::KernelError;
use crate::xfrm::{PolicyDirection, XfrmPolicy};
use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP,
    NLM_F_REQUEST,
};
use netlink_packet_xfrm::constants::{
    XFRM_INF, XFRM_MODE_TUNNEL, XFRM_POLICY_ALLOW, XFRM_POLICY_FWD, XFRM_POLICY_IN,
    XFRM_POLICY_OUT,
};
use netlink_packet_xfrm::policy::{DelGetMessage, ModifyMessage};
use netlink_packet_xfrm::{Address, UserTemplate, XfrmAttrs, XfrmMessage};
use netlink_sys::protocols::NETLINK_XFRM;
use netlink_sys::{Socket, SocketAddr};
use overlay_net::CidrV4;
use std::net::Ipv4Addr;
use tracing::debug;

const IPPROTO_ESP: u8 = 50;
const AF_INET: u16 = libc::AF_INET as u16;

/// XFRM policy access.
#[derive(Clone, Copy, Debug, Default)]
pub struct XfrmSocket;

impl XfrmSocket {
    /// Create the transport.
    #[must_use]
    pub fn new() -> XfrmSocket {
        XfrmSocket
    }

    /// The policies currently installed, restricted to the IN/OUT/FWD
    /// directions, keyed by structural key.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Xfrm`] on transport or decode failures.
    pub async fn policies(
        &self,
    ) -> Result<std::collections::HashMap<String, XfrmPolicy>, KernelError> {
        let listed = tokio::task::spawn_blocking(dump_policies)
            .await
            .map_err(|e| KernelError::Xfrm(e.to_string()))??;
        Ok(listed
            .into_iter()
            .map(|policy| (policy.key(), policy))
            .collect())
    }

    /// Install a policy.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Xfrm`] when the kernel rejects it.
    pub async fn add(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        let policy = policy.clone();
        tokio::task::spawn_blocking(move || add_policy(&policy))
            .await
            .map_err(|e| KernelError::Xfrm(e.to_string()))?
    }

    /// Delete a policy.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Xfrm`] when the kernel rejects it.
    pub async fn del(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        let policy = policy.clone();
        tokio::task::spawn_blocking(move || del_policy(&policy))
            .await
            .map_err(|e| KernelError::Xfrm(e.to_string()))?
    }
}

fn direction_to_wire(direction: PolicyDirection) -> u8 {
    match direction {
        PolicyDirection::In => XFRM_POLICY_IN,
        PolicyDirection::Out => XFRM_POLICY_OUT,
        PolicyDirection::Fwd => XFRM_POLICY_FWD,
    }
}

fn direction_from_wire(direction: u8) -> Option<PolicyDirection> {
    match direction {
        XFRM_POLICY_IN => Some(PolicyDirection::In),
        XFRM_POLICY_OUT => Some(PolicyDirection::Out),
        XFRM_POLICY_FWD => Some(PolicyDirection::Fwd),
        _ => None,
    }
}

fn open_socket() -> Result<Socket, KernelError> {
    let mut socket = Socket::new(NETLINK_XFRM).map_err(|e| KernelError::Xfrm(e.to_string()))?;
    socket
        .bind_auto()
        .map_err(|e| KernelError::Xfrm(e.to_string()))?;
    socket
        .connect(&SocketAddr::new(0, 0))
        .map_err(|e| KernelError::Xfrm(e.to_string()))?;
    Ok(socket)
}

fn send(socket: &Socket, message: &mut NetlinkMessage<XfrmMessage>) -> Result<(), KernelError> {
    message.finalize();
    let mut buf = vec![0u8; message.buffer_len()];
    message.serialize(&mut buf);
    socket
        .send(&buf, 0)
        .map_err(|e| KernelError::Xfrm(e.to_string()))?;
    Ok(())
}

/// Drain responses until ack/done, feeding inner messages to `on_message`.
fn receive(
    socket: &Socket,
    mut on_message: impl FnMut(XfrmMessage),
) -> Result<(), KernelError> {
    loop {
        let (buf, _) = socket
            .recv_from_full()
            .map_err(|e| KernelError::Xfrm(e.to_string()))?;
        let mut offset = 0;
        while offset < buf.len() {
            let message: NetlinkMessage<XfrmMessage> =
                NetlinkMessage::deserialize(&buf[offset..])
                    .map_err(|e| KernelError::Xfrm(e.to_string()))?;
            let length = message.header.length as usize;
            match message.payload {
                NetlinkPayload::Done(_) => return Ok(()),
                NetlinkPayload::Error(err) => {
                    return match err.code {
                        None => Ok(()),
                        Some(code) => Err(KernelError::Xfrm(format!(
                            "kernel refused the request: errno {code}"
                        ))),
                    };
                }
                NetlinkPayload::InnerMessage(inner) => on_message(inner),
                _ => {}
            }
            if length == 0 {
                break;
            }
            offset += length;
        }
    }
}

fn selector(src: CidrV4, dst: CidrV4) -> netlink_packet_xfrm::Selector {
    let mut sel = netlink_packet_xfrm::Selector::default();
    sel.daddr = Address::from_ipv4(&dst.addr());
    sel.saddr = Address::from_ipv4(&src.addr());
    sel.prefixlen_d = dst.prefix_len();
    sel.prefixlen_s = src.prefix_len();
    sel.family = AF_INET;
    sel
}

fn template(tmpl_src: Ipv4Addr, tmpl_dst: Ipv4Addr, req_id: u32) -> UserTemplate {
    let mut tmpl = UserTemplate::default();
    tmpl.id.daddr = Address::from_ipv4(&tmpl_dst);
    tmpl.id.proto = IPPROTO_ESP;
    tmpl.saddr = Address::from_ipv4(&tmpl_src);
    tmpl.family = AF_INET;
    tmpl.reqid = req_id;
    tmpl.mode = XFRM_MODE_TUNNEL;
    tmpl.aalgos = u32::MAX;
    tmpl.ealgos = u32::MAX;
    tmpl.calgos = u32::MAX;
    tmpl
}

fn add_policy(policy: &XfrmPolicy) -> Result<(), KernelError> {
    debug!(key = %policy.key(), "adding xfrm policy");
    let mut body = ModifyMessage::default();
    body.user_policy_info.sel = selector(policy.src, policy.dst);
    body.user_policy_info.priority = policy.priority;
    body.user_policy_info.dir = direction_to_wire(policy.direction);
    body.user_policy_info.action = XFRM_POLICY_ALLOW;
    body.user_policy_info.lft.soft_byte_limit = XFRM_INF;
    body.user_policy_info.lft.hard_byte_limit = XFRM_INF;
    body.user_policy_info.lft.soft_packet_limit = XFRM_INF;
    body.user_policy_info.lft.hard_packet_limit = XFRM_INF;
    body.nlas.push(XfrmAttrs::TemplateList(vec![template(
        policy.tmpl_src,
        policy.tmpl_dst,
        policy.req_id,
    )]));

    let mut message = NetlinkMessage::from(XfrmMessage::AddPolicy(body));
    message.header = NetlinkHeader::default();
    message.header.flags = NLM_F_REQUEST | NLM_F_CREATE | NLM_F_ACK;

    let socket = open_socket()?;
    send(&socket, &mut message)?;
    receive(&socket, |_| {})
}

fn del_policy(policy: &XfrmPolicy) -> Result<(), KernelError> {
    debug!(key = %policy.key(), "deleting xfrm policy");
    let mut body = DelGetMessage::default();
    body.user_policy_id.sel = selector(policy.src, policy.dst);
    body.user_policy_id.dir = direction_to_wire(policy.direction);

    let mut message = NetlinkMessage::from(XfrmMessage::DeletePolicy(body));
    message.header = NetlinkHeader::default();
    message.header.flags = NLM_F_REQUEST | NLM_F_ACK;

    let socket = open_socket()?;
    send(&socket, &mut message)?;
    receive(&socket, |_| {})
}

fn dump_policies() -> Result<Vec<XfrmPolicy>, KernelError> {
    let mut message = NetlinkMessage::from(XfrmMessage::GetPolicy(DelGetMessage::default()));
    message.header = NetlinkHeader::default();
    message.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

    let socket = open_socket()?;
    send(&socket, &mut message)?;

    let mut policies = Vec::new();
    receive(&socket, |inner| {
        if let XfrmMessage::NewPolicy(body) = inner {
            if let Some(policy) = decode_policy(&body) {
                policies.push(policy);
            }
        }
    })?;
    Ok(policies)
}

fn decode_policy(body: &ModifyMessage) -> Option<XfrmPolicy> {
    let direction = direction_from_wire(body.user_policy_info.dir)?;
    let sel = &body.user_policy_info.sel;
    if sel.family != AF_INET {
        return None;
    }
    let src = CidrV4::new(sel.saddr.to_ipv4()?, sel.prefixlen_s).ok()?;
    let dst = CidrV4::new(sel.daddr.to_ipv4()?, sel.prefixlen_d).ok()?;
    let template = body.nlas.iter().find_map(|nla| match nla {
        XfrmAttrs::TemplateList(templates) => templates.first(),
        _ => None,
    })?;
    Some(XfrmPolicy {
        direction,
        src,
        dst,
        tmpl_src: template.saddr.to_ipv4()?,
        tmpl_dst: template.id.daddr.to_ipv4()?,
        req_id: template.reqid,
        priority: body.user_policy_info.priority,
    })
}
