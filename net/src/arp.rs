// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet/IPv4 ARP frame codec.
//!
//! Only the fixed 28-byte Ethernet/IPv4 payload layout of RFC 826 is
//! supported; that is the one hardware/protocol pairing the responder ever
//! sees on the host interface.

use crate::mac::Mac;
use std::net::Ipv4Addr;

/// ARP over ethernet ethertype.
pub const ETHERTYPE_ARP: u16 = 0x0806;

const HARDWARE_ETHERNET: u16 = 1;
const PROTOCOL_IPV4: u16 = 0x0800;

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_PAYLOAD_LEN: usize = 28;

/// ARP operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Who-has request.
    Request,
    /// Is-at reply.
    Reply,
    /// Any operation the responder does not handle.
    Other(u16),
}

impl From<u16> for Operation {
    fn from(value: u16) -> Self {
        match value {
            1 => Operation::Request,
            2 => Operation::Reply,
            other => Operation::Other(other),
        }
    }
}

impl From<Operation> for u16 {
    fn from(value: Operation) -> Self {
        match value {
            Operation::Request => 1,
            Operation::Reply => 2,
            Operation::Other(other) => other,
        }
    }
}

/// A parsed ARP frame: the ethernet header fields the responder filters on
/// plus the full ARP payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpFrame {
    /// Ethernet destination address.
    pub destination: Mac,
    /// Ethernet source address.
    pub source: Mac,
    /// ARP operation.
    pub operation: Operation,
    /// Sender hardware address.
    pub sender_mac: Mac,
    /// Sender protocol address.
    pub sender_ip: Ipv4Addr,
    /// Target hardware address.
    pub target_mac: Mac,
    /// Target protocol address.
    pub target_ip: Ipv4Addr,
}

/// Errors which can occur while parsing an [`ArpFrame`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArpParseError {
    /// Frame shorter than ethernet header + ARP payload
    #[error("frame truncated: {0} bytes")]
    Truncated(usize),
    /// Ethertype other than ARP
    #[error("not an arp frame (ethertype {0:#06x})")]
    NotArp(u16),
    /// Hardware/protocol pairing other than ethernet/IPv4
    #[error("unsupported hardware/protocol pairing ({hardware:#06x}/{protocol:#06x})")]
    UnsupportedPairing {
        /// Hardware address space.
        hardware: u16,
        /// Protocol address space.
        protocol: u16,
    },
}

fn mac_at(buf: &[u8], at: usize) -> Mac {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&buf[at..at + 6]);
    Mac(octets)
}

fn ipv4_at(buf: &[u8], at: usize) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    octets.copy_from_slice(&buf[at..at + 4]);
    Ipv4Addr::from(octets)
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

impl ArpFrame {
    /// Parse a raw ethernet frame as an ARP frame.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated frames, non-ARP ethertypes, and
    /// hardware/protocol pairings other than ethernet/IPv4.
    pub fn parse(frame: &[u8]) -> Result<ArpFrame, ArpParseError> {
        if frame.len() < ETHERNET_HEADER_LEN + ARP_PAYLOAD_LEN {
            return Err(ArpParseError::Truncated(frame.len()));
        }
        let ethertype = u16_at(frame, 12);
        if ethertype != ETHERTYPE_ARP {
            return Err(ArpParseError::NotArp(ethertype));
        }
        let payload = &frame[ETHERNET_HEADER_LEN..];
        let hardware = u16_at(payload, 0);
        let protocol = u16_at(payload, 2);
        if hardware != HARDWARE_ETHERNET || protocol != PROTOCOL_IPV4 {
            return Err(ArpParseError::UnsupportedPairing { hardware, protocol });
        }
        Ok(ArpFrame {
            destination: mac_at(frame, 0),
            source: mac_at(frame, 6),
            operation: Operation::from(u16_at(payload, 6)),
            sender_mac: mac_at(payload, 8),
            sender_ip: ipv4_at(payload, 14),
            target_mac: mac_at(payload, 18),
            target_ip: ipv4_at(payload, 24),
        })
    }

    /// Build the is-at reply answering this request on behalf of the target.
    ///
    /// The reply is unicast back to the requester and claims `sender_mac` as
    /// the hardware address owning the queried IP.
    #[must_use]
    pub fn reply(&self, sender_mac: Mac) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + ARP_PAYLOAD_LEN);
        frame.extend_from_slice(&self.source.0);
        frame.extend_from_slice(&sender_mac.0);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
        frame.extend_from_slice(&PROTOCOL_IPV4.to_be_bytes());
        frame.push(6);
        frame.push(4);
        frame.extend_from_slice(&u16::from(Operation::Reply).to_be_bytes());
        frame.extend_from_slice(&sender_mac.0);
        frame.extend_from_slice(&self.target_ip.octets());
        frame.extend_from_slice(&self.sender_mac.0);
        frame.extend_from_slice(&self.sender_ip.octets());
        frame
    }

    /// Build a who-has request frame. Mostly useful for tests and tooling.
    #[must_use]
    pub fn request(source: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + ARP_PAYLOAD_LEN);
        frame.extend_from_slice(&Mac::BROADCAST.0);
        frame.extend_from_slice(&source.0);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
        frame.extend_from_slice(&PROTOCOL_IPV4.to_be_bytes());
        frame.push(6);
        frame.push(4);
        frame.extend_from_slice(&u16::from(Operation::Request).to_be_bytes());
        frame.extend_from_slice(&source.0);
        frame.extend_from_slice(&sender_ip.octets());
        frame.extend_from_slice(&Mac::ZERO.0);
        frame.extend_from_slice(&target_ip.octets());
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::{ArpFrame, ArpParseError, Operation};
    use crate::mac::Mac;
    use std::net::Ipv4Addr;

    fn requester() -> Mac {
        Mac([0x52, 0x54, 0x00, 0x12, 0x34, 0x56])
    }

    #[test]
    fn parses_request_frames() {
        let raw = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 2, 2),
        );
        let frame = ArpFrame::parse(&raw).unwrap();
        assert_eq!(frame.operation, Operation::Request);
        assert_eq!(frame.destination, Mac::BROADCAST);
        assert_eq!(frame.sender_mac, requester());
        assert_eq!(frame.sender_ip, Ipv4Addr::new(10, 42, 1, 1));
        assert_eq!(frame.target_ip, Ipv4Addr::new(10, 42, 2, 2));
    }

    #[test]
    fn reply_swaps_roles_and_claims_target_ip() {
        let our_mac = Mac([0x0e, 0x00, 0x0a, 0x2a, 0x01, 0x01]);
        let raw = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 2, 2),
        );
        let request = ArpFrame::parse(&raw).unwrap();
        let reply = ArpFrame::parse(&request.reply(our_mac)).unwrap();
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.destination, requester());
        assert_eq!(reply.source, our_mac);
        assert_eq!(reply.sender_mac, our_mac);
        assert_eq!(reply.sender_ip, Ipv4Addr::new(10, 42, 2, 2));
        assert_eq!(reply.target_mac, requester());
        assert_eq!(reply.target_ip, Ipv4Addr::new(10, 42, 1, 1));
    }

    #[test]
    fn rejects_truncated_and_foreign_frames() {
        assert_eq!(ArpFrame::parse(&[0u8; 10]), Err(ArpParseError::Truncated(10)));
        let mut raw = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 2, 2),
        );
        raw[12] = 0x08;
        raw[13] = 0x00;
        assert_eq!(ArpFrame::parse(&raw), Err(ArpParseError::NotArp(0x0800)));
    }
}
