// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The ARP responder.
//!
//! Captures ARP requests on the host interface and answers those whose
//! target IP the active classifier reports as remote, supplying this host's
//! own link-layer address so traffic is drawn into the overlay path.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

mod socket;

pub use socket::ArpSocket;

use overlay_net::arp::{ArpFrame, Operation};
use overlay_net::Mac;
use overlay_store::{ClassifierReader, Store};
use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Failures of the responder task. All of them are terminal.
#[derive(Debug, Error)]
pub enum ArpError {
    /// The capture interface does not exist.
    #[error("interface {0} not found")]
    InterfaceNotFound(String),
    /// Socket setup or I/O failed.
    #[error("arp socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote-membership classification, as the responder consumes it.
///
/// The IPsec backend answers from the store's projection; the VXLAN backend
/// from its own published classification sets.
pub trait Classify: Send {
    /// True iff `ip` belongs to a container hosted elsewhere.
    fn is_remote(&self, ip: Ipv4Addr) -> bool;
}

impl Classify for ClassifierReader {
    fn is_remote(&self, ip: Ipv4Addr) -> bool {
        ClassifierReader::is_remote(self, ip)
    }
}

impl<S: Store> Classify for Arc<S> {
    fn is_remote(&self, ip: Ipv4Addr) -> bool {
        Store::is_remote(self.as_ref(), ip)
    }
}

/// Decide what to answer for one captured frame.
///
/// Returns the reply frame for ARP requests addressed to broadcast or to
/// this interface whose target the classifier puts on a remote host; `None`
/// drops the frame.
#[must_use]
pub fn handle_frame<C: Classify>(frame: &[u8], our_mac: Mac, classifier: &C) -> Option<Vec<u8>> {
    let request = ArpFrame::parse(frame).ok()?;
    if request.operation != Operation::Request {
        return None;
    }
    if !request.destination.is_broadcast() && request.destination != our_mac {
        return None;
    }
    debug!(target = %request.target_ip, "arp request");
    if !classifier.is_remote(request.target_ip) {
        return None;
    }
    debug!(target = %request.target_ip, "sending arp reply");
    Some(request.reply(our_mac))
}

/// Capture ARP requests on `iface` and answer for remote overlay IPs.
///
/// Runs until the socket fails; a read error is terminal and surfaces
/// through the supervisor's error channel.
///
/// # Errors
///
/// Returns [`ArpError`] on socket setup failures and read/write errors.
pub async fn serve<C: Classify>(iface: &str, classifier: C) -> Result<Infallible, ArpError> {
    let socket = ArpSocket::bind(iface)?;
    info!("listening for ARP requests on {iface}");
    let mut buf = [0u8; 1514];
    loop {
        let len = socket.recv(&mut buf).await?;
        if let Some(reply) = handle_frame(&buf[..len], socket.mac(), &classifier) {
            socket.send(&reply).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{handle_frame, Classify};
    use overlay_net::arp::{ArpFrame, Operation};
    use overlay_net::Mac;
    use std::net::Ipv4Addr;

    struct FixedClassifier(Vec<Ipv4Addr>);

    impl Classify for FixedClassifier {
        fn is_remote(&self, ip: Ipv4Addr) -> bool {
            self.0.contains(&ip)
        }
    }

    fn our_mac() -> Mac {
        Mac([0x02, 0x42, 0xac, 0x11, 0x00, 0x02])
    }

    fn requester() -> Mac {
        Mac([0x52, 0x54, 0x00, 0x12, 0x34, 0x56])
    }

    fn classifier() -> FixedClassifier {
        FixedClassifier(vec![Ipv4Addr::new(10, 42, 2, 2)])
    }

    #[test]
    fn answers_for_remote_targets_with_our_mac() {
        let request = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 2, 2),
        );
        let reply = handle_frame(&request, our_mac(), &classifier()).unwrap();
        let reply = ArpFrame::parse(&reply).unwrap();
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.sender_mac, our_mac());
        assert_eq!(reply.sender_ip, Ipv4Addr::new(10, 42, 2, 2));
        assert_eq!(reply.destination, requester());
    }

    #[test]
    fn drops_requests_for_local_ips() {
        // 10.42.1.1 is local, so the responder must stay silent
        let request = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 9),
            Ipv4Addr::new(10, 42, 1, 1),
        );
        assert!(handle_frame(&request, our_mac(), &classifier()).is_none());
    }

    #[test]
    fn drops_requests_for_unknown_ips() {
        let request = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 9, 9),
        );
        assert!(handle_frame(&request, our_mac(), &classifier()).is_none());
    }

    #[test]
    fn drops_replies_and_foreign_destinations() {
        let request = ArpFrame::request(
            requester(),
            Ipv4Addr::new(10, 42, 1, 1),
            Ipv4Addr::new(10, 42, 2, 2),
        );
        let reply = handle_frame(&request, our_mac(), &classifier()).unwrap();
        // a reply frame must not trigger another reply
        assert!(handle_frame(&reply, our_mac(), &classifier()).is_none());

        // unicast request addressed to some other station
        let mut foreign = request;
        foreign[0..6].copy_from_slice(&[0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc]);
        assert!(handle_frame(&foreign, our_mac(), &classifier()).is_none());
    }

    #[test]
    fn drops_garbage() {
        assert!(handle_frame(&[0u8; 4], our_mac(), &classifier()).is_none());
    }
}
