// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Desired kernel tables derived from one inventory refresh.

use overlay_net::mac::peer_mac;
use overlay_net::{CidrV4, Mac};
use overlay_kernel::{NeighborTable, RouteTable};
use overlay_store::Projection;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// The tables a VXLAN reconcile converges the kernel onto, plus the
/// classification sets published for the ARP responder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredTables {
    /// /32 unicast routes out of the tunnel link, keyed by container IP.
    pub routes: RouteTable,
    /// Permanent ARP entries, container IP to the owning host's peer-MAC.
    pub arp: NeighborTable,
    /// Bridge forwarding entries, peer host IP to its peer-MAC.
    pub fdb: NeighborTable,
    /// Container IPs hosted here.
    pub local: Vec<Ipv4Addr>,
    /// Container IPs hosted elsewhere.
    pub remote: Vec<Ipv4Addr>,
}

/// Compute the desired tables for a refresh.
///
/// Every remote peer contributes a route, an ARP entry under its own derived
/// MAC, and the forwarding entry binding that MAC to its host. Remote
/// non-peers ride the tunnel of the peer on their host: same route shape,
/// ARP answered with the *host's* peer-MAC. A remote container whose host
/// runs no peer has no tunnel endpoint and is left out of the tables,
/// though it stays classified remote.
#[must_use]
pub fn desired_tables(projection: &Projection, mac_prefix: Mac) -> DesiredTables {
    let self_host = projection.self_entry.host_ip;
    let mut tables = DesiredTables::default();

    // Host to tunnel-endpoint mapping. Deterministic: the numerically
    // smallest peer IP represents a host that runs several peers.
    let mut peers_by_host: HashMap<Ipv4Addr, Ipv4Addr> = HashMap::new();
    let mut peer_ips: Vec<Ipv4Addr> = projection.peers.keys().copied().collect();
    peer_ips.sort_unstable();
    for ip in &peer_ips {
        let entry = &projection.peers[ip];
        if entry.host_ip == self_host {
            continue;
        }
        peers_by_host.entry(entry.host_ip).or_insert(*ip);
    }

    for ip in &peer_ips {
        let entry = &projection.peers[ip];
        if entry.host_ip == self_host {
            continue;
        }
        tables.routes.insert(*ip, CidrV4::host(*ip));
        tables.arp.insert(*ip, peer_mac(mac_prefix, *ip));
        if let Some(representative) = peers_by_host.get(&entry.host_ip) {
            tables
                .fdb
                .insert(entry.host_ip, peer_mac(mac_prefix, *representative));
        }
    }

    for (ip, entry) in &projection.remote_non_peers {
        let Some(peer_ip) = peers_by_host.get(&entry.host_ip) else {
            debug!(%ip, host = %entry.host_ip, "no tunnel endpoint on host, skipping container");
            continue;
        };
        tables.routes.insert(*ip, CidrV4::host(*ip));
        tables.arp.insert(*ip, peer_mac(mac_prefix, *peer_ip));
    }

    tables.local = projection.local.keys().copied().collect();
    tables.remote = projection.remote.keys().copied().collect();
    tables
}

#[cfg(test)]
mod tests {
    use super::desired_tables;
    use overlay_net::mac::PEER_MAC_PREFIX;
    use overlay_net::Mac;
    use overlay_store::{Entry, Projection};
    use std::net::Ipv4Addr;

    fn entry(ip: &str, host: &str, is_self: bool, is_peer: bool) -> Entry {
        Entry {
            ip: ip.parse().unwrap(),
            host_ip: host.parse().unwrap(),
            is_self,
            is_peer,
        }
    }

    fn projection(entries: Vec<Entry>) -> Projection {
        Projection::build(entries, None).unwrap()
    }

    #[test]
    fn two_peers_single_network() {
        let tables = desired_tables(
            &projection(vec![
                entry("10.42.1.1/16", "52.0.0.1", true, true),
                entry("10.42.2.2/16", "52.0.0.2", false, true),
            ]),
            PEER_MAC_PREFIX,
        );

        let peer = Ipv4Addr::new(10, 42, 2, 2);
        let peer_mac = Mac([0x0e, 0x00, 0x0a, 0x2a, 0x02, 0x02]);
        assert_eq!(tables.routes.len(), 1);
        assert_eq!(tables.routes[&peer].to_string(), "10.42.2.2/32");
        assert_eq!(tables.arp.len(), 1);
        assert_eq!(tables.arp[&peer], peer_mac);
        assert_eq!(tables.fdb.len(), 1);
        assert_eq!(tables.fdb[&Ipv4Addr::new(52, 0, 0, 2)], peer_mac);
    }

    #[test]
    fn non_peer_rides_the_hosts_tunnel() {
        let tables = desired_tables(
            &projection(vec![
                entry("10.42.1.1/16", "52.0.0.1", true, true),
                entry("10.42.2.2/16", "52.0.0.2", false, true),
                entry("10.42.2.5/16", "52.0.0.2", false, false),
            ]),
            PEER_MAC_PREFIX,
        );

        let workload = Ipv4Addr::new(10, 42, 2, 5);
        let host_peer_mac = Mac([0x0e, 0x00, 0x0a, 0x2a, 0x02, 0x02]);
        assert_eq!(tables.routes.len(), 2);
        assert_eq!(tables.routes[&workload].to_string(), "10.42.2.5/32");
        // the host's peer-MAC, not one derived from the workload's own IP
        assert_eq!(tables.arp[&workload], host_peer_mac);
        // still exactly one forwarding entry for the host
        assert_eq!(tables.fdb.len(), 1);
    }

    #[test]
    fn peerless_host_is_skipped_but_stays_remote() {
        let tables = desired_tables(
            &projection(vec![
                entry("10.42.1.1/16", "52.0.0.1", true, true),
                entry("10.42.3.7/16", "52.0.0.3", false, false),
            ]),
            PEER_MAC_PREFIX,
        );

        let orphan = Ipv4Addr::new(10, 42, 3, 7);
        assert!(tables.routes.is_empty());
        assert!(tables.arp.is_empty());
        assert!(tables.fdb.is_empty());
        assert!(tables.remote.contains(&orphan));
    }

    #[test]
    fn local_containers_contribute_no_kernel_objects() {
        let tables = desired_tables(
            &projection(vec![
                entry("10.42.1.1/16", "52.0.0.1", true, true),
                entry("10.42.1.3/16", "52.0.0.1", false, true),
                entry("10.42.1.9/16", "52.0.0.1", false, false),
            ]),
            PEER_MAC_PREFIX,
        );
        assert!(tables.routes.is_empty());
        assert!(tables.arp.is_empty());
        assert!(tables.fdb.is_empty());
        assert!(tables.remote.is_empty());
        assert_eq!(tables.local.len(), 3);
    }

    #[test]
    fn empty_inventory_yields_empty_tables() {
        let tables = desired_tables(
            &projection(vec![entry("10.42.1.1/16", "52.0.0.1", true, true)]),
            PEER_MAC_PREFIX,
        );
        assert_eq!(tables, super::DesiredTables {
            local: vec![Ipv4Addr::new(10, 42, 1, 1)],
            ..super::DesiredTables::default()
        });
    }

    #[test]
    fn multiple_peers_on_one_host_share_a_forwarding_entry() {
        let tables = desired_tables(
            &projection(vec![
                entry("10.42.1.1/16", "52.0.0.1", true, true),
                entry("10.42.2.9/16", "52.0.0.2", false, true),
                entry("10.42.2.2/16", "52.0.0.2", false, true),
            ]),
            PEER_MAC_PREFIX,
        );
        // both peers answer ARP with their own MAC
        assert_eq!(tables.arp.len(), 2);
        // the forwarding entry is pinned to the smallest peer IP
        assert_eq!(
            tables.fdb[&Ipv4Addr::new(52, 0, 0, 2)],
            Mac([0x0e, 0x00, 0x0a, 0x2a, 0x02, 0x02])
        );
    }
}
