// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::entry::Entry;
use crate::error::StoreError;
use crate::metadata::{Container, Host, MetadataClient, Network, Service};
use crate::projection::{Projection, SharedProjection};
use crate::Store;
use overlay_net::CidrV4;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Live inventory view over the metadata service.
///
/// Each reload fetches the full record set and projects it into classified
/// entries; on failure the previous projection is retained.
pub struct MetadataStore<C> {
    client: C,
    shared: SharedProjection,
}

impl<C: MetadataClient> MetadataStore<C> {
    /// A store projecting the records served by `client`.
    pub fn new(client: C) -> MetadataStore<C> {
        MetadataStore {
            client,
            shared: SharedProjection::new(),
        }
    }

    /// The underlying metadata client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn fetch(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            self_container: self.client.self_container().await?,
            self_host: self.client.self_host().await?,
            self_service: self.client.self_service().await?,
            containers: self.client.containers().await?,
            services: self.client.services().await?,
            hosts: self.client.hosts().await?,
            networks: self.client.networks().await?,
        })
    }
}

impl<C: MetadataClient> Store for MetadataStore<C> {
    async fn reload(&self) -> Result<(), StoreError> {
        let snapshot = self.fetch().await?;
        let entries = project(&snapshot)?;
        debug!(count = entries.len(), "projected metadata inventory");
        let projection = Projection::build(entries, None)?;
        self.shared.publish(projection);
        Ok(())
    }

    fn projection(&self) -> Option<Arc<Projection>> {
        self.shared.snapshot()
    }
}

/// One fetch worth of raw metadata records.
struct Snapshot {
    self_container: Container,
    #[allow(dead_code)] // presence is the readiness check
    self_host: Host,
    self_service: Service,
    containers: Vec<Container>,
    services: Vec<Service>,
    hosts: Vec<Host>,
    networks: Vec<Network>,
}

/// Index services by qualified `stack/name`, excluding the agent's own
/// service. Names are not unique, hence the vector values. Only system
/// services participate.
fn services_by_qualified_name<'a>(
    services: &'a [Service],
    self_service: &Service,
) -> HashMap<String, Vec<&'a Service>> {
    let mut by_name: HashMap<String, Vec<&Service>> = HashMap::new();
    for service in services {
        if !service.system || service.uuid == self_service.uuid {
            continue;
        }
        by_name.entry(service.qualified_name()).or_default().push(service);
    }
    by_name
}

/// Walk the service-link graph and collect the peer containers it reaches,
/// along with their network UUIDs.
///
/// If the agent's service declares outgoing links those are followed;
/// otherwise every system service linking *to* it is enumerated, treating
/// incoming links as bidirectional for membership purposes.
fn linked_peers<'a>(
    snapshot: &'a Snapshot,
    by_name: &HashMap<String, Vec<&'a Service>>,
    networks: &HashMap<&str, &Network>,
    self_network: &Network,
) -> (HashSet<String>, Vec<&'a Container>) {
    let linked_services: Vec<&Service> = if snapshot.self_service.links.is_empty() {
        let self_name = snapshot.self_service.qualified_name();
        by_name
            .values()
            .flatten()
            .filter(|service| service.links.contains_key(&self_name))
            .copied()
            .collect()
    } else {
        snapshot
            .self_service
            .links
            .keys()
            .filter_map(|name| {
                let services = by_name.get(name);
                if services.is_none() {
                    warn!(link = %name, "linked service not found in inventory");
                }
                services
            })
            .flatten()
            .copied()
            .collect()
    };

    let mut peer_networks = HashSet::new();
    let mut peer_containers = Vec::new();
    for service in linked_services {
        for container in &service.containers {
            if !container.is_active() {
                continue;
            }
            let same_name = networks
                .get(container.network_uuid.as_str())
                .is_some_and(|network| network.name == self_network.name);
            if !same_name {
                continue;
            }
            peer_networks.insert(container.network_uuid.clone());
            peer_containers.push(container);
        }
    }
    (peer_networks, peer_containers)
}

/// Project raw metadata records into inventory entries.
fn project(snapshot: &Snapshot) -> Result<Vec<Entry>, StoreError> {
    let hosts: HashMap<&str, &Host> = snapshot
        .hosts
        .iter()
        .map(|h| (h.uuid.as_str(), h))
        .collect();
    let networks: HashMap<&str, &Network> = snapshot
        .networks
        .iter()
        .map(|n| (n.uuid.as_str(), n))
        .collect();

    let self_network = networks
        .get(snapshot.self_container.network_uuid.as_str())
        .copied()
        .ok_or_else(|| {
            StoreError::Classification("couldn't find self network in metadata".to_string())
        })?;

    let by_name = services_by_qualified_name(&snapshot.services, &snapshot.self_service);
    let (mut peer_networks, linked_containers) =
        linked_peers(snapshot, &by_name, &networks, self_network);
    peer_networks.insert(snapshot.self_container.network_uuid.clone());

    let mut peer_ips: HashSet<&str> = linked_containers
        .iter()
        .filter(|c| !c.primary_ip.is_empty())
        .map(|c| c.primary_ip.as_str())
        .collect();
    for container in &snapshot.self_service.containers {
        if !container.is_active() || container.primary_ip.is_empty() {
            continue;
        }
        let same_name = networks
            .get(container.network_uuid.as_str())
            .is_some_and(|network| network.name == self_network.name);
        if same_name {
            peer_ips.insert(container.primary_ip.as_str());
        }
    }

    let mut entries = Vec::new();
    for container in &snapshot.containers {
        if !container.is_active()
            || !peer_networks.contains(&container.network_uuid)
            || container.primary_ip.is_empty()
            || !container.network_from_container_uuid.is_empty()
        {
            continue;
        }
        let Ok(ip) = container.primary_ip.parse::<Ipv4Addr>() else {
            warn!(container = %container.name, ip = %container.primary_ip, "skipping unparsable primary IP");
            continue;
        };
        let Some(host) = hosts.get(container.host_uuid.as_str()) else {
            warn!(container = %container.name, host = %container.host_uuid, "skipping container on unknown host");
            continue;
        };
        let Ok(host_ip) = host.agent_ip.parse::<Ipv4Addr>() else {
            warn!(host = %host.uuid, agent_ip = %host.agent_ip, "skipping container on host with unparsable agent IP");
            continue;
        };
        let prefix_len = networks
            .get(container.network_uuid.as_str())
            .map_or(crate::metadata::DEFAULT_SUBNET_PREFIX_LEN, |network| {
                network.subnet_prefix_len()
            });
        let Ok(cidr) = CidrV4::new(ip, prefix_len) else {
            continue;
        };
        entries.push(Entry {
            ip: cidr,
            host_ip,
            is_self: container.primary_ip == snapshot.self_container.primary_ip,
            is_peer: peer_ips.contains(container.primary_ip.as_str()),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::MetadataStore;
    use crate::error::StoreError;
    use crate::metadata::{Container, Host, MetadataClient, Network, Service};
    use crate::Store;
    use std::net::Ipv4Addr;

    #[derive(Clone, Default)]
    struct FakeClient {
        self_container: Container,
        self_host: Host,
        self_service: Service,
        containers: Vec<Container>,
        services: Vec<Service>,
        hosts: Vec<Host>,
        networks: Vec<Network>,
        version: String,
    }

    impl MetadataClient for FakeClient {
        async fn self_container(&self) -> Result<Container, StoreError> {
            Ok(self.self_container.clone())
        }
        async fn self_host(&self) -> Result<Host, StoreError> {
            Ok(self.self_host.clone())
        }
        async fn self_service(&self) -> Result<Service, StoreError> {
            Ok(self.self_service.clone())
        }
        async fn containers(&self) -> Result<Vec<Container>, StoreError> {
            Ok(self.containers.clone())
        }
        async fn services(&self) -> Result<Vec<Service>, StoreError> {
            Ok(self.services.clone())
        }
        async fn hosts(&self) -> Result<Vec<Host>, StoreError> {
            Ok(self.hosts.clone())
        }
        async fn networks(&self) -> Result<Vec<Network>, StoreError> {
            Ok(self.networks.clone())
        }
        async fn version(&self) -> Result<String, StoreError> {
            Ok(self.version.clone())
        }
    }

    fn container(name: &str, ip: &str, host: &str, network: &str) -> Container {
        Container {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
            primary_ip: ip.to_string(),
            host_uuid: host.to_string(),
            network_uuid: network.to_string(),
            state: "running".to_string(),
            ..Container::default()
        }
    }

    fn network(uuid: &str, name: &str) -> Network {
        Network {
            name: name.to_string(),
            uuid: uuid.to_string(),
            metadata: serde_json::json!({
                "cniConfig": {"10-overlay.conf": {"ipam": {"subnetPrefixSize": "/16"}}}
            }),
        }
    }

    fn host(uuid: &str, agent_ip: &str) -> Host {
        Host {
            name: uuid.to_string(),
            uuid: uuid.to_string(),
            agent_ip: agent_ip.to_string(),
        }
    }

    /// Two hosts, an agent container on each, one workload container each.
    fn two_host_client() -> FakeClient {
        let agent1 = container("agent1", "10.42.1.1", "host-1", "net-1");
        let agent2 = container("agent2", "10.42.2.2", "host-2", "net-1");
        let workload1 = container("web1", "10.42.1.9", "host-1", "net-1");
        let workload2 = container("web2", "10.42.2.5", "host-2", "net-1");
        let self_service = Service {
            name: "agent".to_string(),
            uuid: "svc-agent".to_string(),
            stack_name: "network".to_string(),
            system: true,
            containers: vec![agent1.clone(), agent2.clone()],
            ..Service::default()
        };
        FakeClient {
            self_container: agent1.clone(),
            self_host: host("host-1", "52.0.0.1"),
            self_service: self_service.clone(),
            containers: vec![agent1, agent2, workload1, workload2],
            services: vec![self_service],
            hosts: vec![host("host-1", "52.0.0.1"), host("host-2", "52.0.0.2")],
            networks: vec![network("net-1", "overlay")],
            version: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn projects_and_classifies_two_hosts() {
        let store = MetadataStore::new(two_host_client());
        store.reload().await.unwrap();

        assert_eq!(store.local_host_ip(), Some(Ipv4Addr::new(52, 0, 0, 1)));
        assert_eq!(store.local_ip(), Some(Ipv4Addr::new(10, 42, 1, 1)));

        let remote_agent = Ipv4Addr::new(10, 42, 2, 2);
        let remote_workload = Ipv4Addr::new(10, 42, 2, 5);
        assert!(store.is_remote(remote_agent));
        assert!(store.is_remote(remote_workload));
        assert!(!store.is_remote(Ipv4Addr::new(10, 42, 1, 9)));

        let peers = store.peer_entries();
        assert_eq!(peers.len(), 1);
        assert!(peers.contains_key(&remote_agent));
        assert_eq!(peers[&remote_agent].ip.prefix_len(), 16);
        assert_eq!(peers[&remote_agent].host_ip, Ipv4Addr::new(52, 0, 0, 2));

        let remote_non_peers = store.remote_non_peer_entries();
        assert_eq!(remote_non_peers.len(), 1);
        assert!(remote_non_peers.contains_key(&remote_workload));
    }

    #[tokio::test]
    async fn follows_outgoing_service_links() {
        let mut client = two_host_client();
        let linked_agent = container("agent3", "10.44.3.3", "host-3", "net-2");
        let linked_service = Service {
            name: "agent".to_string(),
            uuid: "svc-linked".to_string(),
            stack_name: "linked-env".to_string(),
            system: true,
            containers: vec![linked_agent.clone()],
            ..Service::default()
        };
        client
            .self_service
            .links
            .insert("linked-env/agent".to_string(), "svc-linked".to_string());
        client.services = vec![client.self_service.clone(), linked_service];
        client.containers.push(linked_agent);
        client.hosts.push(host("host-3", "52.0.0.3"));
        client.networks.push(network("net-2", "overlay"));

        let store = MetadataStore::new(client);
        store.reload().await.unwrap();

        let linked_ip = Ipv4Addr::new(10, 44, 3, 3);
        assert!(store.is_remote(linked_ip));
        assert!(store.peer_entries().contains_key(&linked_ip));
    }

    #[tokio::test]
    async fn treats_incoming_links_as_membership() {
        let mut client = two_host_client();
        let linked_agent = container("agent3", "10.44.3.3", "host-3", "net-2");
        let linking_service = Service {
            name: "agent".to_string(),
            uuid: "svc-linking".to_string(),
            stack_name: "other-env".to_string(),
            system: true,
            links: [("network/agent".to_string(), "svc-agent".to_string())]
                .into_iter()
                .collect(),
            containers: vec![linked_agent.clone()],
        };
        client.services = vec![client.self_service.clone(), linking_service];
        client.containers.push(linked_agent);
        client.hosts.push(host("host-3", "52.0.0.3"));
        client.networks.push(network("net-2", "overlay"));

        let store = MetadataStore::new(client);
        store.reload().await.unwrap();
        assert!(store.peer_entries().contains_key(&Ipv4Addr::new(10, 44, 3, 3)));
    }

    #[tokio::test]
    async fn excludes_inactive_stacked_and_foreign_containers() {
        let mut client = two_host_client();
        let mut stopped = container("stopped", "10.42.6.6", "host-2", "net-1");
        stopped.state = "stopped".to_string();
        let mut stacked = container("stacked", "10.42.7.7", "host-2", "net-1");
        stacked.network_from_container_uuid = "parent-uuid".to_string();
        let foreign = container("foreign", "192.168.0.5", "host-2", "net-other");
        let no_ip = container("noip", "", "host-2", "net-1");
        client.containers.extend([stopped, stacked, foreign, no_ip]);
        client.networks.push(network("net-other", "bridge"));

        let store = MetadataStore::new(client);
        store.reload().await.unwrap();

        for excluded in ["10.42.6.6", "10.42.7.7", "192.168.0.5"] {
            assert!(
                !store.is_remote(excluded.parse().unwrap()),
                "{excluded} must not be classified"
            );
        }
        assert_eq!(store.entries().len(), 4);
    }

    #[tokio::test]
    async fn missing_self_network_is_a_classification_error() {
        let mut client = two_host_client();
        client.networks.clear();
        let store = MetadataStore::new(client);
        assert!(matches!(
            store.reload().await,
            Err(StoreError::Classification(_))
        ));
        assert!(store.projection().is_none());
    }

    #[tokio::test]
    async fn non_system_services_do_not_participate() {
        let mut client = two_host_client();
        let linked_agent = container("agent3", "10.44.3.3", "host-3", "net-2");
        let user_service = Service {
            name: "agent".to_string(),
            uuid: "svc-user".to_string(),
            stack_name: "user-env".to_string(),
            system: false,
            links: [("network/agent".to_string(), "svc-agent".to_string())]
                .into_iter()
                .collect(),
            containers: vec![linked_agent.clone()],
        };
        client.services = vec![client.self_service.clone(), user_service];
        client.containers.push(linked_agent);
        client.hosts.push(host("host-3", "52.0.0.3"));
        client.networks.push(network("net-2", "overlay"));

        let store = MetadataStore::new(client);
        store.reload().await.unwrap();
        assert!(!store.peer_entries().contains_key(&Ipv4Addr::new(10, 44, 3, 3)));
    }
}
