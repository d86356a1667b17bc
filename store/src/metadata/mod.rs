// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The metadata-service collaborator: typed records, the client trait, the
//! HTTP edge and the live store built on top of them.

mod http;
mod store;

pub use http::HttpMetadataClient;
pub use store::MetadataStore;

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

/// Container states that participate in the overlay.
pub const ACTIVE_STATES: [&str; 2] = ["running", "starting"];

/// A container record as served by the metadata service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    pub uuid: String,
    pub primary_ip: String,
    pub host_uuid: String,
    pub network_uuid: String,
    /// Set when the container shares another container's network namespace.
    pub network_from_container_uuid: String,
    pub state: String,
    pub service_name: String,
    pub stack_name: String,
}

impl Container {
    /// True for states in [`ACTIVE_STATES`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        ACTIVE_STATES.contains(&self.state.as_str())
    }
}

/// A service record as served by the metadata service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub name: String,
    pub uuid: String,
    pub stack_name: String,
    /// Only system-tagged services participate in the overlay.
    pub system: bool,
    /// Outgoing service links, keyed by qualified `stack/name`.
    pub links: HashMap<String, String>,
    pub containers: Vec<Container>,
}

impl Service {
    /// The qualified `stack/name` this service is linked by.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.stack_name, self.name)
    }
}

/// A host record as served by the metadata service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub name: String,
    pub uuid: String,
    pub agent_ip: String,
}

/// A network record as served by the metadata service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub name: String,
    pub uuid: String,
    /// Nested configuration; `cniConfig.*.ipam.subnetPrefixSize` carries the
    /// overlay CIDR prefix.
    pub metadata: serde_json::Value,
}

/// Fallback overlay prefix when the network carries no ipam configuration.
pub const DEFAULT_SUBNET_PREFIX_LEN: u8 = 16;

impl Network {
    /// The overlay subnet prefix length from the nested cni configuration,
    /// `/16` when absent or malformed.
    #[must_use]
    pub fn subnet_prefix_len(&self) -> u8 {
        let Some(cni_config) = self.metadata.get("cniConfig").and_then(|v| v.as_object()) else {
            return DEFAULT_SUBNET_PREFIX_LEN;
        };
        for file in cni_config.values() {
            let Some(size) = file.get("ipam").and_then(|ipam| ipam.get("subnetPrefixSize")) else {
                continue;
            };
            let parsed = match size {
                serde_json::Value::String(s) => s.trim_start_matches('/').parse::<u8>().ok(),
                serde_json::Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
                _ => None,
            };
            if let Some(len) = parsed.filter(|len| *len <= 32) {
                return len;
            }
        }
        DEFAULT_SUBNET_PREFIX_LEN
    }
}

/// Typed accessors over the metadata service.
///
/// The transport is a collaborator; implementations surface missing self
/// records as [`StoreError::NotReady`] and connectivity failures as
/// [`StoreError::Transport`].
pub trait MetadataClient: Send + Sync {
    /// This agent's own container record.
    fn self_container(&self) -> impl Future<Output = Result<Container, StoreError>> + Send;
    /// The host this agent runs on.
    fn self_host(&self) -> impl Future<Output = Result<Host, StoreError>> + Send;
    /// The service this agent belongs to.
    fn self_service(&self) -> impl Future<Output = Result<Service, StoreError>> + Send;
    /// All containers in the environment.
    fn containers(&self) -> impl Future<Output = Result<Vec<Container>, StoreError>> + Send;
    /// All services in the environment.
    fn services(&self) -> impl Future<Output = Result<Vec<Service>, StoreError>> + Send;
    /// All hosts in the environment.
    fn hosts(&self) -> impl Future<Output = Result<Vec<Host>, StoreError>> + Send;
    /// All networks in the environment.
    fn networks(&self) -> impl Future<Output = Result<Vec<Network>, StoreError>> + Send;
    /// The metadata version; changes whenever any record changes.
    fn version(&self) -> impl Future<Output = Result<String, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::Network;

    fn network_with(metadata: serde_json::Value) -> Network {
        Network {
            name: "overlay".to_string(),
            uuid: "net-1".to_string(),
            metadata,
        }
    }

    #[test]
    fn reads_prefix_from_cni_config() {
        let network = network_with(serde_json::json!({
            "cniConfig": {
                "10-overlay.conf": {"ipam": {"subnetPrefixSize": "/24"}}
            }
        }));
        assert_eq!(network.subnet_prefix_len(), 24);
    }

    #[test]
    fn accepts_numeric_prefix() {
        let network = network_with(serde_json::json!({
            "cniConfig": {"10-overlay.conf": {"ipam": {"subnetPrefixSize": 20}}}
        }));
        assert_eq!(network.subnet_prefix_len(), 20);
    }

    #[test]
    fn defaults_when_ipam_is_absent_or_malformed() {
        assert_eq!(network_with(serde_json::json!({})).subnet_prefix_len(), 16);
        let no_ipam = network_with(serde_json::json!({
            "cniConfig": {"10-overlay.conf": {}}
        }));
        assert_eq!(no_ipam.subnet_prefix_len(), 16);
        let oversized = network_with(serde_json::json!({
            "cniConfig": {"10-overlay.conf": {"ipam": {"subnetPrefixSize": "/48"}}}
        }));
        assert_eq!(oversized.subnet_prefix_len(), 16);
    }
}
