// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::error::StoreError;
use crate::metadata::{Container, Host, MetadataClient, Network, Service};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Address the metadata service answers on when none is configured.
pub const DEFAULT_METADATA_ADDRESS: &str = "169.254.169.250";

/// The metadata API version this agent speaks.
const METADATA_API_VERSION: &str = "2015-12-19";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP edge of the metadata collaborator.
///
/// Serves the typed accessors from the versioned JSON API at
/// `http://<address>/2015-12-19`.
#[derive(Clone, Debug)]
pub struct HttpMetadataClient {
    base: String,
    client: reqwest::Client,
}

impl HttpMetadataClient {
    /// Address the metadata service answers on when none is configured.
    pub const DEFAULT_ADDRESS: &'static str = DEFAULT_METADATA_ADDRESS;

    /// A client for the service at `address` (host or host:port).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the underlying client cannot be
    /// constructed.
    pub fn new(address: &str) -> Result<HttpMetadataClient, StoreError> {
        let address = if address.is_empty() {
            DEFAULT_METADATA_ADDRESS
        } else {
            address
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(HttpMetadataClient {
            base: format!("http://{address}/{METADATA_API_VERSION}"),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        missing: &'static str,
    ) -> Result<T, StoreError> {
        let url = format!("{}/{}", self.base, path);
        debug!(%url, "metadata fetch");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotReady(missing));
        }
        let response = response
            .error_for_status()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))
    }
}

impl MetadataClient for HttpMetadataClient {
    async fn self_container(&self) -> Result<Container, StoreError> {
        self.get("self/container", "self container").await
    }

    async fn self_host(&self) -> Result<Host, StoreError> {
        self.get("self/host", "self host").await
    }

    async fn self_service(&self) -> Result<Service, StoreError> {
        self.get("self/service", "self service").await
    }

    async fn containers(&self) -> Result<Vec<Container>, StoreError> {
        self.get("containers", "containers").await
    }

    async fn services(&self) -> Result<Vec<Service>, StoreError> {
        self.get("services", "services").await
    }

    async fn hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.get("hosts", "hosts").await
    }

    async fn networks(&self) -> Result<Vec<Network>, StoreError> {
        self.get("networks", "networks").await
    }

    async fn version(&self) -> Result<String, StoreError> {
        let url = format!("{}/version", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let raw = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(raw.trim().trim_matches('"').to_string())
    }
}
