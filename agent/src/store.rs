// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use overlay_store::metadata::HttpMetadataClient;
use overlay_store::{MetadataStore, Projection, SimpleStore, Store, StoreError};
use std::sync::Arc;

/// The inventory source selected on the command line.
pub enum AnyStore {
    /// File-backed snapshot.
    File(SimpleStore),
    /// Live view over the metadata service.
    Metadata(MetadataStore<HttpMetadataClient>),
}

impl AnyStore {
    /// The metadata client, when the metadata variant is active.
    pub fn metadata_client(&self) -> Option<&HttpMetadataClient> {
        match self {
            AnyStore::File(_) => None,
            AnyStore::Metadata(store) => Some(store.client()),
        }
    }
}

impl Store for AnyStore {
    async fn reload(&self) -> Result<(), StoreError> {
        match self {
            AnyStore::File(store) => store.reload().await,
            AnyStore::Metadata(store) => store.reload().await,
        }
    }

    fn projection(&self) -> Option<Arc<Projection>> {
        match self {
            AnyStore::File(store) => store.projection(),
            AnyStore::Metadata(store) => store.projection(),
        }
    }
}
