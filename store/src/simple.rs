// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::entry::Entry;
use crate::error::StoreError;
use crate::projection::{Projection, SharedProjection};
use crate::Store;
use overlay_net::CidrV4;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize)]
struct Records {
    entries: Vec<Entry>,
}

/// File-backed inventory snapshot.
///
/// Reads a JSON document of entries; exactly one must be flagged `self`.
/// An optional override replaces self's overlay address.
pub struct SimpleStore {
    path: PathBuf,
    override_ip: Option<CidrV4>,
    shared: SharedProjection,
}

impl SimpleStore {
    /// A store reading from `path`; `override_ip` replaces self's address.
    pub fn new(path: impl AsRef<Path>, override_ip: Option<CidrV4>) -> SimpleStore {
        SimpleStore {
            path: path.as_ref().to_path_buf(),
            override_ip,
            shared: SharedProjection::new(),
        }
    }

    fn read_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let content = std::fs::read(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let records: Records = serde_json::from_slice(&content)?;
        Ok(records.entries)
    }
}

impl Store for SimpleStore {
    async fn reload(&self) -> Result<(), StoreError> {
        let entries = self.read_entries()?;
        debug!(count = entries.len(), path = %self.path.display(), "read entries file");
        let projection = Projection::build(entries, self.override_ip)?;
        self.shared.publish(projection);
        Ok(())
    }

    fn projection(&self) -> Option<Arc<Projection>> {
        self.shared.snapshot()
    }
}
