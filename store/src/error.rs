// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::path::PathBuf;
use thiserror::Error;

/// The reasons a reload may fail.
///
/// `MissingSelf`, `Parse` and `Classification` are fatal to the reload and
/// reported to the caller; `NotReady` and `Transport` are transient and the
/// next scheduled reload retries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No inventory entry is flagged as this agent's own container.
    #[error("failed to find self entry")]
    MissingSelf,
    /// The entries file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the entries file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The entries file is malformed.
    #[error("failed to parse entries: {0}")]
    Parse(#[from] serde_json::Error),
    /// A required metadata record is not available yet.
    #[error("metadata not ready: {0}")]
    NotReady(&'static str),
    /// The metadata service could not be reached.
    #[error("metadata transport: {0}")]
    Transport(String),
    /// The inventory is internally inconsistent.
    #[error("classification: {0}")]
    Classification(String),
}
