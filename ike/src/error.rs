// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to or supervising the IKE daemon.
#[derive(Debug, Error)]
pub enum IkeError {
    /// The control socket could not be reached within the retry budget.
    #[error("failed to connect to {path} after {attempts} attempts: {source}")]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Connection attempts made.
        attempts: u32,
        /// Error of the last attempt.
        source: std::io::Error,
    },
    /// I/O failure on an established control connection.
    #[error("control socket i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent something the protocol does not allow.
    #[error("control protocol: {0}")]
    Protocol(String),
    /// The daemon refused a request.
    #[error("daemon refused request: {0}")]
    Refused(String),
    /// A connection or child-SA template is malformed.
    #[error("template {name}: {source}")]
    Template {
        /// Template file name.
        name: &'static str,
        /// Parse failure.
        source: serde_json::Error,
    },
    /// A template file could not be read.
    #[error("failed to read template {path}: {source}")]
    TemplateRead {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The supervised daemon died or drifted.
    #[error("daemon: {0}")]
    Daemon(String),
}
