// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use overlay_net::InterfaceName;
use thiserror::Error;

/// Failures talking to the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The netlink socket could not be opened.
    #[error("failed to open netlink socket: {0}")]
    Socket(std::io::Error),
    /// A netlink operation failed.
    #[error("netlink: {0}")]
    Netlink(#[from] rtnetlink::Error),
    /// The tunnel link could not be created.
    #[error("failed to create link {name}: {source}")]
    CreateFailed {
        /// Name of the link.
        name: InterfaceName,
        /// Underlying netlink error.
        source: rtnetlink::Error,
    },
    /// The link reportedly exists but a lookup cannot find it.
    #[error("link {0} exists but cannot be found")]
    Inconsistent(InterfaceName),
    /// The link did not come up within the retry budget.
    #[error("failed to bring link {name} up: {source}")]
    LinkUpFailed {
        /// Name of the link.
        name: InterfaceName,
        /// Error of the last attempt.
        source: rtnetlink::Error,
    },
    /// An XFRM operation failed.
    #[error("xfrm: {0}")]
    Xfrm(String),
    /// The ethtool invocation failed.
    #[error("ethtool: {0}")]
    Ethtool(String),
}
