// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The single ethtool invocation the VXLAN backend needs.

use crate::error::KernelError;
use tracing::debug;

/// Turn TX checksum offload off on `iface`.
///
/// Some kernels mis-compute checksums on VXLAN-encapsulated frames when
/// offload is enabled. Idempotent; invoked best-effort on every reconcile.
///
/// # Errors
///
/// Returns [`KernelError::Ethtool`] when the command cannot be spawned or
/// exits nonzero.
pub async fn disable_tx_checksum_offload(iface: &str) -> Result<(), KernelError> {
    debug!(%iface, "disabling tx checksum offload");
    let output = tokio::process::Command::new("ethtool")
        .args(["-K", iface, "tx", "off"])
        .output()
        .await
        .map_err(|e| KernelError::Ethtool(e.to_string()))?;
    if !output.status.success() {
        return Err(KernelError::Ethtool(format!(
            "ethtool -K {iface} tx off exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
