// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Metadata change handler: version polling driving backend reloads.

use crate::store::AnyStore;
use overlay_backend::Backend;
use overlay_store::metadata::{HttpMetadataClient, MetadataClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Poll the metadata version every `interval` and reload the backend on
/// change. Reload errors are logged and swallowed; the next change retries.
/// Never returns.
pub async fn run(
    client: HttpMetadataClient,
    backend: Arc<Backend<AnyStore>>,
    interval: Duration,
) -> std::convert::Infallible {
    let mut known: Option<String> = None;
    loop {
        tokio::time::sleep(interval).await;
        let current = match client.version().await {
            Ok(version) => version,
            Err(e) => {
                debug!("metadata version poll failed: {e}");
                continue;
            }
        };
        match &known {
            None => {
                debug!(version = %current, "metadata version baseline");
                known = Some(current);
            }
            Some(version) if *version != current => {
                info!(version = %current, "metadata change received");
                known = Some(current);
                if let Err(e) = backend.reload().await {
                    error!("error reloading backend after metadata change: {e}");
                } else {
                    debug!("reload successful");
                }
            }
            Some(_) => {}
        }
    }
}
