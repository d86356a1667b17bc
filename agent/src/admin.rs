// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Liveness and forced-reload admin endpoint.

use crate::error::AgentError;
use crate::store::AnyStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use overlay_backend::Backend;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolve `:PORT` or `ADDR:PORT` to a bindable socket address.
///
/// # Errors
///
/// Returns [`AgentError::Config`] when the address cannot be parsed.
pub fn parse_listen(listen: &str) -> Result<SocketAddr, AgentError> {
    if let Some(port) = listen.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| AgentError::Config(format!("invalid listen address '{listen}'")))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    listen
        .parse::<SocketAddr>()
        .map_err(|_| AgentError::Config(format!("invalid listen address '{listen}'")))
}

/// The admin routes over the active backend.
pub fn router(backend: Arc<Backend<AnyStore>>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/v1/reload", post(reload))
        .with_state(backend)
}

/// Serve the admin endpoint until the socket fails.
///
/// # Errors
///
/// Returns [`AgentError`] on bind and serve failures.
pub async fn serve(listen: &str, backend: Arc<Backend<AnyStore>>) -> Result<(), AgentError> {
    let addr = parse_listen(listen)?;
    info!("admin endpoint listening on {addr}");
    axum_server::bind(addr)
        .serve(router(backend).into_make_service())
        .await?;
    Ok(())
}

async fn ping() -> &'static str {
    debug!("received ping request");
    "OK"
}

async fn reload(State(backend): State<Arc<Backend<AnyStore>>>) -> (StatusCode, String) {
    debug!("received reload request");
    match backend.reload().await {
        Ok(()) => (StatusCode::OK, "Reloaded Configuration\n".to_string()),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to reload configuration: {e}\n"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_listen;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn bare_port_binds_all_interfaces() {
        let addr = parse_listen(":8111").unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(addr.port(), 8111);
    }

    #[test]
    fn full_addresses_pass_through() {
        let addr = parse_listen("127.0.0.1:9000").unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_listen("nope").is_err());
        assert!(parse_listen(":never").is_err());
    }
}
