// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::error::IkeError;
use crate::proto::{IkeConnection, Request, Response, SharedKey, read_frame, write_frame};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// An explicit retry budget for an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// A single attempt, no delay.
    #[must_use]
    pub fn once() -> RetryPolicy {
        RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Default connect budget: 3 attempts, 1 second apart.
pub const CONNECT_RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    delay: Duration::from_secs(1),
};

/// Client for the daemon's request/response control socket.
///
/// The socket is never shared: every operation opens a fresh connection,
/// uses it, and drops it.
#[derive(Clone, Debug)]
pub struct ControlClient {
    socket_path: PathBuf,
    connect_retry: RetryPolicy,
}

impl ControlClient {
    /// A client for the socket at `path`.
    pub fn new(path: impl AsRef<Path>) -> ControlClient {
        ControlClient {
            socket_path: path.as_ref().to_path_buf(),
            connect_retry: CONNECT_RETRY,
        }
    }

    /// Override the connect retry budget.
    #[must_use]
    pub fn with_connect_retry(mut self, retry: RetryPolicy) -> ControlClient {
        self.connect_retry = retry;
        self
    }

    async fn connect(&self) -> Result<UnixStream, IkeError> {
        let mut last = None;
        for attempt in 0..self.connect_retry.attempts {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if attempt > 0 {
                        warn!(path = %self.socket_path.display(), "failed to connect to daemon: {e}");
                    }
                    last = Some(e);
                }
            }
            tokio::time::sleep(self.connect_retry.delay).await;
        }
        Err(IkeError::Connect {
            path: self.socket_path.clone(),
            attempts: self.connect_retry.attempts,
            source: last.unwrap_or_else(|| std::io::Error::other("no attempts made")),
        })
    }

    async fn call(&self, request: &Request) -> Result<Response, IkeError> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    }

    fn expect_ok(response: Response) -> Result<(), IkeError> {
        match response {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(IkeError::Refused(message)),
            Response::Conns { .. } => {
                Err(IkeError::Protocol("unexpected conns response".to_string()))
            }
        }
    }

    /// Names of the connections currently loaded in the daemon.
    ///
    /// # Errors
    ///
    /// Propagates connect, protocol and refusal errors.
    pub async fn list_conns(&self) -> Result<Vec<String>, IkeError> {
        match self.call(&Request::ListConns).await? {
            Response::Conns { names } => Ok(names),
            Response::Error { message } => Err(IkeError::Refused(message)),
            Response::Ok => Err(IkeError::Protocol("expected conns response".to_string())),
        }
    }

    /// Load a shared key.
    ///
    /// # Errors
    ///
    /// Propagates connect, protocol and refusal errors.
    pub async fn load_shared_key(&self, key: SharedKey) -> Result<(), IkeError> {
        Self::expect_ok(self.call(&Request::LoadSharedKey { key }).await?)
    }

    /// Load a connection, retrying per `retry`. The daemon is not always
    /// willing on the first attempt and gives no reason why.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn load_conn(
        &self,
        name: &str,
        conn: &IkeConnection,
        retry: RetryPolicy,
    ) -> Result<(), IkeError> {
        let request = Request::LoadConn {
            name: name.to_string(),
            conn: conn.clone(),
        };
        let mut last = None;
        for attempt in 0..retry.attempts.max(1) {
            match self.call(&request).await.and_then(Self::expect_ok) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(%name, attempt, "connection load failed: {e}");
                    last = Some(e);
                }
            }
            tokio::time::sleep(retry.delay).await;
        }
        Err(last.unwrap_or_else(|| IkeError::Protocol("no attempts made".to_string())))
    }

    /// Unload a connection.
    ///
    /// # Errors
    ///
    /// Propagates connect, protocol and refusal errors.
    pub async fn unload_conn(&self, name: &str) -> Result<(), IkeError> {
        Self::expect_ok(
            self.call(&Request::UnloadConn {
                name: name.to_string(),
            })
            .await?,
        )
    }

    /// Probe the daemon: connect and list connections.
    ///
    /// # Errors
    ///
    /// Propagates whatever the probe trips over.
    pub async fn probe(&self) -> Result<(), IkeError> {
        self.list_conns().await.map(|_| ())
    }
}
