// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control-socket wire protocol and connection documents.
//!
//! Requests and responses are JSON documents framed by a big-endian `u32`
//! length. The connection documents follow the daemon's configuration
//! schema; unknown fields supplied through templates ride along untouched.

use crate::error::IkeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected rather than buffered.
const MAX_FRAME_LEN: u32 = 1 << 20;

/// A pre-shared key and the identities it authenticates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKey {
    /// Key type; always `IKE` here.
    #[serde(rename = "type")]
    pub typ: String,
    /// Key material.
    pub data: String,
    /// Owner identities, bare IPs or the wildcard owner.
    pub owners: Vec<String>,
}

impl SharedKey {
    /// An IKE pre-shared key for one owner.
    #[must_use]
    pub fn ike(owner: impl Into<String>, data: impl Into<String>) -> SharedKey {
        SharedKey {
            typ: "IKE".to_string(),
            data: data.into(),
            owners: vec![owner.into()],
        }
    }
}

/// The `local`/`remote` authentication rounds of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Authentication method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

/// A child SA document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildSa {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_ts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote_ts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub esp_proposals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<String>,
    #[serde(rename = "reqid", skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rekey_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_window: Option<String>,
}

/// An IKE connection document with its child SAs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkeConnection {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_addrs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote_addrs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proposals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rekey_time: Option<String>,
    pub local: AuthSection,
    pub remote: AuthSection,
    /// Child SAs keyed by name; ordered for deterministic serialization.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ChildSa>,
}

/// A control-socket request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    /// Names of the connections currently loaded.
    ListConns,
    /// Load (or overwrite) a shared key.
    LoadSharedKey {
        /// The key document.
        key: SharedKey,
    },
    /// Load (or overwrite) a connection.
    LoadConn {
        /// Connection name.
        name: String,
        /// The connection document.
        conn: IkeConnection,
    },
    /// Unload a connection.
    UnloadConn {
        /// Connection name.
        name: String,
    },
}

/// A control-socket response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Response {
    /// Request applied.
    Ok,
    /// Answer to [`Request::ListConns`].
    Conns {
        /// Loaded connection names.
        names: Vec<String>,
    },
    /// Request refused.
    Error {
        /// Daemon-supplied reason.
        message: String,
    },
}

/// Write one length-prefixed JSON frame.
///
/// # Errors
///
/// Propagates serialization and I/O failures.
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), IkeError> {
    let body = serde_json::to_vec(value).map_err(|e| IkeError::Protocol(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|_| {
        IkeError::Protocol(format!("frame too large: {} bytes", body.len()))
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
///
/// # Errors
///
/// Propagates I/O failures; rejects oversized and malformed frames.
pub async fn read_frame<R: AsyncRead + Unpin, T: serde::de::DeserializeOwned>(
    reader: &mut R,
) -> Result<T, IkeError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(IkeError::Protocol(format!("frame too large: {len} bytes")));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| IkeError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{ChildSa, IkeConnection, Request, Response, SharedKey, read_frame, write_frame};

    #[tokio::test]
    async fn frames_round_trip() {
        let request = Request::LoadConn {
            name: "conn-52.0.0.2".to_string(),
            conn: IkeConnection {
                remote_addrs: vec!["52.0.0.2".to_string()],
                children: [("child-52.0.0.2".to_string(), ChildSa::default())]
                    .into_iter()
                    .collect(),
                ..IkeConnection::default()
            },
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &request).await.unwrap();
        let decoded: Request = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(read_frame::<_, Response>(&mut buf.as_slice()).await.is_err());
    }

    #[test]
    fn documents_use_the_daemon_schema() {
        let key = SharedKey::ike("52.0.0.2", "secret");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["type"], "IKE");
        assert_eq!(json["owners"][0], "52.0.0.2");

        let child = ChildSa {
            req_id: Some("1234".to_string()),
            ..ChildSa::default()
        };
        let json = serde_json::to_value(&child).unwrap();
        assert_eq!(json["reqid"], "1234");
        assert!(json.get("rekey_time").is_none());
    }
}
