// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::error::IkeError;
use crate::proto::{ChildSa, IkeConnection};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const IKE_CONF_NAME: &str = "ike.conf";
const CHILD_SA_CONF_NAME: &str = "childsa.conf";

const DEFAULT_IKE_CONF: &[u8] = br#"{
    "local_addrs": [],
    "proposals": ["aes128gcm16-sha256-modp2048", "aes-sha1-modp2048"],
    "encap": "yes",
    "local": {
        "auth": "psk"
    },
    "remote": {
        "auth": "psk"
    }
}"#;

const DEFAULT_CHILD_SA_CONF: &[u8] = br#"{
    "local_ts": ["0.0.0.0/0"],
    "remote_ts": ["0.0.0.0/0"],
    "esp_proposals": ["aes128gcm16-modp2048", "aes-modp2048"],
    "start_action": "start",
    "close_action": "start",
    "mode": "tunnel",
    "policies": "no"
}"#;

/// The connection and child-SA documents new connections are instantiated
/// from.
///
/// Both templates are read from the config directory, falling back to
/// compiled-in defaults when the files are absent. A syntactically invalid
/// file fails the reload. The content digest across both templates is the
/// *revision*: the version key recorded against already-loaded connections.
pub struct TemplateStore {
    config_dir: PathBuf,
    ike_conf: Vec<u8>,
    child_sa_conf: Vec<u8>,
    revision: String,
}

impl TemplateStore {
    /// A store reading templates from `config_dir`.
    pub fn new(config_dir: impl AsRef<Path>) -> TemplateStore {
        TemplateStore {
            config_dir: config_dir.as_ref().to_path_buf(),
            ike_conf: Vec::new(),
            child_sa_conf: Vec::new(),
            revision: String::new(),
        }
    }

    fn load_bytes(&self, name: &str, default: &[u8]) -> Result<Vec<u8>, IkeError> {
        let path = self.config_dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(default.to_vec()),
            Err(source) => Err(IkeError::TemplateRead { path, source }),
        }
    }

    /// Re-read both templates and recompute the revision.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files and on templates the daemon schema cannot
    /// parse; the previous templates stay in place.
    pub fn reload(&mut self) -> Result<(), IkeError> {
        let ike_conf = self.load_bytes(IKE_CONF_NAME, DEFAULT_IKE_CONF)?;
        if let Err(source) = serde_json::from_slice::<IkeConnection>(&ike_conf) {
            error!(
                "failed to parse {IKE_CONF_NAME}: {source}\n\t{}",
                String::from_utf8_lossy(&ike_conf)
            );
            return Err(IkeError::Template {
                name: IKE_CONF_NAME,
                source,
            });
        }

        let child_sa_conf = self.load_bytes(CHILD_SA_CONF_NAME, DEFAULT_CHILD_SA_CONF)?;
        if let Err(source) = serde_json::from_slice::<ChildSa>(&child_sa_conf) {
            error!(
                "failed to parse {CHILD_SA_CONF_NAME}: {source}\n\t{}",
                String::from_utf8_lossy(&child_sa_conf)
            );
            return Err(IkeError::Template {
                name: CHILD_SA_CONF_NAME,
                source,
            });
        }

        let mut digest = Sha256::new();
        digest.update(&ike_conf);
        digest.update(&child_sa_conf);
        let revision = hex_string(&digest.finalize());
        debug!(%revision, "templates loaded");

        self.ike_conf = ike_conf;
        self.child_sa_conf = child_sa_conf;
        self.revision = revision;
        Ok(())
    }

    /// The version key of the currently loaded templates. Empty before the
    /// first successful reload.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// A fresh connection document from the template.
    ///
    /// # Errors
    ///
    /// Cannot fail after a successful [`TemplateStore::reload`]; surfaces
    /// the parse error otherwise.
    pub fn new_ike_conn(&self) -> Result<IkeConnection, IkeError> {
        serde_json::from_slice(&self.ike_conf).map_err(|source| IkeError::Template {
            name: IKE_CONF_NAME,
            source,
        })
    }

    /// A fresh child-SA document from the template.
    ///
    /// # Errors
    ///
    /// Cannot fail after a successful [`TemplateStore::reload`]; surfaces
    /// the parse error otherwise.
    pub fn new_child_sa(&self) -> Result<ChildSa, IkeError> {
        serde_json::from_slice(&self.child_sa_conf).map_err(|source| IkeError::Template {
            name: CHILD_SA_CONF_NAME,
            source,
        })
    }
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::TemplateStore;

    #[test]
    fn defaults_apply_when_files_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut templates = TemplateStore::new(dir.path());
        templates.reload().unwrap();

        let conn = templates.new_ike_conn().unwrap();
        assert_eq!(conn.encap.as_deref(), Some("yes"));
        assert_eq!(conn.local.auth.as_deref(), Some("psk"));
        assert_eq!(
            conn.proposals,
            vec!["aes128gcm16-sha256-modp2048", "aes-sha1-modp2048"]
        );

        let child = templates.new_child_sa().unwrap();
        assert_eq!(child.mode.as_deref(), Some("tunnel"));
        assert_eq!(child.local_ts, vec!["0.0.0.0/0"]);
        assert!(!templates.revision().is_empty());
    }

    #[test]
    fn files_override_defaults_and_move_the_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut templates = TemplateStore::new(dir.path());
        templates.reload().unwrap();
        let default_revision = templates.revision().to_string();

        std::fs::write(
            dir.path().join("ike.conf"),
            r#"{"proposals": ["aes256-sha256-modp2048"], "encap": "yes"}"#,
        )
        .unwrap();
        templates.reload().unwrap();
        assert_eq!(
            templates.new_ike_conn().unwrap().proposals,
            vec!["aes256-sha256-modp2048"]
        );
        assert_ne!(templates.revision(), default_revision);
    }

    #[test]
    fn malformed_templates_fail_reload_and_keep_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut templates = TemplateStore::new(dir.path());
        templates.reload().unwrap();
        let revision = templates.revision().to_string();

        std::fs::write(dir.path().join("childsa.conf"), "{broken").unwrap();
        assert!(templates.reload().is_err());
        assert_eq!(templates.revision(), revision);
        assert!(templates.new_child_sa().is_ok());
    }

    #[test]
    fn fresh_documents_are_independent_copies() {
        let dir = tempfile::tempdir().unwrap();
        let mut templates = TemplateStore::new(dir.path());
        templates.reload().unwrap();
        let mut first = templates.new_ike_conn().unwrap();
        first.remote_addrs.push("52.0.0.2".to_string());
        let second = templates.new_ike_conn().unwrap();
        assert!(second.remote_addrs.is_empty());
    }
}
