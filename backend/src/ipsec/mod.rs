// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The IPsec reconciler.
//!
//! Loads IKE connections and shared keys through the daemon's control
//! socket and maintains the XFRM policy triple guarding each remote
//! container. Destructive work (policy deletes, connection unloads) only
//! runs after a clean additive pass, so transient control-socket failures
//! never tear down working state.

mod policies;

pub use policies::{policy_triple, POLICY_PRIORITY, POLICY_REQ_ID};

use crate::{record_first, BackendError};
use overlay_ike::{
    ControlClient, IkeConnection, IkeError, RetryPolicy, SharedKey, TemplateStore,
    WILDCARD_KEY_OWNER,
};
use overlay_kernel::xfrm::{XfrmPolicy, XfrmSocket};
use overlay_kernel::KernelError;
use overlay_store::Store;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Name of the pre-shared-key file inside the config directory.
const PSK_FILE: &str = "psk.txt";

const CONN_PREFIX: &str = "conn-";
const CHILD_PREFIX: &str = "child-";

/// Rekey override ensuring only one side of a pair initiates rekey.
const CHILD_REKEY_OVERRIDE: &str = "8760h";

/// Connection loads are flaky and give no reason; retried without delay.
const LOAD_CONN_RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    delay: std::time::Duration::ZERO,
};

/// Default IKE SA rekey interval.
pub const DEFAULT_IKE_SA_REKEY_INTERVAL: &str = "4h";
/// Default child SA rekey interval.
pub const DEFAULT_CHILD_SA_REKEY_INTERVAL: &str = "1h";
/// Default ESP replay window size.
pub const DEFAULT_REPLAY_WINDOW_SIZE: &str = "1024";

/// XFRM policy surface the reconciler drives.
///
/// Implemented by [`XfrmSocket`] in production and by in-memory fakes in
/// tests.
pub trait PolicyKernel: Send + Sync {
    /// Installed IN/OUT/FWD policies keyed by structural key.
    fn policies(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, XfrmPolicy>, KernelError>> + Send;
    /// Install a policy.
    fn add(&self, policy: &XfrmPolicy) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Delete a policy.
    fn del(&self, policy: &XfrmPolicy) -> impl Future<Output = Result<(), KernelError>> + Send;
}

impl PolicyKernel for XfrmSocket {
    async fn policies(&self) -> Result<HashMap<String, XfrmPolicy>, KernelError> {
        XfrmSocket::policies(self).await
    }

    async fn add(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        XfrmSocket::add(self, policy).await
    }

    async fn del(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        XfrmSocket::del(self, policy).await
    }
}

/// IKE daemon control surface the reconciler drives.
pub trait IkeControl: Send + Sync {
    /// Names of the loaded connections.
    fn list_conns(&self) -> impl Future<Output = Result<Vec<String>, IkeError>> + Send;
    /// Load a shared key.
    fn load_shared_key(&self, key: SharedKey)
        -> impl Future<Output = Result<(), IkeError>> + Send;
    /// Load a connection with the given retry budget.
    fn load_conn(
        &self,
        name: &str,
        conn: &IkeConnection,
        retry: RetryPolicy,
    ) -> impl Future<Output = Result<(), IkeError>> + Send;
    /// Unload a connection.
    fn unload_conn(&self, name: &str) -> impl Future<Output = Result<(), IkeError>> + Send;
}

impl IkeControl for ControlClient {
    async fn list_conns(&self) -> Result<Vec<String>, IkeError> {
        ControlClient::list_conns(self).await
    }

    async fn load_shared_key(&self, key: SharedKey) -> Result<(), IkeError> {
        ControlClient::load_shared_key(self, key).await
    }

    async fn load_conn(
        &self,
        name: &str,
        conn: &IkeConnection,
        retry: RetryPolicy,
    ) -> Result<(), IkeError> {
        ControlClient::load_conn(self, name, conn, retry).await
    }

    async fn unload_conn(&self, name: &str) -> Result<(), IkeError> {
        ControlClient::unload_conn(self, name).await
    }
}

/// IPsec backend configuration.
#[derive(Clone, Debug)]
pub struct IpsecConfig {
    /// Directory holding `psk.txt` and the connection templates.
    pub config_dir: PathBuf,
    /// Cipher-proposal prefixes stripped from templates.
    pub blacklist: Vec<String>,
    /// IKE SA rekey interval applied when the template sets none.
    pub ike_sa_rekey_interval: String,
    /// Child SA rekey interval applied when the template sets none.
    pub child_sa_rekey_interval: String,
    /// ESP replay window size applied when the template sets none.
    pub replay_window_size: String,
}

impl IpsecConfig {
    /// Defaults rooted at `config_dir`.
    pub fn new(config_dir: impl AsRef<Path>) -> IpsecConfig {
        IpsecConfig {
            config_dir: config_dir.as_ref().to_path_buf(),
            blacklist: Vec::new(),
            ike_sa_rekey_interval: DEFAULT_IKE_SA_REKEY_INTERVAL.to_string(),
            child_sa_rekey_interval: DEFAULT_CHILD_SA_REKEY_INTERVAL.to_string(),
            replay_window_size: DEFAULT_REPLAY_WINDOW_SIZE.to_string(),
        }
    }
}

/// Which side of a host pair initiates child-SA rekeying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RekeyRole {
    /// This side rekeys on the normal interval.
    Initiator,
    /// This side defers: its child SA gets the long rekey override.
    Responder,
}

/// Deterministic rekey tie-break between two hosts.
///
/// The host whose address sorts lexicographically greater defers, so
/// exactly one side of every pair initiates rekey.
///
/// # Errors
///
/// Two distinct hosts can never share an address; equality means the
/// inventory is inconsistent and the pair is rejected.
pub fn rekey_role(local_host: Ipv4Addr, remote_host: Ipv4Addr) -> Result<RekeyRole, BackendError> {
    match local_host.to_string().cmp(&remote_host.to_string()) {
        std::cmp::Ordering::Equal => Err(BackendError::Classification(format!(
            "remote host {remote_host} compares equal to the local host"
        ))),
        std::cmp::Ordering::Greater => Ok(RekeyRole::Responder),
        std::cmp::Ordering::Less => Ok(RekeyRole::Initiator),
    }
}

/// Mutable reconciler state, serialized behind the backend mutex.
struct IpsecState {
    templates: TemplateStore,
    /// Key bytes last loaded per owner. There is no unload-key primitive,
    /// so this only suppresses identical re-loads.
    keys: HashMap<String, String>,
    /// Template revision each host's connection was loaded at.
    hosts: HashMap<Ipv4Addr, String>,
    psk: String,
}

/// The IPsec overlay backend.
pub struct IpsecOverlay<S, K, C> {
    store: S,
    kernel: K,
    control: C,
    config: IpsecConfig,
    state: Mutex<IpsecState>,
}

impl<S: Store, K: PolicyKernel, C: IkeControl> IpsecOverlay<S, K, C> {
    /// Wire a backend over `store`, the policy kernel and the control
    /// socket.
    pub fn new(store: S, kernel: K, control: C, config: IpsecConfig) -> IpsecOverlay<S, K, C> {
        let templates = TemplateStore::new(&config.config_dir);
        IpsecOverlay {
            store,
            kernel,
            control,
            config,
            state: Mutex::new(IpsecState {
                templates,
                keys: HashMap::new(),
                hosts: HashMap::new(),
                psk: String::new(),
            }),
        }
    }

    /// The control client, for daemon supervision.
    pub fn control_client(&self) -> &C {
        &self.control
    }

    /// The inventory store backing this overlay.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify an IP as remote, straight from the store's projection.
    #[must_use]
    pub fn is_remote(&self, ip: Ipv4Addr) -> bool {
        self.store.is_remote(ip)
    }

    /// Index the connections already loaded in the daemon, so a restarted
    /// agent does not reload them all.
    ///
    /// # Errors
    ///
    /// Propagates control-socket failures; fatal at startup.
    pub async fn load_conns(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let revision = state.templates.revision().to_string();
        state.hosts.clear();
        for name in self.control.list_conns().await? {
            let Some(host) = name.strip_prefix(CONN_PREFIX) else {
                continue;
            };
            let Ok(host) = host.parse::<Ipv4Addr>() else {
                continue;
            };
            info!("found existing connection: {name}");
            state.hosts.insert(host, revision.clone());
        }
        Ok(())
    }

    /// Reload the inventory, the pre-shared key and the templates, then
    /// reconcile daemon and kernel state.
    ///
    /// # Errors
    ///
    /// Surfaces the first error of the cycle; later best-effort work was
    /// still attempted, destructive phases were skipped.
    pub async fn reload(&self) -> Result<(), BackendError> {
        self.store.reload().await?;
        let psk_path = self.config.config_dir.join(PSK_FILE);
        let psk = std::fs::read_to_string(&psk_path)
            .map_err(|source| overlay_store::StoreError::Read {
                path: psk_path,
                source,
            })?
            .trim()
            .to_string();
        self.configure(psk).await
    }

    #[allow(clippy::too_many_lines)]
    async fn configure(&self, psk: String) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        info!("ipsec: reconfiguring");
        state.psk = psk;
        state.templates.reload()?;
        let revision = state.templates.revision().to_string();

        let mut key_attempt: HashSet<String> = HashSet::new();
        let mut host_attempt: HashSet<Ipv4Addr> = HashSet::new();
        let mut host_loaded: HashSet<Ipv4Addr> = HashSet::new();
        let mut first: Option<BackendError> = None;

        let local_host = self
            .store
            .local_host_ip()
            .ok_or_else(|| BackendError::Classification("no local host address".to_string()))?;
        let local_ip = self
            .store
            .local_ip()
            .ok_or_else(|| BackendError::Classification("no local overlay address".to_string()))?;

        let mut to_delete = match self.kernel.policies().await {
            Ok(policies) => policies,
            Err(e) => {
                record_first(&mut first, e.into(), "ipsec: failed to list policies");
                HashMap::new()
            }
        };
        let mut to_add: HashMap<String, XfrmPolicy> = HashMap::new();

        if let Err(e) = self
            .load_shared_key(&mut state, &mut key_attempt, WILDCARD_KEY_OWNER.to_string())
            .await
        {
            record_first(&mut first, e, "ipsec: failed to load wildcard key");
        }

        for entry in self.store.entries() {
            if entry.is_peer && !entry.is_self {
                let owner = entry.bare_ip().to_string();
                if let Err(e) = self
                    .load_shared_key(&mut state, &mut key_attempt, owner)
                    .await
                {
                    record_first(
                        &mut first,
                        e,
                        &format!("ipsec: failed to set PSK for peer agent {}", entry.bare_ip()),
                    );
                }
            }

            if entry.host_ip == local_host {
                continue;
            }

            if !host_loaded.contains(&entry.host_ip) {
                match self
                    .add_host(
                        &mut state,
                        &mut key_attempt,
                        &mut host_attempt,
                        &entry,
                        local_host,
                        &revision,
                    )
                    .await
                {
                    Ok(()) => {
                        host_loaded.insert(entry.host_ip);
                    }
                    Err(e) => record_first(
                        &mut first,
                        e,
                        &format!("ipsec: failed to setup host {}", entry.host_ip),
                    ),
                }
            }

            for policy in policy_triple(&entry, local_ip) {
                let key = policy.key();
                if to_delete.remove(&key).is_none() {
                    to_add.insert(key, policy);
                }
            }
        }

        // destructive and residual-additive phases only run on a clean pass;
        // a transient failure above must not erase working state
        if first.is_none() {
            first = self.delete_policies(&to_delete).await;
        }
        if first.is_none() {
            first = self.add_policies(&to_add).await;
        }
        if first.is_none() {
            first = self.remove_hosts(&mut state, &host_attempt).await;
            // the control protocol has no unload-shared-key operation;
            // loaded keys stay for the daemon's lifetime
        }

        first.map_or(Ok(()), Err)
    }

    async fn load_shared_key(
        &self,
        state: &mut IpsecState,
        key_attempt: &mut HashSet<String>,
        owner: String,
    ) -> Result<(), BackendError> {
        if !key_attempt.insert(owner.clone()) {
            return Ok(());
        }
        let key = state.psk.clone();
        if state.keys.get(&owner) == Some(&key) {
            debug!("key for {owner} already loaded");
            return Ok(());
        }
        self.control
            .load_shared_key(SharedKey::ike(owner.clone(), key.clone()))
            .await?;
        state.keys.insert(owner.clone(), key);
        info!("loaded pre-shared key for {owner}");
        Ok(())
    }

    async fn add_host(
        &self,
        state: &mut IpsecState,
        key_attempt: &mut HashSet<String>,
        host_attempt: &mut HashSet<Ipv4Addr>,
        entry: &overlay_store::Entry,
        local_host: Ipv4Addr,
        revision: &str,
    ) -> Result<(), BackendError> {
        let host = entry.host_ip;
        self.load_shared_key(state, key_attempt, host.to_string())
            .await?;

        // attempted hosts keep their connection even if the load fails;
        // unloading on a flaky pass would be worse than a stale connection
        host_attempt.insert(host);
        if state.hosts.get(&host).map(String::as_str) == Some(revision) {
            debug!("connection already loaded for host {host}");
            return Ok(());
        }

        let mut child = state.templates.new_child_sa()?;
        child.esp_proposals = self.filter_proposals(child.esp_proposals);
        child.req_id = Some(POLICY_REQ_ID.to_string());
        child.rekey_time = child
            .rekey_time
            .or_else(|| Some(self.config.child_sa_rekey_interval.clone()));
        child.replay_window = child
            .replay_window
            .or_else(|| Some(self.config.replay_window_size.clone()));
        if let RekeyRole::Responder = rekey_role(local_host, host)? {
            child.rekey_time = Some(CHILD_REKEY_OVERRIDE.to_string());
        }

        let mut conn = state.templates.new_ike_conn()?;
        conn.proposals = self.filter_proposals(conn.proposals);
        conn.remote_addrs = vec![host.to_string()];
        conn.rekey_time = conn
            .rekey_time
            .or_else(|| Some(self.config.ike_sa_rekey_interval.clone()));
        let proposals = conn.proposals.clone();
        let esp_proposals = child.esp_proposals.clone();
        conn.children = [(format!("{CHILD_PREFIX}{host}"), child)]
            .into_iter()
            .collect();

        let name = format!("{CONN_PREFIX}{host}");
        self.control
            .load_conn(&name, &conn, LOAD_CONN_RETRY)
            .await?;

        state.hosts.insert(host, revision.to_string());
        info!("loaded connection: {name}, {proposals:?}, {esp_proposals:?}");
        Ok(())
    }

    fn filter_proposals(&self, proposals: Vec<String>) -> Vec<String> {
        filter_blacklisted(proposals, &self.config.blacklist)
    }

    async fn delete_policies(
        &self,
        policies: &HashMap<String, XfrmPolicy>,
    ) -> Option<BackendError> {
        let mut first = None;
        for policy in policies.values() {
            match self.kernel.del(policy).await {
                Ok(()) => info!("deleted policy: {}", policy.key()),
                Err(e) => record_first(&mut first, e.into(), "ipsec: failed to delete policy"),
            }
        }
        first
    }

    async fn add_policies(&self, policies: &HashMap<String, XfrmPolicy>) -> Option<BackendError> {
        let mut first = None;
        for policy in policies.values() {
            match self.kernel.add(policy).await {
                Ok(()) => info!("added policy: {}", policy.key()),
                Err(e) => record_first(&mut first, e.into(), "ipsec: failed to add policy"),
            }
        }
        first
    }

    async fn remove_hosts(
        &self,
        state: &mut IpsecState,
        host_attempt: &HashSet<Ipv4Addr>,
    ) -> Option<BackendError> {
        let mut first = None;
        let stale: Vec<Ipv4Addr> = state
            .hosts
            .keys()
            .filter(|host| !host_attempt.contains(host))
            .copied()
            .collect();
        for host in stale {
            let name = format!("{CONN_PREFIX}{host}");
            info!("removing connection for {name}");
            match self.control.unload_conn(&name).await {
                Ok(()) => {
                    state.hosts.remove(&host);
                }
                Err(e) => record_first(
                    &mut first,
                    e.into(),
                    &format!("ipsec: failed to remove connection for host {host}"),
                ),
            }
        }
        first
    }
}

/// Drop every proposal matching a blacklisted prefix.
fn filter_blacklisted(proposals: Vec<String>, blacklist: &[String]) -> Vec<String> {
    proposals
        .into_iter()
        .filter(|proposal| !blacklist.iter().any(|prefix| proposal.starts_with(prefix)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{filter_blacklisted, rekey_role, RekeyRole};
    use std::net::Ipv4Addr;

    #[test]
    fn greater_local_host_defers_rekey() {
        let low = Ipv4Addr::new(52, 0, 0, 1);
        let high = Ipv4Addr::new(52, 0, 0, 2);
        assert_eq!(rekey_role(high, low).unwrap(), RekeyRole::Responder);
        assert_eq!(rekey_role(low, high).unwrap(), RekeyRole::Initiator);
    }

    #[test]
    fn equal_hosts_are_rejected() {
        let host = Ipv4Addr::new(52, 0, 0, 1);
        assert!(rekey_role(host, host).is_err());
    }

    #[test]
    fn ordering_is_lexicographic_not_numeric() {
        // "52.0.0.10" < "52.0.0.9" as strings
        let nine = Ipv4Addr::new(52, 0, 0, 9);
        let ten = Ipv4Addr::new(52, 0, 0, 10);
        assert_eq!(rekey_role(nine, ten).unwrap(), RekeyRole::Responder);
        assert_eq!(rekey_role(ten, nine).unwrap(), RekeyRole::Initiator);
    }

    #[test]
    fn blacklist_matches_by_prefix() {
        let proposals = vec![
            "aes128gcm16-modp2048".to_string(),
            "aes-modp2048".to_string(),
        ];
        let filtered = filter_blacklisted(proposals, &["aes128gcm16".to_string()]);
        assert_eq!(filtered, vec!["aes-modp2048".to_string()]);
    }
}
