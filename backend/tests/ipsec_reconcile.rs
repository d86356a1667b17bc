// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPsec reconciliation against an in-memory policy kernel and a scripted
//! control socket.

use overlay_backend::ipsec::{IkeControl, IpsecConfig, IpsecOverlay, PolicyKernel};
use overlay_ike::{IkeConnection, IkeError, RetryPolicy, SharedKey};
use overlay_kernel::xfrm::XfrmPolicy;
use overlay_kernel::KernelError;
use overlay_store::{Entry, Projection, SharedProjection, Store, StoreError};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn entry(ip: &str, host: &str, is_self: bool, is_peer: bool) -> Entry {
    Entry {
        ip: ip.parse().unwrap(),
        host_ip: host.parse().unwrap(),
        is_self,
        is_peer,
    }
}

struct FakeStore {
    entries: Mutex<Vec<Entry>>,
    shared: SharedProjection,
}

impl FakeStore {
    fn new(entries: Vec<Entry>) -> Arc<FakeStore> {
        Arc::new(FakeStore {
            entries: Mutex::new(entries),
            shared: SharedProjection::new(),
        })
    }

    fn set_entries(&self, entries: Vec<Entry>) {
        *self.entries.lock().unwrap() = entries;
    }
}

impl Store for Arc<FakeStore> {
    async fn reload(&self) -> Result<(), StoreError> {
        let entries = self.entries.lock().unwrap().clone();
        self.shared.publish(Projection::build(entries, None)?);
        Ok(())
    }

    fn projection(&self) -> Option<Arc<Projection>> {
        self.shared.snapshot()
    }
}

#[derive(Default)]
struct FakePolicies {
    installed: Mutex<HashMap<String, XfrmPolicy>>,
    adds: AtomicUsize,
    dels: AtomicUsize,
}

impl FakePolicies {
    fn inject(&self, policy: XfrmPolicy) {
        self.installed.lock().unwrap().insert(policy.key(), policy);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.installed.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PolicyKernel for Arc<FakePolicies> {
    async fn policies(&self) -> Result<HashMap<String, XfrmPolicy>, KernelError> {
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn add(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.installed
            .lock()
            .unwrap()
            .insert(policy.key(), policy.clone());
        Ok(())
    }

    async fn del(&self, policy: &XfrmPolicy) -> Result<(), KernelError> {
        self.dels.fetch_add(1, Ordering::SeqCst);
        self.installed.lock().unwrap().remove(&policy.key());
        Ok(())
    }
}

#[derive(Default)]
struct FakeDaemon {
    conns: Mutex<HashMap<String, IkeConnection>>,
    keys: Mutex<Vec<SharedKey>>,
    conn_loads: AtomicUsize,
    refuse_conn_loads: AtomicBool,
}

impl FakeDaemon {
    fn owners(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .flat_map(|key| key.owners.clone())
            .collect()
    }
}

impl IkeControl for Arc<FakeDaemon> {
    async fn list_conns(&self) -> Result<Vec<String>, IkeError> {
        Ok(self.conns.lock().unwrap().keys().cloned().collect())
    }

    async fn load_shared_key(&self, key: SharedKey) -> Result<(), IkeError> {
        self.keys.lock().unwrap().push(key);
        Ok(())
    }

    async fn load_conn(
        &self,
        name: &str,
        conn: &IkeConnection,
        _retry: RetryPolicy,
    ) -> Result<(), IkeError> {
        if self.refuse_conn_loads.load(Ordering::SeqCst) {
            return Err(IkeError::Refused("not today".to_string()));
        }
        self.conn_loads.fetch_add(1, Ordering::SeqCst);
        self.conns
            .lock()
            .unwrap()
            .insert(name.to_string(), conn.clone());
        Ok(())
    }

    async fn unload_conn(&self, name: &str) -> Result<(), IkeError> {
        self.conns.lock().unwrap().remove(name);
        Ok(())
    }
}

struct Rig {
    store: Arc<FakeStore>,
    policies: Arc<FakePolicies>,
    daemon: Arc<FakeDaemon>,
    overlay: IpsecOverlay<Arc<FakeStore>, Arc<FakePolicies>, Arc<FakeDaemon>>,
    _config_dir: tempfile::TempDir,
}

fn rig(entries: Vec<Entry>) -> Rig {
    let config_dir = tempfile::tempdir().unwrap();
    std::fs::write(config_dir.path().join("psk.txt"), "sw0rdfish\n").unwrap();
    let store = FakeStore::new(entries);
    let policies = Arc::new(FakePolicies::default());
    let daemon = Arc::new(FakeDaemon::default());
    let overlay = IpsecOverlay::new(
        store.clone(),
        policies.clone(),
        daemon.clone(),
        IpsecConfig::new(config_dir.path()),
    );
    Rig {
        store,
        policies,
        daemon,
        overlay,
        _config_dir: config_dir,
    }
}

fn two_hosts() -> Vec<Entry> {
    vec![
        entry("10.42.1.1/16", "52.0.0.1", true, true),
        entry("10.42.2.2/16", "52.0.0.2", false, true),
    ]
}

#[tokio::test]
async fn reconcile_installs_the_policy_triple_and_connection() {
    let rig = rig(two_hosts());
    rig.overlay.reload().await.unwrap();

    assert_eq!(
        rig.policies.keys(),
        vec![
            "fwd-10.42.2.2/32-10.42.0.0/16-52.0.0.2-10.42.1.1-1234".to_string(),
            "in-10.42.2.2/32-10.42.0.0/16-52.0.0.2-10.42.1.1-1234".to_string(),
            "out-10.42.0.0/16-10.42.2.2/32-10.42.1.1-52.0.0.2-1234".to_string(),
        ]
    );

    let conns = rig.daemon.conns.lock().unwrap();
    let conn = &conns["conn-52.0.0.2"];
    assert_eq!(conn.remote_addrs, vec!["52.0.0.2".to_string()]);
    let child = &conn.children["child-52.0.0.2"];
    assert_eq!(child.req_id.as_deref(), Some("1234"));
    // self host 52.0.0.1 < 52.0.0.2: this side initiates rekey normally
    assert_eq!(child.rekey_time.as_deref(), Some("1h"));
    assert_eq!(child.replay_window.as_deref(), Some("1024"));

    let owners = rig.daemon.owners();
    assert!(owners.contains(&"any".to_string()));
    assert!(owners.contains(&"10.42.2.2".to_string()));
    assert!(owners.contains(&"52.0.0.2".to_string()));
}

#[tokio::test]
async fn greater_local_host_defers_child_rekey() {
    let rig = rig(vec![
        entry("10.42.2.2/16", "52.0.0.2", true, true),
        entry("10.42.1.1/16", "52.0.0.1", false, true),
    ]);
    rig.overlay.reload().await.unwrap();

    let conns = rig.daemon.conns.lock().unwrap();
    let child = &conns["conn-52.0.0.1"].children["child-52.0.0.1"];
    assert_eq!(child.rekey_time.as_deref(), Some("8760h"));
}

#[tokio::test]
async fn removed_peer_loses_policies_and_connection() {
    let rig = rig(two_hosts());
    rig.overlay.reload().await.unwrap();
    assert_eq!(rig.policies.keys().len(), 3);

    rig.store
        .set_entries(vec![entry("10.42.1.1/16", "52.0.0.1", true, true)]);
    rig.overlay.reload().await.unwrap();

    assert!(rig.policies.keys().is_empty());
    assert!(rig.daemon.conns.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let rig = rig(two_hosts());
    rig.overlay.reload().await.unwrap();
    let adds = rig.policies.adds.load(Ordering::SeqCst);
    assert_eq!(adds, 3);
    assert_eq!(rig.daemon.conn_loads.load(Ordering::SeqCst), 1);

    rig.overlay.reload().await.unwrap();
    assert_eq!(rig.policies.adds.load(Ordering::SeqCst), adds);
    assert_eq!(rig.policies.dels.load(Ordering::SeqCst), 0);
    // same template revision, so the connection is not re-sent
    assert_eq!(rig.daemon.conn_loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn destructive_phases_are_gated_on_a_clean_pass() {
    let rig = rig(two_hosts());
    // a leftover policy that no longer corresponds to any entry
    let stale = overlay_backend::ipsec::policy_triple(
        &entry("10.42.9.9/16", "52.0.0.9", false, false),
        Ipv4Addr::new(10, 42, 1, 1),
    );
    for policy in &stale {
        rig.policies.inject(policy.clone());
    }

    rig.daemon.refuse_conn_loads.store(true, Ordering::SeqCst);
    assert!(rig.overlay.reload().await.is_err());
    // the stale policies survive the unhealthy cycle
    assert_eq!(rig.policies.keys().len(), 3);
    assert_eq!(rig.policies.dels.load(Ordering::SeqCst), 0);

    rig.daemon.refuse_conn_loads.store(false, Ordering::SeqCst);
    rig.overlay.reload().await.unwrap();
    // healthy again: stale policies out, real ones in
    assert_eq!(rig.policies.keys().len(), 3);
    assert!(rig
        .policies
        .keys()
        .iter()
        .all(|key| key.contains("10.42.2.2") || key.contains("10.42.0.0")));
}

#[tokio::test]
async fn blacklist_strips_gcm_proposals() {
    let config_dir = tempfile::tempdir().unwrap();
    std::fs::write(config_dir.path().join("psk.txt"), "secret").unwrap();
    let store = FakeStore::new(two_hosts());
    let policies = Arc::new(FakePolicies::default());
    let daemon = Arc::new(FakeDaemon::default());
    let mut config = IpsecConfig::new(config_dir.path());
    config.blacklist = vec!["aes128gcm16".to_string()];
    let overlay = IpsecOverlay::new(store, policies, daemon.clone(), config);

    overlay.reload().await.unwrap();

    let conns = daemon.conns.lock().unwrap();
    let conn = &conns["conn-52.0.0.2"];
    assert_eq!(conn.proposals, vec!["aes-sha1-modp2048".to_string()]);
    assert_eq!(
        conn.children["child-52.0.0.2"].esp_proposals,
        vec!["aes-modp2048".to_string()]
    );
}

#[tokio::test]
async fn empty_inventory_only_loads_the_wildcard_key() {
    let rig = rig(vec![entry("10.42.1.1/16", "52.0.0.1", true, true)]);
    rig.overlay.reload().await.unwrap();

    assert!(rig.policies.keys().is_empty());
    assert!(rig.daemon.conns.lock().unwrap().is_empty());
    assert_eq!(rig.daemon.owners(), vec!["any".to_string()]);
}

#[tokio::test]
async fn missing_psk_file_fails_reload() {
    let config_dir = tempfile::tempdir().unwrap();
    let overlay = IpsecOverlay::new(
        FakeStore::new(two_hosts()),
        Arc::new(FakePolicies::default()),
        Arc::new(FakeDaemon::default()),
        IpsecConfig::new(config_dir.path()),
    );
    assert!(overlay.reload().await.is_err());
}
