// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The VXLAN reconciler.
//!
//! One tunnel link per agent, with a VNI and UDP port fixed across the
//! fleet and a link-layer address every peer derives from this agent's
//! overlay IP. Each refresh recomputes the desired route/ARP/FDB tables and
//! converges the kernel through the diff engine.

mod tables;

pub use tables::{desired_tables, DesiredTables};

use crate::{record_first, BackendError};
use overlay_kernel::ethtool;
use overlay_kernel::{
    KernelError, LinkRef, NeighborFamily, NeighborTable, Netlink, RouteTable, VtepSpec,
};
use overlay_net::mac::{peer_mac, PEER_MAC_PREFIX};
use overlay_net::{CidrV4, InterfaceName, Mac, Vni};
use overlay_store::{ClassifierHandle, ClassifierWriter, Store};
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default tunnel link MTU.
pub const DEFAULT_VTEP_MTU: u32 = 1500;

const VTEP_NAME: &str = "vtep1042";
const VTEP_VNI: u32 = 1042;
const VTEP_PORT: u16 = 4789;
const HOST_INTERFACE: &str = "eth0";

/// Kernel surface the VXLAN reconciler drives.
///
/// Implemented by [`Netlink`] in production and by in-memory fakes in tests.
pub trait VtepKernel: Send + Sync {
    /// Best-effort TX checksum offload disable on the physical interface.
    fn disable_tx_offload(
        &self,
        iface: &str,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Create the tunnel link if needed and return it.
    fn ensure_vtep(
        &self,
        spec: &VtepSpec,
    ) -> impl Future<Output = Result<LinkRef, KernelError>> + Send;
    /// Observed routes through the link.
    fn routes(&self, link: LinkRef) -> impl Future<Output = Result<RouteTable, KernelError>> + Send;
    /// Observed neighbor entries of one family on the link.
    fn neighbors(
        &self,
        link: LinkRef,
        family: NeighborFamily,
    ) -> impl Future<Output = Result<NeighborTable, KernelError>> + Send;
    /// Insert a route.
    fn add_route(
        &self,
        link: LinkRef,
        dst: CidrV4,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Delete a route.
    fn del_route(
        &self,
        link: LinkRef,
        dst: CidrV4,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Insert a neighbor entry.
    fn add_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Insert or overwrite a neighbor entry.
    fn replace_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
    /// Delete a neighbor entry.
    fn del_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;
}

impl VtepKernel for Netlink {
    async fn disable_tx_offload(&self, iface: &str) -> Result<(), KernelError> {
        ethtool::disable_tx_checksum_offload(iface).await
    }

    async fn ensure_vtep(&self, spec: &VtepSpec) -> Result<LinkRef, KernelError> {
        Netlink::ensure_vtep(self, spec).await
    }

    async fn routes(&self, link: LinkRef) -> Result<RouteTable, KernelError> {
        Netlink::routes(self, link).await
    }

    async fn neighbors(
        &self,
        link: LinkRef,
        family: NeighborFamily,
    ) -> Result<NeighborTable, KernelError> {
        Netlink::neighbors(self, link, family).await
    }

    async fn add_route(&self, link: LinkRef, dst: CidrV4) -> Result<(), KernelError> {
        Netlink::add_route(self, link, dst).await
    }

    async fn del_route(&self, link: LinkRef, dst: CidrV4) -> Result<(), KernelError> {
        Netlink::del_route(self, link, dst).await
    }

    async fn add_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        Netlink::add_neighbor(self, link, family, ip, mac).await
    }

    async fn replace_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        Netlink::replace_neighbor(self, link, family, ip, mac).await
    }

    async fn del_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        Netlink::del_neighbor(self, link, family, ip, mac).await
    }
}

/// VXLAN backend configuration.
#[derive(Clone, Debug)]
pub struct VxlanConfig {
    /// Tunnel link name.
    pub iface: InterfaceName,
    /// VXLAN network identifier; fixed across the fleet.
    pub vni: Vni,
    /// UDP encapsulation port; fixed across the fleet.
    pub port: u16,
    /// Tunnel link MTU.
    pub mtu: u32,
    /// Reserved prefix for peer-MAC derivation; part of the wire contract.
    pub mac_prefix: Mac,
    /// Physical interface whose TX offload is disabled.
    pub host_iface: String,
}

impl VxlanConfig {
    /// The fleet-wide defaults, with a configurable MTU.
    ///
    /// # Errors
    ///
    /// Cannot fail for the built-in constants; surfaces an error only to
    /// keep construction honest.
    pub fn with_mtu(mtu: u32) -> Result<VxlanConfig, BackendError> {
        Ok(VxlanConfig {
            iface: InterfaceName::try_from(VTEP_NAME)
                .map_err(|e| BackendError::Classification(e.to_string()))?,
            vni: Vni::new(VTEP_VNI).map_err(|e| BackendError::Classification(e.to_string()))?,
            port: VTEP_PORT,
            mtu,
            mac_prefix: PEER_MAC_PREFIX,
            host_iface: HOST_INTERFACE.to_string(),
        })
    }
}

/// The VXLAN overlay backend.
pub struct VxlanOverlay<S, K> {
    store: S,
    kernel: K,
    config: VxlanConfig,
    /// Serializes reconciles and owns the classifier writer.
    state: Mutex<ClassifierWriter>,
    classifier: ClassifierHandle,
}

impl<S: Store, K: VtepKernel> VxlanOverlay<S, K> {
    /// Wire a backend over `store` and `kernel`.
    pub fn new(store: S, kernel: K, config: VxlanConfig) -> VxlanOverlay<S, K> {
        let (writer, classifier) = ClassifierWriter::new();
        VxlanOverlay {
            store,
            kernel,
            config,
            state: Mutex::new(writer),
            classifier,
        }
    }

    /// Handle the ARP responder mints its classifier reader from.
    #[must_use]
    pub fn classifier(&self) -> &ClassifierHandle {
        &self.classifier
    }

    /// The inventory store backing this overlay.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bring the backend up: disable offload and run a best-effort first
    /// reconcile. Failures are logged; the supervisor's explicit reload is
    /// the one that decides liveness.
    pub async fn start(&self) {
        info!("vxlan: start");
        if let Err(e) = self.kernel.disable_tx_offload(&self.config.host_iface).await {
            error!("vxlan: start: error disabling tx checksum offload: {e}");
            return;
        }
        match self.reload().await {
            Ok(()) => info!("vxlan: start: success"),
            Err(e) => error!("vxlan: start: failed: {e}"),
        }
    }

    /// Reload the inventory and converge the kernel tables.
    ///
    /// # Errors
    ///
    /// Surfaces inventory failures and the first kernel failure; remaining
    /// mutations of the failing table were still attempted.
    pub async fn reload(&self) -> Result<(), BackendError> {
        let mut writer = self.state.lock().await;
        info!("vxlan: reconfiguring");

        // certain kernels mis-compute checksums on encapsulated frames when
        // offload is on; idempotent, so done on every pass
        if let Err(e) = self.kernel.disable_tx_offload(&self.config.host_iface).await {
            warn!("vxlan: couldn't disable tx checksum offload: {e}");
        }

        self.store.reload().await?;
        let projection = self
            .store
            .projection()
            .ok_or_else(|| BackendError::Classification("no inventory projection".to_string()))?;

        let spec = VtepSpec {
            name: self.config.iface.clone(),
            vni: self.config.vni,
            port: self.config.port,
            mtu: self.config.mtu,
            mac: peer_mac(self.config.mac_prefix, projection.self_entry.ip.addr()),
        };
        let link = self.kernel.ensure_vtep(&spec).await?;

        let desired = desired_tables(&projection, self.config.mac_prefix);
        // the responder answers from membership, not from kernel health
        writer.replace(desired.local.iter().copied(), desired.remote.iter().copied());

        self.apply(link, &desired).await
    }

    async fn apply(&self, link: LinkRef, desired: &DesiredTables) -> Result<(), BackendError> {
        let observed = self.kernel.routes(link).await?;
        self.apply_routes(link, &observed, &desired.routes).await?;

        let observed = self.kernel.neighbors(link, NeighborFamily::Inet).await?;
        self.apply_neighbors(link, NeighborFamily::Inet, "arp", &observed, &desired.arp)
            .await?;

        let observed = self.kernel.neighbors(link, NeighborFamily::Bridge).await?;
        self.apply_neighbors(link, NeighborFamily::Bridge, "fdb", &observed, &desired.fdb)
            .await
    }

    async fn apply_routes(
        &self,
        link: LinkRef,
        observed: &RouteTable,
        desired: &RouteTable,
    ) -> Result<(), BackendError> {
        let plan = overlay_plan::diff(observed, desired);
        debug!(
            add = plan.add.len(),
            remove = plan.remove.len(),
            update = plan.update.len(),
            "vxlan: route plan"
        );
        let mut first = None;
        let mut failures = 0;
        for dst in plan.remove.values() {
            if let Err(e) = self.kernel.del_route(link, *dst).await {
                failures += 1;
                record_first(&mut first, e.into(), "vxlan: failed to delete route");
            }
        }
        for dst in plan.add.values() {
            if let Err(e) = self.kernel.add_route(link, *dst).await {
                failures += 1;
                record_first(&mut first, e.into(), "vxlan: failed to add route");
            }
        }
        // a changed route converges as delete-then-add
        for (ip, dst) in &plan.update {
            if let Some(old) = observed.get(ip) {
                if let Err(e) = self.kernel.del_route(link, *old).await {
                    failures += 1;
                    record_first(&mut first, e.into(), "vxlan: failed to delete stale route");
                }
            }
            if let Err(e) = self.kernel.add_route(link, *dst).await {
                failures += 1;
                record_first(&mut first, e.into(), "vxlan: failed to add updated route");
            }
        }
        wrap_table("route", failures, first)
    }

    async fn apply_neighbors(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        table: &'static str,
        observed: &NeighborTable,
        desired: &NeighborTable,
    ) -> Result<(), BackendError> {
        let plan = overlay_plan::diff(observed, desired);
        debug!(
            add = plan.add.len(),
            remove = plan.remove.len(),
            update = plan.update.len(),
            "vxlan: {table} plan"
        );
        let mut first = None;
        let mut failures = 0;
        for (ip, mac) in &plan.remove {
            if let Err(e) = self.kernel.del_neighbor(link, family, *ip, *mac).await {
                failures += 1;
                record_first(&mut first, e.into(), "vxlan: failed to delete neighbor");
            }
        }
        for (ip, mac) in &plan.add {
            if let Err(e) = self.kernel.add_neighbor(link, family, *ip, *mac).await {
                failures += 1;
                record_first(&mut first, e.into(), "vxlan: failed to add neighbor");
            }
        }
        for (ip, mac) in &plan.update {
            match family {
                // the ARP table has a set-or-replace primitive
                NeighborFamily::Inet => {
                    if let Err(e) = self.kernel.replace_neighbor(link, family, *ip, *mac).await {
                        failures += 1;
                        record_first(&mut first, e.into(), "vxlan: failed to replace neighbor");
                    }
                }
                // the forwarding database does not; drop the stale binding first
                NeighborFamily::Bridge => {
                    if let Some(old) = observed.get(ip) {
                        if let Err(e) = self.kernel.del_neighbor(link, family, *ip, *old).await {
                            failures += 1;
                            record_first(
                                &mut first,
                                e.into(),
                                "vxlan: failed to delete stale forwarding entry",
                            );
                        }
                    }
                    if let Err(e) = self.kernel.add_neighbor(link, family, *ip, *mac).await {
                        failures += 1;
                        record_first(&mut first, e.into(), "vxlan: failed to add forwarding entry");
                    }
                }
            }
        }
        wrap_table(table, failures, first)
    }
}

fn wrap_table(
    table: &'static str,
    failures: usize,
    first: Option<BackendError>,
) -> Result<(), BackendError> {
    match first {
        None => Ok(()),
        Some(first) => Err(BackendError::Table {
            table,
            failures,
            first: Box::new(first),
        }),
    }
}
