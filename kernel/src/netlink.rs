// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::error::KernelError;
use crate::objects::{LinkRef, NeighborTable, RouteTable, VtepSpec};
use futures::TryStreamExt;
use overlay_net::{CidrV4, InterfaceName, Mac};
use rtnetlink::packet_route::link::{InfoData, InfoVxlan, LinkAttribute};
use rtnetlink::packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourFlags, NeighbourMessage, NeighbourState,
};
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute};
use rtnetlink::packet_route::AddressFamily;
use rtnetlink::{Handle, LinkUnspec, LinkVxlan, RouteMessageBuilder};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, warn};

const LINK_UP_RETRIES: usize = 3;
const LINK_UP_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Address family a neighbor table is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborFamily {
    /// ARP entries.
    Inet,
    /// Bridge forwarding-database entries.
    Bridge,
}

impl From<NeighborFamily> for AddressFamily {
    fn from(value: NeighborFamily) -> Self {
        match value {
            NeighborFamily::Inet => AddressFamily::Inet,
            NeighborFamily::Bridge => AddressFamily::Bridge,
        }
    }
}

/// Route-family netlink access, scoped to what the reconcilers program.
#[derive(Clone, Debug)]
pub struct Netlink {
    handle: Handle,
}

fn is_eexist(err: &rtnetlink::Error) -> bool {
    match err {
        rtnetlink::Error::NetlinkError(msg) => {
            msg.code.map(|code| code.get().unsigned_abs()) == Some(libc::EEXIST as u32)
        }
        _ => false,
    }
}

impl Netlink {
    /// Open a netlink connection; the transport task runs on the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Socket`] when the socket cannot be opened.
    pub fn connect() -> Result<Netlink, KernelError> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(KernelError::Socket)?;
        tokio::spawn(connection);
        Ok(Netlink { handle })
    }

    /// Look a link up by name.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures other than "no such device".
    pub async fn find_link(&self, name: &InterfaceName) -> Result<Option<LinkRef>, KernelError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(link)) => Ok(Some(LinkRef {
                index: link.header.index,
            })),
            Ok(None) => Ok(None),
            // a name mismatch surfaces as ENODEV rather than an empty dump
            Err(rtnetlink::Error::NetlinkError(msg))
                if msg.code.map(|code| code.get().unsigned_abs())
                    == Some(libc::ENODEV as u32) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the tunnel link if absent, program its MAC, and bring it up.
    ///
    /// Creation racing another creator is fine: an `EEXIST` answer counts as
    /// success. Bring-up is retried a bounded number of times because the
    /// kernel reports spurious errors immediately after link creation.
    ///
    /// # Errors
    ///
    /// [`KernelError::CreateFailed`] when creation fails for any reason other
    /// than already-exists, [`KernelError::Inconsistent`] when the link then
    /// cannot be found, [`KernelError::LinkUpFailed`] when it refuses to come
    /// up within the retry budget.
    pub async fn ensure_vtep(&self, spec: &VtepSpec) -> Result<LinkRef, KernelError> {
        if let Some(link) = self.find_link(&spec.name).await? {
            return Ok(link);
        }

        debug!(name = %spec.name, vni = %spec.vni, port = spec.port, "creating vxlan link");
        let mut message = LinkVxlan::new(spec.name.as_ref(), spec.vni.as_u32())
            .set_info_data(InfoData::Vxlan(vec![
                InfoVxlan::Id(spec.vni.as_u32()),
                InfoVxlan::Port(spec.port),
                InfoVxlan::Learning(false),
                InfoVxlan::Proxy(true),
                InfoVxlan::L2Miss(true),
                InfoVxlan::L3Miss(true),
                InfoVxlan::Rsc(true),
            ]))
            .build();
        message.attributes.push(LinkAttribute::Mtu(spec.mtu));
        if let Err(source) = self.handle.link().add(message).execute().await {
            if !is_eexist(&source) {
                return Err(KernelError::CreateFailed {
                    name: spec.name.clone(),
                    source,
                });
            }
        }

        let link = self
            .find_link(&spec.name)
            .await?
            .ok_or_else(|| KernelError::Inconsistent(spec.name.clone()))?;

        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(link.index)
                    .address(spec.mac.0.to_vec())
                    .build(),
            )
            .execute()
            .await?;

        let mut last = None;
        for attempt in 0..LINK_UP_RETRIES {
            match self
                .handle
                .link()
                .set(LinkUnspec::new_with_index(link.index).up().build())
                .execute()
                .await
            {
                Ok(()) => return Ok(link),
                Err(e) => {
                    debug!(name = %spec.name, attempt, "setting link up got error: {e}");
                    last = Some(e);
                    tokio::time::sleep(LINK_UP_RETRY_DELAY).await;
                }
            }
        }
        Err(match last {
            Some(source) => KernelError::LinkUpFailed {
                name: spec.name.clone(),
                source,
            },
            None => KernelError::Inconsistent(spec.name.clone()),
        })
    }

    /// Delete a link.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn delete_link(&self, link: LinkRef) -> Result<(), KernelError> {
        self.handle.link().del(link.index).execute().await?;
        Ok(())
    }

    /// The IPv4 routes currently installed through `link`, keyed by bare
    /// destination address.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn routes(&self, link: LinkRef) -> Result<RouteTable, KernelError> {
        let mut table = RouteTable::new();
        let message = RouteMessageBuilder::<Ipv4Addr>::new().build();
        let mut stream = self.handle.route().get(message).execute();
        while let Some(route) = stream.try_next().await? {
            let mut destination = None;
            let mut oif = None;
            for attribute in &route.attributes {
                match attribute {
                    RouteAttribute::Destination(RouteAddress::Inet(addr)) => {
                        destination = Some(*addr);
                    }
                    RouteAttribute::Oif(index) => oif = Some(*index),
                    _ => {}
                }
            }
            if oif != Some(link.index) {
                continue;
            }
            let Some(addr) = destination else { continue };
            let Ok(dst) = CidrV4::new(addr, route.header.destination_prefix_length) else {
                continue;
            };
            table.insert(addr, dst);
        }
        Ok(table)
    }

    /// Add a unicast route for `dst` out of `link`.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn add_route(&self, link: LinkRef, dst: CidrV4) -> Result<(), KernelError> {
        let route = RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(dst.addr(), dst.prefix_len())
            .output_interface(link.index)
            .build();
        self.handle.route().add(route).execute().await?;
        Ok(())
    }

    /// Delete the route for `dst` out of `link`.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn del_route(&self, link: LinkRef, dst: CidrV4) -> Result<(), KernelError> {
        let route = RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(dst.addr(), dst.prefix_len())
            .output_interface(link.index)
            .build();
        self.handle.route().del(route).execute().await?;
        Ok(())
    }

    /// The neighbor entries of `family` currently installed on `link`,
    /// keyed by IP.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn neighbors(
        &self,
        link: LinkRef,
        family: NeighborFamily,
    ) -> Result<NeighborTable, KernelError> {
        let mut request = self.handle.neighbours().get();
        request.message_mut().header.family = family.into();
        let mut stream = request.execute();
        let mut table = NeighborTable::new();
        while let Some(neighbor) = stream.try_next().await? {
            if neighbor.header.ifindex != link.index {
                continue;
            }
            let Some((ip, mac)) = decode_neighbor(&neighbor) else {
                continue;
            };
            table.insert(ip, mac);
        }
        Ok(table)
    }

    /// Install a permanent, self-answered neighbor entry.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn add_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        self.neighbor_request(link, family, ip, mac, false).await
    }

    /// Install or overwrite a permanent, self-answered neighbor entry.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn replace_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        self.neighbor_request(link, family, ip, mac, true).await
    }

    async fn neighbor_request(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
        replace: bool,
    ) -> Result<(), KernelError> {
        let mut request = match family {
            NeighborFamily::Inet => self
                .handle
                .neighbours()
                .add(link.index, IpAddr::V4(ip))
                .link_local_address(&mac.0),
            NeighborFamily::Bridge => {
                let mut request = self.handle.neighbours().add_bridge(link.index, &mac.0);
                request
                    .message_mut()
                    .attributes
                    .push(NeighbourAttribute::Destination(NeighbourAddress::Inet(ip)));
                request
            }
        };
        request = request
            .state(NeighbourState::Permanent)
            .flags(vec![NeighbourFlag::Self_]);
        let request = if replace { request.replace() } else { request };
        request.execute().await?;
        Ok(())
    }

    /// Delete a neighbor entry.
    ///
    /// # Errors
    ///
    /// Propagates netlink failures.
    pub async fn del_neighbor(
        &self,
        link: LinkRef,
        family: NeighborFamily,
        ip: Ipv4Addr,
        mac: Mac,
    ) -> Result<(), KernelError> {
        let mut message = NeighbourMessage::default();
        message.header.family = family.into();
        message.header.ifindex = link.index;
        message.header.state = NeighbourState::Permanent;
        message.header.flags = vec![NeighbourFlag::Self_];
        message
            .attributes
            .push(NeighbourAttribute::Destination(NeighbourAddress::Inet(ip)));
        message
            .attributes
            .push(NeighbourAttribute::LinkLocalAddress(mac.0.to_vec()));
        if let Err(e) = self.handle.neighbours().del(message).execute().await {
            warn!(%ip, %mac, "failed to delete neighbor: {e}");
            return Err(e.into());
        }
        Ok(())
    }
}

fn decode_neighbor(message: &NeighbourMessage) -> Option<(Ipv4Addr, Mac)> {
    let mut ip = None;
    let mut mac = None;
    for attribute in &message.attributes {
        match attribute {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(addr)) => ip = Some(*addr),
            NeighbourAttribute::LinkLocalAddress(lladdr) => {
                if let Ok(octets) = <[u8; 6]>::try_from(lladdr.as_slice()) {
                    mac = Some(Mac(octets));
                }
            }
            _ => {}
        }
    }
    Some((ip?, mac?))
}
