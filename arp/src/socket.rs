// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! AF_PACKET capture socket bound to one interface, ARP ethertype only.

#![allow(unsafe_code)] // raw socket setup and I/O use the libc FFI

use crate::ArpError;
use overlay_net::arp::ETHERTYPE_ARP;
use overlay_net::Mac;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::debug;

/// A raw frame socket delivering (and sending) ARP frames on one interface.
pub struct ArpSocket {
    fd: AsyncFd<RawFd>,
    mac: Mac,
}

impl ArpSocket {
    /// Open the capture socket on `iface`.
    ///
    /// # Errors
    ///
    /// Returns [`ArpError::InterfaceNotFound`] when the interface cannot be
    /// resolved and [`ArpError::Io`] on socket failures.
    pub fn bind(iface: &str) -> Result<ArpSocket, ArpError> {
        let protocol = u16::to_be(ETHERTYPE_ARP);
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                i32::from(protocol),
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let socket = RawSocket(fd);

        let ifindex = ifindex(fd, iface)?;
        let mac = hardware_address(fd, iface)?;
        debug!(%iface, ifindex, %mac, "binding arp capture socket");

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol,
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        let rc = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(sockaddr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let fd = AsyncFd::new(fd)?;
        std::mem::forget(socket);
        Ok(ArpSocket { fd, mac })
    }

    /// The capture interface's link-layer address.
    #[must_use]
    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Receive one frame. Blocks until a frame arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ArpError::Io`] on socket errors; callers treat this as
    /// terminal.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, ArpError> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|fd| {
                let n = unsafe {
                    libc::recv(
                        fd.as_raw_fd(),
                        buf.as_mut_ptr().cast::<libc::c_void>(),
                        buf.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    #[allow(clippy::cast_sign_loss)]
                    Ok(n as usize)
                }
            });
            match result {
                Ok(ready) => return Ok(ready?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one complete ethernet frame out of the capture interface.
    ///
    /// # Errors
    ///
    /// Returns [`ArpError::Io`] on socket errors.
    pub async fn send(&self, frame: &[u8]) -> Result<(), ArpError> {
        loop {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|fd| {
                let n = unsafe {
                    libc::send(
                        fd.as_raw_fd(),
                        frame.as_ptr().cast::<libc::c_void>(),
                        frame.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            });
            match result {
                Ok(ready) => return Ok(ready?),
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for ArpSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd.as_raw_fd());
        }
    }
}

/// Closes the descriptor if setup bails before `AsyncFd` takes over.
struct RawSocket(RawFd);

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn ifreq_for(fd: RawFd, iface: &str, request: libc::c_ulong) -> Result<libc::ifreq, ArpError> {
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let name = iface.as_bytes();
    if name.is_empty() || name.len() >= ifr.ifr_name.len() {
        return Err(ArpError::InterfaceNotFound(iface.to_string()));
    }
    for (slot, byte) in ifr.ifr_name.iter_mut().zip(name) {
        *slot = *byte as libc::c_char;
    }
    let rc = unsafe { libc::ioctl(fd, request, &mut ifr) };
    if rc < 0 {
        return Err(ArpError::InterfaceNotFound(iface.to_string()));
    }
    Ok(ifr)
}

fn ifindex(fd: RawFd, iface: &str) -> Result<i32, ArpError> {
    let ifr = ifreq_for(fd, iface, libc::SIOCGIFINDEX)?;
    Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
}

fn hardware_address(fd: RawFd, iface: &str) -> Result<Mac, ArpError> {
    let ifr = ifreq_for(fd, iface, libc::SIOCGIFHWADDR)?;
    let raw = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
    let mut octets = [0u8; 6];
    for (slot, byte) in octets.iter_mut().zip(raw.iter()) {
        #[allow(clippy::cast_sign_loss)]
        {
            *slot = *byte as u8;
        }
    }
    Ok(Mac(octets))
}
