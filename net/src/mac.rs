// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type and the overlay peer-MAC derivation.

use arrayvec::ArrayVec;
use std::fmt::Display;
use std::net::Ipv4Addr;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]` which provides a
/// small collection of methods and type safety.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Errors which can occur while converting a string to a [`Mac`]
#[derive(Debug, thiserror::Error)]
pub enum MacFromStringError {
    /// Invalid string representation of mac address
    #[error("invalid string representation of mac address: {0}")]
    Invalid(String),
}

impl TryFrom<&str> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        const MAX_OCTETS: usize = 6;
        let octets_strs = value.split(':');
        let octets_parsed = octets_strs.into_iter().try_fold(
            ArrayVec::<_, MAX_OCTETS>::new(),
            |mut acc, octet_str| {
                if octet_str.len() != 2 {
                    return Err(MacFromStringError::Invalid(value.to_string()));
                }
                if octet_str.chars().any(|c| !c.is_ascii_hexdigit()) {
                    return Err(MacFromStringError::Invalid(value.to_string()));
                }
                let parsed = u8::from_str_radix(octet_str, 16)
                    .map_err(|_| MacFromStringError::Invalid(value.to_string()))?;
                acc.try_push(parsed)
                    .map_err(|_| MacFromStringError::Invalid(value.to_string()))?;
                Ok(acc)
            },
        )?;

        let octets = match octets_parsed.as_slice() {
            [o0, o1, o2, o3, o4, o5] => [*o0, *o1, *o2, *o3, *o4, *o5],
            _ => return Err(MacFromStringError::Invalid(value.to_string())),
        };

        Ok(Mac(octets))
    }
}

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`.
    ///
    /// `ZERO` is illegal as a source or destination `Mac` in most contexts.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true iff the binary representation of the [`Mac`] is exclusively ones.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self == &Mac::BROADCAST
    }

    /// Returns true iff the least significant bit of the first octet of the `[Mac]` is one.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Returns true iff the binary representation of the [`Mac`] is exclusively zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// The reserved prefix from which every tunnel endpoint MAC is derived.
pub const PEER_MAC_PREFIX: Mac = Mac([0x0e, 0x00, 0x00, 0x00, 0x00, 0x00]);

/// Derive the deterministic tunnel-endpoint MAC for an overlay IPv4 address.
///
/// The low four octets of `prefix` are overwritten with the address octets,
/// so `0e:00:00:00:00:00` and `10.42.2.2` become `0e:00:0a:2a:02:02`.
/// Agents on different hosts compute each other's MAC from inventory alone;
/// the derivation is part of the wire contract and must not change.
#[must_use]
pub fn peer_mac(prefix: Mac, ip: Ipv4Addr) -> Mac {
    let mut mac = prefix.0;
    mac[2..6].copy_from_slice(&ip.octets());
    Mac(mac)
}

#[cfg(test)]
mod tests {
    use super::{Mac, PEER_MAC_PREFIX, peer_mac};
    use std::net::Ipv4Addr;

    #[test]
    fn parse_and_display_round_trip() {
        let mac = Mac::try_from("0e:00:0a:2a:1d:4e").unwrap();
        assert_eq!(mac, Mac([0x0e, 0x00, 0x0a, 0x2a, 0x1d, 0x4e]));
        assert_eq!(mac.to_string(), "0e:00:0a:2a:1d:4e");
        assert!(Mac::try_from("0e:00:0a:2a:1d").is_err());
        assert!(Mac::try_from("0e:00:0a:2a:1d:4e:00").is_err());
        assert!(Mac::try_from("zz:00:0a:2a:1d:4e").is_err());
    }

    #[test]
    fn derives_mac_from_overlay_ip() {
        let prefix = Mac::try_from("00:ab:00:00:00:00").unwrap();
        let mac = peer_mac(prefix, Ipv4Addr::new(10, 42, 29, 78));
        assert_eq!(mac.to_string(), "00:ab:0a:2a:1d:4e");
    }

    #[test]
    fn derivation_is_pure_and_keeps_ip_tail() {
        bolero::check!().with_type().for_each(|octets: &[u8; 4]| {
            let ip = Ipv4Addr::from(*octets);
            let a = peer_mac(PEER_MAC_PREFIX, ip);
            let b = peer_mac(PEER_MAC_PREFIX, ip);
            assert_eq!(a, b);
            assert_eq!(&a.0[2..6], &ip.octets());
            assert_eq!(a.0[0], PEER_MAC_PREFIX.0[0]);
            assert_eq!(a.0[1], PEER_MAC_PREFIX.0[1]);
        });
    }
}
