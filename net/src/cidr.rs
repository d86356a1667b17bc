// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Overlay addresses in CIDR form.

use std::fmt::Display;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address qualified with its subnet prefix length, `a.b.c.d/p`.
///
/// Inventory entries carry overlay addresses in this form; the bare address
/// (prefix stripped) is the key used by every derived map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CidrV4 {
    addr: Ipv4Addr,
    prefix_len: u8,
}

/// Errors which can occur while parsing a [`CidrV4`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CidrError {
    /// Not in `a.b.c.d/p` form
    #[error("'{0}' is not a valid CIDR address")]
    Malformed(String),
    /// Prefix length over 32
    #[error("prefix length {0} is out of range (max 32)")]
    PrefixTooLong(u8),
}

impl CidrV4 {
    /// Qualify an address with a prefix length.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix_len` exceeds 32.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<CidrV4, CidrError> {
        if prefix_len > 32 {
            return Err(CidrError::PrefixTooLong(prefix_len));
        }
        Ok(CidrV4 { addr, prefix_len })
    }

    /// Qualify an address as a /32 host route.
    #[must_use]
    pub fn host(addr: Ipv4Addr) -> CidrV4 {
        CidrV4 {
            addr,
            prefix_len: 32,
        }
    }

    /// The bare address, prefix stripped.
    #[must_use]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// The prefix length.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The network this address belongs to (host bits masked off).
    #[must_use]
    pub fn network(&self) -> CidrV4 {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        };
        CidrV4 {
            addr: Ipv4Addr::from(u32::from(self.addr) & mask),
            prefix_len: self.prefix_len,
        }
    }
}

impl FromStr for CidrV4 {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Malformed(s.to_string()))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| CidrError::Malformed(s.to_string()))?;
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|_| CidrError::Malformed(s.to_string()))?;
        CidrV4::new(addr, prefix_len)
    }
}

impl Display for CidrV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl serde::Serialize for CidrV4 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for CidrV4 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{CidrError, CidrV4};
    use std::net::Ipv4Addr;

    #[test]
    fn parse_and_display_round_trip() {
        let cidr: CidrV4 = "10.42.1.1/16".parse().unwrap();
        assert_eq!(cidr.addr(), Ipv4Addr::new(10, 42, 1, 1));
        assert_eq!(cidr.prefix_len(), 16);
        assert_eq!(cidr.to_string(), "10.42.1.1/16");
    }

    #[test]
    fn rejects_bad_input() {
        assert!("10.42.1.1".parse::<CidrV4>().is_err());
        assert!("10.42.1/16".parse::<CidrV4>().is_err());
        assert_eq!(
            "10.42.1.1/33".parse::<CidrV4>(),
            Err(CidrError::PrefixTooLong(33))
        );
    }

    #[test]
    fn masks_host_bits() {
        let cidr: CidrV4 = "10.42.29.78/16".parse().unwrap();
        assert_eq!(cidr.network().to_string(), "10.42.0.0/16");
        assert_eq!(CidrV4::host(cidr.addr()).to_string(), "10.42.29.78/32");
    }

    #[test]
    fn serde_uses_string_form() {
        let cidr: CidrV4 = serde_json::from_str("\"10.42.2.2/16\"").unwrap();
        assert_eq!(serde_json::to_string(&cidr).unwrap(), "\"10.42.2.2/16\"");
    }
}
