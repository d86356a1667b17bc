// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! VXLAN network identifier validation.

use core::num::NonZero;

/// A VXLAN Network Identifier.
///
/// The [`Vni`] is a 24-bit value that identifies a VXLAN network.
/// Value 0 is reserved and the maximum legal value is 2^24 - 1.
///
/// It is deliberately not possible to create a [`Vni`] from a `u32` directly,
/// as this would allow the creation of illegal values.
/// Instead, use [`Vni::new`] to create a [`Vni`] from a `u32`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Vni(NonZero<u32>);

/// Errors that can occur when converting a `u32` to a [`Vni`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[must_use]
pub enum InvalidVni {
    /// Zero is reserved and never a legal [`Vni`].
    #[error("zero is not a legal Vni")]
    ReservedZero,
    /// The value is too large to be a [`Vni`] (max is 2^24 - 1).
    #[error("{0} is too large to be a legal Vni (max is 2^24 - 1)")]
    TooLarge(u32),
}

impl Vni {
    /// The maximum legal [`Vni`] value (2^24 - 1).
    pub const MAX: u32 = 0x00_FF_FF_FF;

    /// Create a new [`Vni`] from a `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is 0 or greater than [`Vni::MAX`].
    pub fn new(vni: u32) -> Result<Vni, InvalidVni> {
        match NonZero::<u32>::new(vni) {
            None => Err(InvalidVni::ReservedZero),
            Some(vni) => {
                if vni.get() > Vni::MAX {
                    Err(InvalidVni::TooLarge(vni.get()))
                } else {
                    Ok(Vni(vni))
                }
            }
        }
    }

    /// Get the value of the [`Vni`] as a `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0.get()
    }
}

impl core::fmt::Display for Vni {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl TryFrom<u32> for Vni {
    type Error = InvalidVni;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Vni::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{InvalidVni, Vni};

    #[test]
    fn rejects_reserved_and_oversized_values() {
        assert_eq!(Vni::new(0), Err(InvalidVni::ReservedZero));
        assert_eq!(Vni::new(Vni::MAX + 1), Err(InvalidVni::TooLarge(Vni::MAX + 1)));
        assert_eq!(Vni::new(1042).unwrap().as_u32(), 1042);
    }
}
