// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type.

use arrayvec::ArrayVec;
use std::fmt::Display;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]`.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The all-zero `Mac`
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true if the group bit is set (multicast or broadcast).
    #[must_use]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Returns true if this is the broadcast address.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Mac::BROADCAST
    }

    /// Multicast `Mac` an IPv6 multicast destination maps to (`33:33` + low 32 bits).
    #[must_use]
    pub fn from_ipv6_multicast(addr: std::net::Ipv6Addr) -> Mac {
        let o = addr.octets();
        Mac([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }
}

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
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MacFromStringError {
    /// Invalid string representation of mac address
    #[error("invalid string representation of mac address: {0}")]
    Invalid(String),
}

impl TryFrom<&str> for Mac {
    type Error = MacFromStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        const MAX_OCTETS: usize = 6;
        let invalid = || MacFromStringError::Invalid(value.to_string());
        let octets = value
            .split(':')
            .try_fold(ArrayVec::<u8, MAX_OCTETS>::new(), |mut acc, octet| {
                if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                let parsed = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
                acc.try_push(parsed).map_err(|_| invalid())?;
                Ok(acc)
            })?;
        let octets: [u8; MAX_OCTETS] = octets.into_inner().map_err(|_| invalid())?;
        Ok(Mac(octets))
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // valid in tests
mod tests {
    use super::*;

    #[test]
    fn mac_string_round_trip() {
        let mac = Mac::try_from("02:00:5e:10:00:fa").unwrap();
        assert_eq!(mac, Mac([0x02, 0x00, 0x5e, 0x10, 0x00, 0xfa]));
        assert_eq!(mac.to_string(), "02:00:5e:10:00:fa");
    }

    #[test]
    fn mac_rejects_bad_strings() {
        assert!(Mac::try_from("02:00:5e:10:00").is_err());
        assert!(Mac::try_from("02:00:5e:10:00:fa:01").is_err());
        assert!(Mac::try_from("02:00:5e:10:00:zz").is_err());
        assert!(Mac::try_from("2:00:5e:10:00:fa").is_err());
    }

    #[test]
    fn multicast_bits() {
        assert!(Mac::BROADCAST.is_multicast());
        assert!(Mac::BROADCAST.is_broadcast());
        assert!(!Mac([0x02, 0, 0, 0, 0, 1]).is_multicast());
        let mcast = Mac::from_ipv6_multicast("ff02::1:ff00:1234".parse().unwrap());
        assert_eq!(mcast, Mac([0x33, 0x33, 0xff, 0x00, 0x12, 0x34]));
    }
}
