// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface subnets.
//!
//! A subnet is either statically configured (a CIDR, or a bare address implying a host mask) or
//! pending acquisition over DHCP. A pending subnet has an all-zero address and mask until a lease
//! is applied.

use crate::errors::ConfigError;
use ipnet::{Ipv4Net, Ipv6Net};
use std::fmt::{Debug, Display};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Literal selecting address acquisition over DHCP.
pub const DHCP: &str = "dhcp";

/// Operations the two address families share.
pub trait Network: Copy + Debug + Display + PartialEq + Eq + FromStr {
    type Addr: Copy + Debug + Display + PartialEq + Eq + FromStr;

    /// The all-zero network with an all-zero mask.
    const UNSPECIFIED: Self;

    /// A network holding exactly `addr`.
    fn host(addr: Self::Addr) -> Self;

    /// The configured address, host bits included.
    fn address(&self) -> Self::Addr;

    /// `(addr & mask) == (self.addr & mask)`
    fn contains_addr(&self, addr: &Self::Addr) -> bool;
}

impl Network for Ipv4Net {
    type Addr = Ipv4Addr;
    const UNSPECIFIED: Self = Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0);

    fn host(addr: Ipv4Addr) -> Self {
        Ipv4Net::from(addr)
    }

    fn address(&self) -> Ipv4Addr {
        self.addr()
    }

    fn contains_addr(&self, addr: &Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask());
        u32::from(*addr) & mask == u32::from(self.addr()) & mask
    }
}

impl Network for Ipv6Net {
    type Addr = Ipv6Addr;
    const UNSPECIFIED: Self = Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0);

    fn host(addr: Ipv6Addr) -> Self {
        Ipv6Net::from(addr)
    }

    fn address(&self) -> Ipv6Addr {
        self.addr()
    }

    fn contains_addr(&self, addr: &Ipv6Addr) -> bool {
        let mask = u128::from(self.netmask());
        u128::from(*addr) & mask == u128::from(self.addr()) & mask
    }
}

/// An interface subnet of either address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
#[serde(bound(deserialize = "N: Network", serialize = "N: Network"))]
pub struct Subnet<N: Network> {
    net: N,
    acquired: bool,
}

/// IPv4 interface subnet
pub type Subnet4 = Subnet<Ipv4Net>;
/// IPv6 interface subnet
pub type Subnet6 = Subnet<Ipv6Net>;

impl<N: Network> Subnet<N> {
    /// A subnet waiting for an address lease.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            net: N::UNSPECIFIED,
            acquired: false,
        }
    }

    /// A statically known subnet.
    #[must_use]
    pub fn acquired(net: N) -> Self {
        Self {
            net,
            acquired: true,
        }
    }

    #[must_use]
    pub fn net(&self) -> N {
        self.net
    }

    /// The interface's own address (unspecified while pending).
    #[must_use]
    pub fn address(&self) -> N::Addr {
        self.net.address()
    }

    /// False while waiting for DHCP.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Whether `addr` belongs to this subnet. Every address belongs to a pending subnet.
    #[must_use]
    pub fn contains(&self, addr: &N::Addr) -> bool {
        self.net.contains_addr(addr)
    }
}

impl<N: Network> Default for Subnet<N> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<N: Network> FromStr for Subnet<N> {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == DHCP {
            return Ok(Self::pending());
        }
        if s.contains('/') {
            return s
                .parse::<N>()
                .map(Self::acquired)
                .map_err(|_| ConfigError::InvalidSubnet(s.to_string()));
        }
        s.parse::<N::Addr>()
            .map(|addr| Self::acquired(N::host(addr)))
            .map_err(|_| ConfigError::InvalidSubnet(s.to_string()))
    }
}

impl<N: Network> TryFrom<String> for Subnet<N> {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<N: Network> From<Subnet<N>> for String {
    fn from(value: Subnet<N>) -> Self {
        value.to_string()
    }
}

impl<N: Network> Display for Subnet<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.acquired {
            write!(f, "{}", self.net)
        } else {
            write!(f, "{DHCP}")
        }
    }
}
