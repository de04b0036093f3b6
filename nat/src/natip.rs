// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT IP address trait: a sealed trait to represent either IPv4 or IPv6 in IP-version-generic
//! code.

use crate::table::{FamilyTable, TranslationTable};
use net::IpVersion;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// Keeping this module private provides a "sealed" trait: only types defined in this crate can
// implement it, external types cannot implement `Sealed`.
mod private {
    pub trait Sealed {}
}

/// `NatIp` is a sealed trait to represent either IPv4 or IPv6.
pub trait NatIp:
    private::Sealed + Debug + Display + Clone + Copy + Eq + Ord + Hash + Send + Sync + 'static
{
    const VERSION: IpVersion;

    /// Convert to an `IpAddr` object
    fn to_ip_addr(&self) -> IpAddr;

    /// Convert from an `IpAddr` object, if the family matches
    fn try_from_addr(addr: IpAddr) -> Option<Self>;

    /// The all-zero address, marking rules that deliver to the local stack
    fn unspecified() -> Self;

    /// The per-protocol maps for this family inside `table`
    fn family(table: &TranslationTable) -> &FamilyTable<Self>;
}

impl private::Sealed for Ipv4Addr {}
impl private::Sealed for Ipv6Addr {}

impl NatIp for Ipv4Addr {
    const VERSION: IpVersion = IpVersion::V4;

    fn to_ip_addr(&self) -> IpAddr {
        IpAddr::V4(*self)
    }
    fn try_from_addr(addr: IpAddr) -> Option<Self> {
        if let IpAddr::V4(addr) = addr {
            Some(addr)
        } else {
            None
        }
    }
    fn unspecified() -> Self {
        Ipv4Addr::UNSPECIFIED
    }
    fn family(table: &TranslationTable) -> &FamilyTable<Self> {
        &table.v4
    }
}

impl NatIp for Ipv6Addr {
    const VERSION: IpVersion = IpVersion::V6;

    fn to_ip_addr(&self) -> IpAddr {
        IpAddr::V6(*self)
    }
    fn try_from_addr(addr: IpAddr) -> Option<Self> {
        if let IpAddr::V6(addr) = addr {
            Some(addr)
        } else {
            None
        }
    }
    fn unspecified() -> Self {
        Ipv6Addr::UNSPECIFIED
    }
    fn family(table: &TranslationTable) -> &FamilyTable<Self> {
        &table.v6
    }
}
