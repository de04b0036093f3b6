// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP version and transport protocol identifiers, plus the IPv6 addresses an interface derives
//! from its MAC and its configured address.

use crate::mac::Mac;
use std::fmt::Display;
use std::net::Ipv6Addr;

/// IP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Transport protocols the gateway translates.
///
/// ICMP and ICMPv6 are only translated for echo request/reply, with the echo identifier standing
/// in for the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpProto {
    Tcp,
    Udp,
    Icmp,
    Icmp6,
}

impl IpProto {
    /// Every protocol, in table order.
    pub const ALL: [IpProto; 4] = [IpProto::Tcp, IpProto::Udp, IpProto::Icmp, IpProto::Icmp6];

    /// IANA protocol number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            IpProto::Tcp => 6,
            IpProto::Udp => 17,
            IpProto::Icmp => 1,
            IpProto::Icmp6 => 58,
        }
    }

    /// Inverse of [`IpProto::number`]. Unsupported protocols map to `None`.
    #[must_use]
    pub const fn from_number(number: u8) -> Option<IpProto> {
        match number {
            6 => Some(IpProto::Tcp),
            17 => Some(IpProto::Udp),
            1 => Some(IpProto::Icmp),
            58 => Some(IpProto::Icmp6),
            _ => None,
        }
    }

    /// Dense index usable to address per-protocol arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            IpProto::Tcp => 0,
            IpProto::Udp => 1,
            IpProto::Icmp => 2,
            IpProto::Icmp6 => 3,
        }
    }

    /// Whether this protocol can be carried by the given IP version.
    #[must_use]
    pub const fn valid_for(self, version: IpVersion) -> bool {
        match self {
            IpProto::Tcp | IpProto::Udp => true,
            IpProto::Icmp => matches!(version, IpVersion::V4),
            IpProto::Icmp6 => matches!(version, IpVersion::V6),
        }
    }
}

impl Display for IpProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IpProto::Tcp => "tcp",
            IpProto::Udp => "udp",
            IpProto::Icmp => "icmp",
            IpProto::Icmp6 => "icmp6",
        };
        write!(f, "{name}")
    }
}

/// Link-local address (`fe80::/64`) built from `mac` with the modified EUI-64 scheme.
#[must_use]
pub fn link_local_from_mac(mac: Mac) -> Ipv6Addr {
    let m = mac.0;
    Ipv6Addr::from([
        0xfe,
        0x80,
        0,
        0,
        0,
        0,
        0,
        0,
        m[0] ^ 0x02,
        m[1],
        m[2],
        0xff,
        0xfe,
        m[3],
        m[4],
        m[5],
    ])
}

/// Solicited-node multicast address (`ff02::1:ffXX:XXXX`) for `addr`.
#[must_use]
pub fn solicited_node_multicast(addr: Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, o[13], o[14], o[15],
    ])
}
