// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow endpoints.

use crate::natip::NatIp;
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};

/// One endpoint of a translated flow: an address and a port (or ICMP echo identifier).
///
/// Tuples are used both as keys and as values of a [`crate::TranslationTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tuple<I: NatIp> {
    pub addr: I,
    pub port: u16,
}

pub type Tuple4 = Tuple<Ipv4Addr>;
pub type Tuple6 = Tuple<Ipv6Addr>;

impl<I: NatIp> Tuple<I> {
    #[must_use]
    pub const fn new(addr: I, port: u16) -> Self {
        Self { addr, port }
    }

    /// Whether this is the sentinel of a rule delivering to the local stack.
    #[must_use]
    pub fn is_unspecified(&self) -> bool {
        self.addr == I::unspecified()
    }
}

impl<I: NatIp> Display for Tuple<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match I::VERSION {
            net::IpVersion::V4 => write!(f, "{}:{}", self.addr, self.port),
            net::IpVersion::V6 => write!(f, "[{}]:{}", self.addr, self.port),
        }
    }
}
