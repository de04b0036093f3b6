// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Frame handling for the NAT gateway.
//!
//! This crate wraps [`etherparse`] to provide the small set of operations the translation engine
//! needs on a received Ethernet frame: classification (VLAN, IP version, transport protocol,
//! addresses, ports, TCP flags), in-place rewrite of addresses and ports, and checksum refresh.
//! It also provides the [`Mac`] type, ARP parsing/building, and the IPv6 addresses an interface
//! derives from its configuration.

pub mod arp;
pub mod frame;
pub mod ip;
pub mod mac;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use frame::{ChecksumMode, Frame, FrameError, TcpFlags};
pub use ip::{IpProto, IpVersion};
pub use mac::Mac;
