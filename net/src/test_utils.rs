// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Frame builders for tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)] // test helpers

use crate::mac::Mac;
use etherparse::{IpHeaders, PacketBuilder, PacketBuilderStep, TcpHeader};
use std::net::Ipv6Addr;

/// Source MAC used by the builders.
pub const SRC_MAC: Mac = Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0xaa]);
/// Destination MAC used by the builders.
pub const DST_MAC: Mac = Mac([0x02, 0x00, 0x00, 0x00, 0x00, 0xbb]);

const PAYLOAD: &[u8] = b"natgw";

/// Which TCP control flags to set on a built segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpKind {
    Syn,
    Ack,
    Fin,
    Rst,
}

fn tcp_builder(
    step: PacketBuilderStep<IpHeaders>,
    sport: u16,
    dport: u16,
    kind: TcpKind,
) -> PacketBuilderStep<TcpHeader> {
    let tcp = step.tcp(sport, dport, 1000, 4096);
    match kind {
        TcpKind::Syn => tcp.syn(),
        TcpKind::Ack => tcp.ack(1),
        TcpKind::Fin => tcp.fin().ack(1),
        TcpKind::Rst => tcp.rst(),
    }
}

fn write(builder: PacketBuilderStep<TcpHeader>) -> Vec<u8> {
    let mut out = Vec::with_capacity(builder.size(PAYLOAD.len()));
    builder.write(&mut out, PAYLOAD).unwrap();
    out
}

/// An untagged IPv4 TCP frame.
#[must_use]
pub fn tcp4(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, kind: TcpKind) -> Vec<u8> {
    let step = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0).ipv4(src, dst, 64);
    write(tcp_builder(step, sport, dport, kind))
}

/// An untagged IPv6 TCP frame.
#[must_use]
pub fn tcp6(src: Ipv6Addr, sport: u16, dst: Ipv6Addr, dport: u16, kind: TcpKind) -> Vec<u8> {
    let step = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0).ipv6(src.octets(), dst.octets(), 64);
    write(tcp_builder(step, sport, dport, kind))
}

/// An untagged IPv4 UDP frame.
#[must_use]
pub fn udp4(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0)
        .ipv4(src, dst, 64)
        .udp(sport, dport);
    let mut out = Vec::with_capacity(builder.size(PAYLOAD.len()));
    builder.write(&mut out, PAYLOAD).unwrap();
    out
}

/// An untagged IPv6 UDP frame.
#[must_use]
pub fn udp6(src: Ipv6Addr, sport: u16, dst: Ipv6Addr, dport: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0)
        .ipv6(src.octets(), dst.octets(), 64)
        .udp(sport, dport);
    let mut out = Vec::with_capacity(builder.size(PAYLOAD.len()));
    builder.write(&mut out, PAYLOAD).unwrap();
    out
}

/// An untagged ICMP echo request.
#[must_use]
pub fn echo4(src: [u8; 4], dst: [u8; 4], id: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0)
        .ipv4(src, dst, 64)
        .icmpv4_echo_request(id, 1);
    let mut out = Vec::with_capacity(builder.size(PAYLOAD.len()));
    builder.write(&mut out, PAYLOAD).unwrap();
    out
}

/// An untagged ICMPv6 echo request.
#[must_use]
pub fn echo6(src: Ipv6Addr, dst: Ipv6Addr, id: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC.0, DST_MAC.0)
        .ipv6(src.octets(), dst.octets(), 64)
        .icmpv6_echo_request(id, 1);
    let mut out = Vec::with_capacity(builder.size(PAYLOAD.len()));
    builder.write(&mut out, PAYLOAD).unwrap();
    out
}

/// Insert an 802.1Q tag carrying `vlan` into an untagged frame.
#[must_use]
pub fn tagged(frame: Vec<u8>, vlan: u16) -> Vec<u8> {
    let tci = (vlan & 0x0fff).to_be_bytes();
    let mut out = Vec::with_capacity(frame.len() + 4);
    out.extend_from_slice(&frame[..12]);
    out.extend_from_slice(&[0x81, 0x00, tci[0], tci[1]]);
    out.extend_from_slice(&frame[12..]);
    out
}
