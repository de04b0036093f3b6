// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ARP for IPv4 over Ethernet.

use crate::mac::Mac;
use etherparse::{EtherType, Ethernet2Header, SingleVlanHeader, VlanId, VlanPcp};
use std::net::Ipv4Addr;

/// Size of an Ethernet/IPv4 ARP body
pub const ARP_LEN: usize = 28;
const HTYPE_ETHERNET: u16 = 1;

/// ARP operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
}

impl ArpOp {
    const fn code(self) -> u16 {
        match self {
            ArpOp::Request => 1,
            ArpOp::Reply => 2,
        }
    }
}

/// Errors which may occur when parsing an ARP message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArpError {
    #[error("arp message truncated ({0} bytes)")]
    Truncated(usize),
    #[error("unsupported arp hardware/protocol combination")]
    Unsupported,
    #[error("unknown arp operation {0}")]
    UnknownOp(u16),
    #[error("invalid vlan id {0}")]
    InvalidVlan(u16),
}

/// An Ethernet/IPv4 ARP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: ArpOp,
    pub sender_mac: Mac,
    pub sender_ip: Ipv4Addr,
    pub target_mac: Mac,
    pub target_ip: Ipv4Addr,
}

fn mac_at(buf: &[u8], offset: usize) -> Mac {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[offset..offset + 6]);
    Mac(mac)
}

fn ip_at(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    )
}

impl ArpPacket {
    /// Parse the ARP body (the bytes following the Ethernet/VLAN header).
    ///
    /// # Errors
    ///
    /// Fails on short input, non Ethernet/IPv4 ARP, or an unknown operation.
    pub fn parse(buf: &[u8]) -> Result<ArpPacket, ArpError> {
        if buf.len() < ARP_LEN {
            return Err(ArpError::Truncated(buf.len()));
        }
        let htype = u16::from_be_bytes([buf[0], buf[1]]);
        let ptype = u16::from_be_bytes([buf[2], buf[3]]);
        if htype != HTYPE_ETHERNET || ptype != EtherType::IPV4.0 || buf[4] != 6 || buf[5] != 4 {
            return Err(ArpError::Unsupported);
        }
        let op = match u16::from_be_bytes([buf[6], buf[7]]) {
            1 => ArpOp::Request,
            2 => ArpOp::Reply,
            other => return Err(ArpError::UnknownOp(other)),
        };
        Ok(ArpPacket {
            op,
            sender_mac: mac_at(buf, 8),
            sender_ip: ip_at(buf, 14),
            target_mac: mac_at(buf, 18),
            target_ip: ip_at(buf, 24),
        })
    }

    /// Serialize the ARP body.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ARP_LEN] {
        let mut out = [0u8; ARP_LEN];
        out[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&EtherType::IPV4.0.to_be_bytes());
        out[4] = 6;
        out[5] = 4;
        out[6..8].copy_from_slice(&self.op.code().to_be_bytes());
        out[8..14].copy_from_slice(&self.sender_mac.0);
        out[14..18].copy_from_slice(&self.sender_ip.octets());
        out[18..24].copy_from_slice(&self.target_mac.0);
        out[24..28].copy_from_slice(&self.target_ip.octets());
        out
    }
}

/// Build a broadcast ARP request frame asking for `target`, tagged with `vlan` if non-zero.
///
/// # Errors
///
/// Fails if `vlan` does not fit in 12 bits.
pub fn request(
    src_mac: Mac,
    src_ip: Ipv4Addr,
    target: Ipv4Addr,
    vlan: u16,
) -> Result<Vec<u8>, ArpError> {
    let body = ArpPacket {
        op: ArpOp::Request,
        sender_mac: src_mac,
        sender_ip: src_ip,
        target_mac: Mac::ZERO,
        target_ip: target,
    };
    let mut frame = Vec::with_capacity(Ethernet2Header::LEN + SingleVlanHeader::LEN + ARP_LEN);
    let mut eth = Ethernet2Header {
        source: src_mac.0,
        destination: Mac::BROADCAST.0,
        ether_type: EtherType::ARP,
    };
    if vlan == 0 {
        frame.extend_from_slice(&eth.to_bytes());
    } else {
        eth.ether_type = EtherType::VLAN_TAGGED_FRAME;
        frame.extend_from_slice(&eth.to_bytes());
        let tag = SingleVlanHeader {
            pcp: VlanPcp::ZERO,
            drop_eligible_indicator: false,
            vlan_id: VlanId::try_new(vlan).map_err(|_| ArpError::InvalidVlan(vlan))?,
            ether_type: EtherType::ARP,
        };
        frame.extend_from_slice(&tag.to_bytes());
    }
    frame.extend_from_slice(&body.to_bytes());
    Ok(frame)
}
