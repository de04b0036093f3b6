// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsed view over a received Ethernet frame.
//!
//! A [`Frame`] owns the raw bytes and a decoded copy of every header the gateway cares about.
//! Rewrites (addresses, ports, MACs, VLAN id) act on the decoded headers; [`Frame::finalize`]
//! refreshes checksums and serializes the headers back in place. Header lengths never change,
//! so the payload is never moved.

use crate::ip::{IpProto, IpVersion};
use crate::mac::Mac;
use etherparse::{
    EtherType, Ethernet2Header, Icmpv4Header, Icmpv4Type, Icmpv6Header, Icmpv6Type, IpNumber,
    Ipv4Header, Ipv6Header, SingleVlanHeader, TcpHeader, UdpHeader, VlanId,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Errors which may occur while parsing or rewriting a [`Frame`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated at {0} header")]
    Truncated(&'static str),
    #[error("malformed {0} header")]
    Malformed(&'static str),
    #[error("ipv4 fragments are not translated")]
    Fragmented,
    #[error("address family does not match the frame")]
    FamilyMismatch,
    #[error("frame carries no rewritable transport header")]
    NotTranslatable,
    #[error("invalid vlan id {0}")]
    InvalidVlan(u16),
    #[error("payload too large for checksum computation")]
    Oversized,
}

/// A frame that failed to parse, handed back together with its bytes.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct InvalidFrame {
    pub error: FrameError,
    pub data: Vec<u8>,
}

/// How checksums are handled when a rewritten frame is finalized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Recompute every checksum in software.
    #[default]
    Software,
    /// Leave TCP/UDP checksums to the NIC and flag the frame accordingly.
    /// The IPv4 header and ICMP checksums are still computed in software.
    Offload,
    /// Leave every checksum untouched.
    None,
}

/// TCP control flags relevant to connection tracking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

#[derive(Debug, Clone)]
enum Transport {
    Tcp(TcpHeader),
    Udp(UdpHeader),
    Icmp4(Icmpv4Header),
    Icmp6(Icmpv6Header),
    Unsupported(u8),
}

#[derive(Debug, Clone)]
enum Ip {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

#[derive(Debug, Clone)]
struct Network {
    ip: Ip,
    transport: Transport,
    /// offset of the transport header
    l4: usize,
    /// end of the IP datagram (ethernet padding excluded)
    end: usize,
}

#[derive(Debug, Clone)]
enum Payload {
    Ip(Network),
    Arp,
    Other,
}

/// A parsed Ethernet frame.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    eth: Ethernet2Header,
    vlan: Option<SingleVlanHeader>,
    l3: usize,
    payload: Payload,
    checksum_offload: bool,
}

fn parse_transport(
    protocol: IpNumber,
    buf: &[u8],
    is_fragment: bool,
) -> Result<Transport, FrameError> {
    if is_fragment {
        return Err(FrameError::Fragmented);
    }
    let transport = match protocol {
        IpNumber::TCP => {
            let (tcp, _) =
                TcpHeader::from_slice(buf).map_err(|_| FrameError::Malformed("tcp"))?;
            Transport::Tcp(tcp)
        }
        IpNumber::UDP => {
            let (udp, _) = UdpHeader::from_slice(buf).map_err(|_| FrameError::Truncated("udp"))?;
            Transport::Udp(udp)
        }
        IpNumber::ICMP => {
            let (icmp, _) =
                Icmpv4Header::from_slice(buf).map_err(|_| FrameError::Truncated("icmp"))?;
            Transport::Icmp4(icmp)
        }
        IpNumber::IPV6_ICMP => {
            let (icmp, _) =
                Icmpv6Header::from_slice(buf).map_err(|_| FrameError::Truncated("icmp6"))?;
            Transport::Icmp6(icmp)
        }
        other => Transport::Unsupported(other.0),
    };
    Ok(transport)
}

fn parse_network(ether_type: EtherType, data: &[u8], l3: usize) -> Result<Payload, FrameError> {
    let buf = &data[l3..];
    match ether_type {
        EtherType::IPV4 => {
            let (ip, _) = Ipv4Header::from_slice(buf).map_err(|_| FrameError::Malformed("ipv4"))?;
            let header_len = ip.header_len();
            let total = usize::from(ip.total_len);
            if total < header_len {
                return Err(FrameError::Malformed("ipv4"));
            }
            if total > buf.len() {
                return Err(FrameError::Truncated("ipv4"));
            }
            let is_fragment = ip.more_fragments || ip.fragment_offset.value() != 0;
            let transport = parse_transport(ip.protocol, &buf[header_len..total], is_fragment)?;
            Ok(Payload::Ip(Network {
                transport,
                l4: l3 + header_len,
                end: l3 + total,
                ip: Ip::V4(ip),
            }))
        }
        EtherType::IPV6 => {
            let (ip, _) = Ipv6Header::from_slice(buf).map_err(|_| FrameError::Truncated("ipv6"))?;
            let header_len = ip.header_len();
            let total = header_len + usize::from(ip.payload_length);
            if total > buf.len() {
                return Err(FrameError::Truncated("ipv6"));
            }
            let transport = parse_transport(ip.next_header, &buf[header_len..total], false)?;
            Ok(Payload::Ip(Network {
                transport,
                l4: l3 + header_len,
                end: l3 + total,
                ip: Ip::V6(ip),
            }))
        }
        EtherType::ARP => Ok(Payload::Arp),
        _ => Ok(Payload::Other),
    }
}

impl Frame {
    /// Parse `data` as an Ethernet II frame with at most one 802.1Q tag.
    ///
    /// # Errors
    ///
    /// Returns the bytes back inside an [`InvalidFrame`] if any header the gateway relies on is
    /// truncated or malformed, or if the frame is an IPv4 fragment.
    pub fn parse(data: Vec<u8>) -> Result<Frame, InvalidFrame> {
        match Self::decode(&data) {
            Ok((eth, vlan, l3, payload)) => Ok(Frame {
                data,
                eth,
                vlan,
                l3,
                payload,
                checksum_offload: false,
            }),
            Err(error) => Err(InvalidFrame { error, data }),
        }
    }

    fn decode(
        data: &[u8],
    ) -> Result<(Ethernet2Header, Option<SingleVlanHeader>, usize, Payload), FrameError> {
        let (eth, rest) =
            Ethernet2Header::from_slice(data).map_err(|_| FrameError::Truncated("ethernet"))?;
        let mut l3 = Ethernet2Header::LEN;
        let mut ether_type = eth.ether_type;
        let vlan = if ether_type == EtherType::VLAN_TAGGED_FRAME {
            let (vlan, _) =
                SingleVlanHeader::from_slice(rest).map_err(|_| FrameError::Truncated("vlan"))?;
            l3 += SingleVlanHeader::LEN;
            ether_type = vlan.ether_type;
            Some(vlan)
        } else {
            None
        };
        let payload = parse_network(ether_type, data, l3)?;
        Ok((eth, vlan, l3, payload))
    }

    /// The frame bytes, reflecting rewrites only after [`Frame::finalize`].
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn src_mac(&self) -> Mac {
        Mac(self.eth.source)
    }

    #[must_use]
    pub fn dst_mac(&self) -> Mac {
        Mac(self.eth.destination)
    }

    pub fn set_macs(&mut self, src: Mac, dst: Mac) {
        self.eth.source = src.0;
        self.eth.destination = dst.0;
    }

    /// VLAN id of the 802.1Q tag, if the frame is tagged.
    #[must_use]
    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan.as_ref().map(|v| v.vlan_id.value())
    }

    /// Rewrite the VLAN id of a tagged frame. Untagged frames are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidVlan`] if `id` does not fit in 12 bits.
    pub fn set_vlan_id(&mut self, id: u16) -> Result<(), FrameError> {
        if let Some(vlan) = self.vlan.as_mut() {
            vlan.vlan_id = VlanId::try_new(id).map_err(|_| FrameError::InvalidVlan(id))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_arp(&self) -> bool {
        matches!(self.payload, Payload::Arp)
    }

    /// Bytes following the Ethernet (and VLAN) header of an ARP frame.
    #[must_use]
    pub fn arp_payload(&self) -> Option<&[u8]> {
        match self.payload {
            Payload::Arp => Some(&self.data[self.l3..]),
            _ => None,
        }
    }

    fn network(&self) -> Option<&Network> {
        match &self.payload {
            Payload::Ip(net) => Some(net),
            _ => None,
        }
    }

    fn network_mut(&mut self) -> Option<&mut Network> {
        match &mut self.payload {
            Payload::Ip(net) => Some(net),
            _ => None,
        }
    }

    #[must_use]
    pub fn ip_version(&self) -> Option<IpVersion> {
        self.network().map(|n| match n.ip {
            Ip::V4(_) => IpVersion::V4,
            Ip::V6(_) => IpVersion::V6,
        })
    }

    #[must_use]
    pub fn src_ip(&self) -> Option<IpAddr> {
        self.network().map(|n| match &n.ip {
            Ip::V4(h) => IpAddr::V4(Ipv4Addr::from(h.source)),
            Ip::V6(h) => IpAddr::V6(Ipv6Addr::from(h.source)),
        })
    }

    #[must_use]
    pub fn dst_ip(&self) -> Option<IpAddr> {
        self.network().map(|n| match &n.ip {
            Ip::V4(h) => IpAddr::V4(Ipv4Addr::from(h.destination)),
            Ip::V6(h) => IpAddr::V6(Ipv6Addr::from(h.destination)),
        })
    }

    /// The protocol under which the frame can be translated.
    ///
    /// ICMP and ICMPv6 only qualify for echo request and echo reply messages.
    #[must_use]
    pub fn protocol(&self) -> Option<IpProto> {
        match &self.network()?.transport {
            Transport::Tcp(_) => Some(IpProto::Tcp),
            Transport::Udp(_) => Some(IpProto::Udp),
            Transport::Icmp4(h) => match h.icmp_type {
                Icmpv4Type::EchoRequest(_) | Icmpv4Type::EchoReply(_) => Some(IpProto::Icmp),
                _ => None,
            },
            Transport::Icmp6(h) => match h.icmp_type {
                Icmpv6Type::EchoRequest(_) | Icmpv6Type::EchoReply(_) => Some(IpProto::Icmp6),
                _ => None,
            },
            Transport::Unsupported(_) => None,
        }
    }

    fn echo_id(&self) -> Option<u16> {
        match &self.network()?.transport {
            Transport::Icmp4(h) => match &h.icmp_type {
                Icmpv4Type::EchoRequest(e) | Icmpv4Type::EchoReply(e) => Some(e.id),
                _ => None,
            },
            Transport::Icmp6(h) => match &h.icmp_type {
                Icmpv6Type::EchoRequest(e) | Icmpv6Type::EchoReply(e) => Some(e.id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Source port, or the echo identifier for ICMP echo messages.
    #[must_use]
    pub fn src_port(&self) -> Option<u16> {
        match &self.network()?.transport {
            Transport::Tcp(h) => Some(h.source_port),
            Transport::Udp(h) => Some(h.source_port),
            _ => self.echo_id(),
        }
    }

    /// Destination port, or the echo identifier for ICMP echo messages.
    #[must_use]
    pub fn dst_port(&self) -> Option<u16> {
        match &self.network()?.transport {
            Transport::Tcp(h) => Some(h.destination_port),
            Transport::Udp(h) => Some(h.destination_port),
            _ => self.echo_id(),
        }
    }

    #[must_use]
    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        match &self.network()?.transport {
            Transport::Tcp(h) => Some(TcpFlags {
                syn: h.syn,
                fin: h.fin,
                rst: h.rst,
            }),
            _ => None,
        }
    }

    /// Whether the frame was flagged for hardware L4 checksum computation.
    #[must_use]
    pub fn checksum_offload(&self) -> bool {
        self.checksum_offload
    }

    /// Rewrite the source address and port (echo identifier for ICMP).
    ///
    /// # Errors
    ///
    /// Fails if the frame is not translatable or `addr` is of the other IP family.
    pub fn set_source(&mut self, addr: IpAddr, port: u16) -> Result<(), FrameError> {
        self.rewrite(addr, port, true)
    }

    /// Rewrite the destination address and port (echo identifier for ICMP).
    ///
    /// # Errors
    ///
    /// Fails if the frame is not translatable or `addr` is of the other IP family.
    pub fn set_destination(&mut self, addr: IpAddr, port: u16) -> Result<(), FrameError> {
        self.rewrite(addr, port, false)
    }

    fn rewrite(&mut self, addr: IpAddr, port: u16, source: bool) -> Result<(), FrameError> {
        if self.protocol().is_none() {
            return Err(FrameError::NotTranslatable);
        }
        let net = self.network_mut().ok_or(FrameError::NotTranslatable)?;
        match (&mut net.ip, addr) {
            (Ip::V4(h), IpAddr::V4(a)) if source => h.source = a.octets(),
            (Ip::V4(h), IpAddr::V4(a)) => h.destination = a.octets(),
            (Ip::V6(h), IpAddr::V6(a)) if source => h.source = a.octets(),
            (Ip::V6(h), IpAddr::V6(a)) => h.destination = a.octets(),
            _ => return Err(FrameError::FamilyMismatch),
        }
        match &mut net.transport {
            Transport::Tcp(h) if source => h.source_port = port,
            Transport::Tcp(h) => h.destination_port = port,
            Transport::Udp(h) if source => h.source_port = port,
            Transport::Udp(h) => h.destination_port = port,
            Transport::Icmp4(h) => {
                if let Icmpv4Type::EchoRequest(e) | Icmpv4Type::EchoReply(e) = &mut h.icmp_type {
                    e.id = port;
                }
            }
            Transport::Icmp6(h) => {
                if let Icmpv6Type::EchoRequest(e) | Icmpv6Type::EchoReply(e) = &mut h.icmp_type {
                    e.id = port;
                }
            }
            Transport::Unsupported(_) => return Err(FrameError::NotTranslatable),
        }
        Ok(())
    }

    /// Refresh checksums according to `mode` and write every decoded header back to the buffer.
    ///
    /// # Errors
    ///
    /// Fails only if a checksum cannot be computed over the payload.
    pub fn finalize(&mut self, mode: ChecksumMode) -> Result<(), FrameError> {
        let eth = self.eth.to_bytes();
        self.data[..eth.len()].copy_from_slice(&eth);
        if let Some(vlan) = &self.vlan {
            let tag = vlan.to_bytes();
            let start = Ethernet2Header::LEN;
            self.data[start..start + tag.len()].copy_from_slice(&tag);
        }
        self.checksum_offload = false;
        let l3 = self.l3;
        let Payload::Ip(net) = &mut self.payload else {
            return Ok(());
        };
        let data = &mut self.data;
        let l4_header_len = match &net.transport {
            Transport::Tcp(h) => h.header_len(),
            Transport::Udp(h) => h.header_len(),
            Transport::Icmp4(h) => h.header_len(),
            Transport::Icmp6(h) => h.header_len(),
            Transport::Unsupported(_) => 0,
        };
        let payload = &data[net.l4 + l4_header_len..net.end];
        let offload_l4 = mode == ChecksumMode::Offload
            && matches!(net.transport, Transport::Tcp(_) | Transport::Udp(_));
        if mode != ChecksumMode::None && !offload_l4 {
            update_transport_checksum(&net.ip, &mut net.transport, payload)?;
        }
        self.checksum_offload = offload_l4;

        let l4_bytes: Option<Vec<u8>> = match &net.transport {
            Transport::Tcp(h) => Some(h.to_bytes().to_vec()),
            Transport::Udp(h) => Some(h.to_bytes().to_vec()),
            Transport::Icmp4(h) => Some(h.to_bytes().to_vec()),
            Transport::Icmp6(h) => Some(h.to_bytes().to_vec()),
            Transport::Unsupported(_) => None,
        };
        if let Some(bytes) = l4_bytes {
            data[net.l4..net.l4 + bytes.len()].copy_from_slice(&bytes);
        }
        match &mut net.ip {
            Ip::V4(h) => {
                if mode != ChecksumMode::None {
                    h.header_checksum = h.calc_header_checksum();
                }
                let bytes = h.to_bytes();
                data[l3..l3 + bytes.len()].copy_from_slice(&bytes);
            }
            Ip::V6(h) => {
                let bytes = h.to_bytes();
                data[l3..l3 + bytes.len()].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

fn update_transport_checksum(
    ip: &Ip,
    transport: &mut Transport,
    payload: &[u8],
) -> Result<(), FrameError> {
    match (ip, transport) {
        (Ip::V4(ip), Transport::Tcp(tcp)) => {
            tcp.checksum = tcp
                .calc_checksum_ipv4(ip, payload)
                .map_err(|_| FrameError::Oversized)?;
        }
        (Ip::V6(ip), Transport::Tcp(tcp)) => {
            tcp.checksum = tcp
                .calc_checksum_ipv6(ip, payload)
                .map_err(|_| FrameError::Oversized)?;
        }
        // a zero UDP/IPv4 checksum means "not computed" and stays that way
        (Ip::V4(_), Transport::Udp(udp)) if udp.checksum == 0 => {}
        (Ip::V4(ip), Transport::Udp(udp)) => {
            udp.checksum = udp
                .calc_checksum_ipv4(ip, payload)
                .map_err(|_| FrameError::Oversized)?;
        }
        (Ip::V6(ip), Transport::Udp(udp)) => {
            udp.checksum = udp
                .calc_checksum_ipv6(ip, payload)
                .map_err(|_| FrameError::Oversized)?;
        }
        (_, Transport::Icmp4(icmp)) => icmp.update_checksum(payload),
        (Ip::V6(ip), Transport::Icmp6(icmp)) => icmp
            .update_checksum(ip.source, ip.destination, payload)
            .map_err(|_| FrameError::Oversized)?,
        _ => {}
    }
    Ok(())
}
