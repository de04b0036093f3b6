// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet translation: classify, look up or allocate, rewrite, and pick an egress.

use crate::dumps::TraceType;
use crate::errors::NatError;
use crate::interface::Interface;
use crate::natip::NatIp;
use crate::pair::InterfacePair;
use crate::portmap::Direction;
use crate::tuple::Tuple;
use config::Role;
use metrics::counter;
use net::arp::ArpPacket;
use net::{Frame, FrameError, IpProto, TcpFlags};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;
use tracing::trace;

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("malformed frame: {0}")]
    Malformed(FrameError),
    #[error("vlan tag does not match the interface")]
    VlanMismatch,
    #[error("not addressed to this interface")]
    NotForUs,
    #[error("traffic is neither translated nor delivered locally")]
    Unsupported,
    #[error("no translation for this flow")]
    NoMapping,
    #[error(transparent)]
    Nat(NatError),
    #[error("no link-layer address for next hop {next_hop}")]
    MissL2Resolution { next_hop: IpAddr },
    #[error("rewrite failed: {0}")]
    Rewrite(FrameError),
}

impl DropReason {
    /// Metric label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DropReason::Malformed(_) => "malformed",
            DropReason::VlanMismatch => "vlan_mismatch",
            DropReason::NotForUs => "not_for_us",
            DropReason::Unsupported => "unsupported",
            DropReason::NoMapping => "no_mapping",
            DropReason::Nat(NatError::PortExhausted) => "port_exhausted",
            DropReason::Nat(NatError::AddressPending) => "address_pending",
            DropReason::Nat(_) => "untranslatable",
            DropReason::MissL2Resolution { .. } => "miss_l2_resolution",
            DropReason::Rewrite(_) => "rewrite",
        }
    }
}

/// Where a processed frame goes.
#[derive(Debug)]
pub enum Egress {
    /// Out of the other interface of the pair, translated.
    Forward(Frame),
    /// To the local stack device of the interface it arrived on.
    Kni(Frame),
    Drop(DropReason),
}

impl Egress {
    /// Metric label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Egress::Forward(_) => "forward",
            Egress::Kni(_) => "kni",
            Egress::Drop(_) => "drop",
        }
    }
}

enum Verdict {
    Forward(Frame),
    Kni(Frame),
    Drop(Frame, DropReason),
}

/// Local-stack delivery when the interface has a device for it.
fn to_local(iface: &Interface, frame: Frame, otherwise: DropReason) -> Verdict {
    if iface.has_kni() {
        Verdict::Kni(frame)
    } else {
        Verdict::Drop(frame, otherwise)
    }
}

impl InterfacePair {
    /// See [`InterfacePair::process_at`].
    pub fn process(&self, ingress: Role, data: Vec<u8>) -> Egress {
        self.process_at(ingress, data, Instant::now())
    }

    /// Process a frame received on the `ingress` side of the pair at `now`.
    ///
    /// Frames leave through exactly one egress. Enabled trace dumps record dropped frames as
    /// received, forwarded frames after translation and local-stack frames as delivered.
    pub fn process_at(&self, ingress: Role, data: Vec<u8>, now: Instant) -> Egress {
        let port = self.side(ingress).index();
        let egress = match Frame::parse(data) {
            Err(invalid) => {
                self.dumps.dump(TraceType::Drop, port, &invalid.data);
                Egress::Drop(DropReason::Malformed(invalid.error))
            }
            Ok(frame) => match self.handle(ingress, frame, now) {
                Verdict::Forward(frame) => {
                    let out = self.side(ingress.opposite()).index();
                    self.dumps.dump(TraceType::Translate, out, frame.as_bytes());
                    Egress::Forward(frame)
                }
                Verdict::Kni(frame) => {
                    self.dumps.dump(TraceType::Kni, port, frame.as_bytes());
                    Egress::Kni(frame)
                }
                Verdict::Drop(frame, reason) => {
                    self.dumps.dump(TraceType::Drop, port, frame.as_bytes());
                    Egress::Drop(reason)
                }
            },
        };
        counter!("natgw_packets_total", "egress" => egress.name()).increment(1);
        if let Egress::Drop(reason) = &egress {
            trace!("Pair {}: dropped frame from port {port}: {reason}", self.id());
            counter!("natgw_drops_total", "reason" => reason.name()).increment(1);
        }
        egress
    }

    fn handle(&self, ingress: Role, frame: Frame, now: Instant) -> Verdict {
        let iface = self.side(ingress);
        if frame.vlan_id().unwrap_or(0) != iface.vlan() {
            return Verdict::Drop(frame, DropReason::VlanMismatch);
        }
        if frame.is_arp() {
            if let Some(arp) = frame.arp_payload().and_then(|p| ArpPacket::parse(p).ok()) {
                iface.learn_neighbor(IpAddr::V4(arp.sender_ip), arp.sender_mac);
            }
            return to_local(iface, frame, DropReason::Unsupported);
        }
        let (Some(src), Some(dst)) = (frame.src_ip(), frame.dst_ip()) else {
            return to_local(iface, frame, DropReason::Unsupported);
        };

        let addrs = iface.addrs();
        let has_gateway = match src {
            IpAddr::V4(_) => addrs.gateway.is_some(),
            IpAddr::V6(_) => addrs.gateway6.is_some(),
        };
        if addrs.on_link(src) || !has_gateway {
            iface.learn_neighbor(src, frame.src_mac());
        }

        let Some(proto) = frame.protocol() else {
            return if addrs.is_local(dst) {
                to_local(iface, frame, DropReason::Unsupported)
            } else {
                Verdict::Drop(frame, DropReason::Unsupported)
            };
        };
        match (src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                self.translate::<Ipv4Addr>(ingress, frame, proto, src, dst, now)
            }
            (IpAddr::V6(src), IpAddr::V6(dst)) => {
                self.translate::<Ipv6Addr>(ingress, frame, proto, src, dst, now)
            }
            _ => Verdict::Drop(frame, DropReason::Malformed(FrameError::FamilyMismatch)),
        }
    }

    fn translate<I: NatIp>(
        &self,
        ingress: Role,
        frame: Frame,
        proto: IpProto,
        src: I,
        dst: I,
        now: Instant,
    ) -> Verdict {
        let (Some(sport), Some(dport)) = (frame.src_port(), frame.dst_port()) else {
            return Verdict::Drop(frame, DropReason::Malformed(FrameError::NotTranslatable));
        };
        let (src, dst) = (Tuple::new(src, sport), Tuple::new(dst, dport));
        match ingress {
            Role::Private => self.outbound(frame, proto, src, dst, now),
            Role::Public => self.inbound(frame, proto, dst, now),
        }
    }

    /// Private to public: the private table is keyed by the private source.
    fn outbound<I: NatIp>(
        &self,
        frame: Frame,
        proto: IpProto,
        src: Tuple<I>,
        dst: Tuple<I>,
        now: Instant,
    ) -> Verdict {
        let private = &self.private;
        if private.addrs().is_local(dst.addr.to_ip_addr()) {
            return match private.table().lookup(proto, &dst) {
                Some(rule) if rule.is_unspecified() => Verdict::Kni(frame),
                _ => to_local(private, frame, DropReason::NoMapping),
            };
        }
        let public = match private.table().lookup(proto, &src) {
            Some(public) if !public.is_unspecified() => public,
            _ => match self.allocate_port_at(proto, src, now) {
                Ok(public) => public,
                Err(e) => return Verdict::Drop(frame, DropReason::Nat(e)),
            },
        };
        let dst = dst.addr.to_ip_addr();
        self.forward(frame, Direction::PrivateToPublic, proto, public.port, public, dst, now)
    }

    /// Public to private: the public table is keyed by the public destination.
    fn inbound<I: NatIp>(&self, frame: Frame, proto: IpProto, dst: Tuple<I>, now: Instant) -> Verdict {
        let public = &self.public;
        let addrs = public.addrs();
        if !addrs.is_acquired(I::VERSION) {
            return to_local(public, frame, DropReason::Nat(NatError::AddressPending));
        }
        if dst.addr != addrs.own::<I>() {
            return if addrs.is_local(dst.addr.to_ip_addr()) {
                to_local(public, frame, DropReason::NoMapping)
            } else {
                Verdict::Drop(frame, DropReason::NotForUs)
            };
        }
        match public.table().lookup(proto, &dst) {
            Some(private) if private.is_unspecified() => Verdict::Kni(frame),
            Some(private) => {
                let to = private.addr.to_ip_addr();
                self.forward(frame, Direction::PublicToPrivate, proto, dst.port, private, to, now)
            }
            None => to_local(public, frame, DropReason::NoMapping),
        }
    }

    /// Rewrite a frame of a known flow and send it out of the other interface.
    ///
    /// `public_port` selects the port map entry of the flow, `rewrite` is the tuple replacing the
    /// source (outbound) or the destination (inbound), `dst` the final destination address.
    #[allow(clippy::too_many_arguments)]
    fn forward<I: NatIp>(
        &self,
        mut frame: Frame,
        direction: Direction,
        proto: IpProto,
        public_port: u16,
        rewrite: Tuple<I>,
        dst: IpAddr,
        now: Instant,
    ) -> Verdict {
        let egress = match direction {
            Direction::PrivateToPublic => &self.public,
            Direction::PublicToPrivate => &self.private,
        };
        let next_hop = egress.addrs().next_hop(dst);
        let Some(dst_mac) = egress.neighbor(next_hop) else {
            return Verdict::Drop(frame, DropReason::MissL2Resolution { next_hop });
        };
        let rewritten = match direction {
            Direction::PrivateToPublic => frame.set_source(rewrite.addr.to_ip_addr(), rewrite.port),
            Direction::PublicToPrivate => {
                frame.set_destination(rewrite.addr.to_ip_addr(), rewrite.port)
            }
        };
        frame.set_macs(egress.mac(), dst_mac);
        let finalized = rewritten
            .and_then(|()| frame.set_vlan_id(egress.vlan()))
            .and_then(|()| frame.finalize(self.checksum));
        if let Err(e) = finalized {
            return Verdict::Drop(frame, DropReason::Rewrite(e));
        }
        self.track::<I>(proto, public_port, direction, frame.tcp_flags(), now);
        trace!("Pair {}: {direction:?} {proto} via {rewrite}", self.id());
        Verdict::Forward(frame)
    }

    /// Refresh the port map entry of a forwarded frame and follow TCP termination.
    fn track<I: NatIp>(
        &self,
        proto: IpProto,
        public_port: u16,
        direction: Direction,
        flags: Option<TcpFlags>,
        now: Instant,
    ) {
        let Some(entry) = self
            .public
            .port_maps()
            .and_then(|maps| maps.entry::<I>(proto, public_port))
        else {
            return;
        };
        entry.refresh(self.clock.stamp(now));
        match flags {
            Some(TcpFlags { rst: true, .. }) => entry.observe_rst(),
            Some(TcpFlags { fin: true, .. }) => entry.observe_fin(direction),
            _ => {}
        }
    }
}
