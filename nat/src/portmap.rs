// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Public port bookkeeping and TCP termination tracking.
//!
//! The public interface of a pair owns one [`PortMapEntry`] per port number for every
//! (IP version, protocol) it translates. An entry says whether its port is in use: static
//! entries always are; dynamic entries are until they have been idle longer than their reclaim
//! timeout. Entries are never deleted, the allocator overwrites reclaimable ones.
//!
//! Entry fields are atomics so that workers can refresh them without taking the pair mutex.
//! Racing refreshes are benign: they only shift reclaim time.

use crate::natip::NatIp;
use net::{IpProto, IpVersion};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// First port of the ephemeral range.
pub const PORT_START: u16 = 1024;
/// End (excluded) of the ephemeral range.
pub const PORT_END: u16 = 65500;

const NUM_PORTS: usize = u16::MAX as usize + 1;

/// Idle times after which a dynamic port can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Entries that have not seen a full TCP termination.
    pub connection: Duration,
    /// TCP entries that saw FIN in both directions, or RST.
    pub port_reuse: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(60),
            port_reuse: Duration::from_secs(1),
        }
    }
}

/// A point in time encoded as nanoseconds since a pair's [`Clock`] epoch, plus one.
/// Zero means "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp(u64);

impl Stamp {
    pub const NEVER: Stamp = Stamp(0);
}

/// Converts [`Instant`]s to [`Stamp`]s.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    #[must_use]
    pub fn new(epoch: Instant) -> Self {
        Self { epoch }
    }

    #[must_use]
    pub fn stamp(&self, now: Instant) -> Stamp {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos();
        Stamp(u64::try_from(nanos).unwrap_or(u64::MAX - 1) + 1)
    }
}

/// Direction of a packet across the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    PrivateToPublic,
    PublicToPrivate,
}

impl Direction {
    const fn fin_bits(self) -> u8 {
        match self {
            Direction::PrivateToPublic => 0x0f,
            Direction::PublicToPrivate => 0xf0,
        }
    }
}

const CLOSED: u8 = 0xff;

/// TCP termination state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    New,
    FinOneSide,
    Closed,
}

impl From<u8> for ConnState {
    fn from(bits: u8) -> Self {
        match bits {
            0 => ConnState::New,
            CLOSED => ConnState::Closed,
            _ => ConnState::FinOneSide,
        }
    }
}

/// Soft state of one public port.
pub struct PortMapEntry {
    last_used: AtomicU64,
    termination: AtomicU8,
    is_static: AtomicBool,
}

impl Debug for PortMapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMapEntry")
            .field("last_used", &self.last_used.load(Ordering::Relaxed))
            .field("state", &self.state())
            .field("static", &self.is_static())
            .finish()
    }
}

impl Default for PortMapEntry {
    fn default() -> Self {
        Self {
            last_used: AtomicU64::new(Stamp::NEVER.0),
            termination: AtomicU8::new(0),
            is_static: AtomicBool::new(false),
        }
    }
}

impl PortMapEntry {
    /// Mark the entry as used at `now`.
    pub fn refresh(&self, now: Stamp) {
        self.last_used.store(now.0, Ordering::Relaxed);
    }

    /// Record a FIN seen travelling in `direction`. Repeated FINs are no-ops.
    pub fn observe_fin(&self, direction: Direction) {
        self.termination
            .fetch_or(direction.fin_bits(), Ordering::Relaxed);
    }

    /// Record a RST: the connection is closed whatever its previous state.
    pub fn observe_rst(&self) {
        self.termination.store(CLOSED, Ordering::Relaxed);
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        ConnState::from(self.termination.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_used(&self) -> Stamp {
        Stamp(self.last_used.load(Ordering::Relaxed))
    }

    /// Whether the allocator may hand this port out again at `now`.
    #[must_use]
    pub fn is_reclaimable(&self, now: Stamp, timeouts: &Timeouts) -> bool {
        if self.is_static() {
            return false;
        }
        let last = self.last_used();
        if last == Stamp::NEVER {
            return true;
        }
        let timeout = match self.state() {
            ConnState::Closed => timeouts.port_reuse,
            ConnState::New | ConnState::FinOneSide => timeouts.connection,
        };
        let idle = Duration::from_nanos(now.0.saturating_sub(last.0));
        idle > timeout
    }

    /// Take the entry for a new dynamic flow.
    pub(crate) fn claim(&self, now: Stamp) {
        self.is_static.store(false, Ordering::Relaxed);
        self.termination.store(0, Ordering::Relaxed);
        self.last_used.store(now.0, Ordering::Relaxed);
    }

    /// Pin the entry for a static forwarding rule.
    pub(crate) fn pin(&self, now: Stamp) {
        self.termination.store(0, Ordering::Relaxed);
        self.last_used.store(now.0, Ordering::Relaxed);
        self.is_static.store(true, Ordering::Relaxed);
    }

    /// Return the entry to its never-used state.
    pub(crate) fn reset(&self) {
        self.is_static.store(false, Ordering::Relaxed);
        self.termination.store(0, Ordering::Relaxed);
        self.last_used.store(Stamp::NEVER.0, Ordering::Relaxed);
    }
}

/// Port map arrays of a public interface.
#[derive(Debug)]
pub struct PortMaps {
    v4: [Option<Box<[PortMapEntry]>>; IpProto::ALL.len()],
    v6: [Option<Box<[PortMapEntry]>>; IpProto::ALL.len()],
}

fn entries() -> Box<[PortMapEntry]> {
    (0..NUM_PORTS).map(|_| PortMapEntry::default()).collect()
}

impl Default for PortMaps {
    fn default() -> Self {
        Self::new()
    }
}

impl PortMaps {
    #[must_use]
    pub fn new() -> Self {
        let family = |version| {
            std::array::from_fn(|i| {
                IpProto::ALL
                    .get(i)
                    .filter(|proto| proto.valid_for(version))
                    .map(|_| entries())
            })
        };
        Self {
            v4: family(IpVersion::V4),
            v6: family(IpVersion::V6),
        }
    }

    /// Entries for `proto` in the family of `I`, if that combination is translated.
    #[must_use]
    pub fn entries<I: NatIp>(&self, proto: IpProto) -> Option<&[PortMapEntry]> {
        let family = match I::VERSION {
            IpVersion::V4 => &self.v4,
            IpVersion::V6 => &self.v6,
        };
        family[proto.index()].as_deref()
    }

    /// The entry of `port`.
    #[must_use]
    pub fn entry<I: NatIp>(&self, proto: IpProto, port: u16) -> Option<&PortMapEntry> {
        self.entries::<I>(proto)?.get(usize::from(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn at(clock: &Clock, epoch: Instant, ms: u64) -> Stamp {
        clock.stamp(epoch + Duration::from_millis(ms))
    }

    #[test]
    fn never_used_entry_is_reclaimable() {
        let clock = Clock::new(Instant::now());
        let entry = PortMapEntry::default();
        assert!(entry.is_reclaimable(clock.stamp(Instant::now()), &Timeouts::default()));
    }

    #[test]
    fn fin_both_directions_closes() {
        let entry = PortMapEntry::default();
        assert_eq!(entry.state(), ConnState::New);
        entry.observe_fin(Direction::PrivateToPublic);
        assert_eq!(entry.state(), ConnState::FinOneSide);
        entry.observe_fin(Direction::PrivateToPublic);
        assert_eq!(entry.state(), ConnState::FinOneSide);
        entry.observe_fin(Direction::PublicToPrivate);
        assert_eq!(entry.state(), ConnState::Closed);
    }

    #[test]
    fn rst_closes() {
        let entry = PortMapEntry::default();
        entry.observe_fin(Direction::PublicToPrivate);
        entry.observe_rst();
        assert_eq!(entry.state(), ConnState::Closed);
    }

    #[test]
    fn reclaim_timeouts() {
        let epoch = Instant::now();
        let clock = Clock::new(epoch);
        let timeouts = Timeouts::default();
        let entry = PortMapEntry::default();
        entry.claim(at(&clock, epoch, 0));
        assert!(!entry.is_reclaimable(at(&clock, epoch, 59_999), &timeouts));
        assert!(entry.is_reclaimable(at(&clock, epoch, 60_001), &timeouts));

        entry.claim(at(&clock, epoch, 0));
        entry.observe_fin(Direction::PrivateToPublic);
        entry.observe_fin(Direction::PublicToPrivate);
        assert!(!entry.is_reclaimable(at(&clock, epoch, 999), &timeouts));
        assert!(entry.is_reclaimable(at(&clock, epoch, 1_001), &timeouts));
    }

    #[test]
    fn static_entry_never_reclaimable() {
        let epoch = Instant::now();
        let clock = Clock::new(epoch);
        let entry = PortMapEntry::default();
        entry.pin(at(&clock, epoch, 0));
        assert!(!entry.is_reclaimable(at(&clock, epoch, 3_600_000), &Timeouts::default()));
        entry.reset();
        assert!(entry.is_reclaimable(at(&clock, epoch, 0), &Timeouts::default()));
    }

    #[test]
    fn port_maps_per_family() {
        let maps = PortMaps::new();
        assert!(maps.entries::<Ipv4Addr>(IpProto::Icmp).is_some());
        assert!(maps.entries::<Ipv4Addr>(IpProto::Icmp6).is_none());
        assert!(maps.entries::<Ipv6Addr>(IpProto::Icmp6).is_some());
        assert!(maps.entries::<Ipv6Addr>(IpProto::Icmp).is_none());
        assert!(maps.entry::<Ipv6Addr>(IpProto::Tcp, u16::MAX).is_some());
    }
}
