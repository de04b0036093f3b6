// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Translation tables.
//!
//! Each interface owns one [`TranslationTable`]: for every (IP version, protocol) a concurrent map
//! from a tuple seen on that interface to the tuple on the other side of the pair. Lookups take
//! no pair-level lock and may run from any number of workers. Inserts and removals replace whole
//! entries and are only performed under the pair mutex.

use crate::natip::NatIp;
use crate::tuple::Tuple;
use ahash::RandomState;
use dashmap::DashMap;
use net::IpProto;
use std::net::{Ipv4Addr, Ipv6Addr};

type Map<I> = DashMap<Tuple<I>, Tuple<I>, RandomState>;

pub(crate) fn hasher_state() -> RandomState {
    RandomState::with_seeds(0x6e61_7467, 0x7761_7931, 0x7472_616e, 0x736c_6174)
}

/// The per-protocol maps of one IP version.
#[derive(Debug)]
pub struct FamilyTable<I: NatIp> {
    maps: [Map<I>; IpProto::ALL.len()],
}

impl<I: NatIp> FamilyTable<I> {
    fn new() -> Self {
        Self {
            maps: std::array::from_fn(|_| Map::with_hasher(hasher_state())),
        }
    }

    fn map(&self, proto: IpProto) -> &Map<I> {
        &self.maps[proto.index()]
    }
}

/// Bidirectional flow table of one interface.
#[derive(Debug)]
pub struct TranslationTable {
    pub(crate) v4: FamilyTable<Ipv4Addr>,
    pub(crate) v6: FamilyTable<Ipv6Addr>,
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            v4: FamilyTable::new(),
            v6: FamilyTable::new(),
        }
    }

    /// The tuple `key` translates to, if any.
    #[must_use]
    pub fn lookup<I: NatIp>(&self, proto: IpProto, key: &Tuple<I>) -> Option<Tuple<I>> {
        I::family(self).map(proto).get(key).map(|entry| *entry.value())
    }

    /// Publish `key -> value`, returning the value it replaced.
    ///
    /// Structural mutation: callers hold the pair mutex.
    pub(crate) fn insert<I: NatIp>(
        &self,
        proto: IpProto,
        key: Tuple<I>,
        value: Tuple<I>,
    ) -> Option<Tuple<I>> {
        I::family(self).map(proto).insert(key, value)
    }

    /// Remove `key`, returning the value it translated to.
    ///
    /// Structural mutation: callers hold the pair mutex.
    pub(crate) fn remove<I: NatIp>(&self, proto: IpProto, key: &Tuple<I>) -> Option<Tuple<I>> {
        I::family(self)
            .map(proto)
            .remove(key)
            .map(|(_, value)| value)
    }

    /// Number of entries for `proto` in the `I` family.
    #[must_use]
    pub fn len<I: NatIp>(&self, proto: IpProto) -> usize {
        I::family(self).map(proto).len()
    }

    /// Whether there is no entry at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        IpProto::ALL
            .iter()
            .all(|proto| self.v4.map(*proto).is_empty() && self.v6.map(*proto).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocols_and_families_are_disjoint() {
        let table = TranslationTable::new();
        let key = Tuple::new(Ipv4Addr::new(10, 0, 0, 5), 40000);
        let value = Tuple::new(Ipv4Addr::new(198, 51, 100, 5), 1025);
        assert_eq!(table.insert(IpProto::Tcp, key, value), None);
        assert_eq!(table.lookup(IpProto::Tcp, &key), Some(value));
        assert_eq!(table.lookup(IpProto::Udp, &key), None);
        assert_eq!(table.len::<Ipv6Addr>(IpProto::Tcp), 0);

        let key6 = Tuple::new(Ipv6Addr::LOCALHOST, 40000);
        assert_eq!(table.lookup(IpProto::Tcp, &key6), None);
    }

    #[test]
    fn insert_replaces_and_remove_returns_value() {
        let table = TranslationTable::new();
        let key = Tuple::new(Ipv6Addr::LOCALHOST, 7);
        let first = Tuple::new(Ipv6Addr::UNSPECIFIED, 7);
        let second = Tuple::new("2001:db8::9".parse::<Ipv6Addr>().unwrap(), 80);
        table.insert(IpProto::Udp, key, first);
        assert_eq!(table.insert(IpProto::Udp, key, second), Some(first));
        assert_eq!(table.remove(IpProto::Udp, &key), Some(second));
        assert_eq!(table.remove(IpProto::Udp, &key), None);
        assert!(table.is_empty());
    }
}
