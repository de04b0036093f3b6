// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One side of an interface pair.

use crate::natip::NatIp;
use crate::portmap::PortMaps;
use crate::table::{TranslationTable, hasher_state};
use ahash::RandomState;
use arc_swap::ArcSwap;
use config::{IfaceConfig, Role, Subnet4, Subnet6};
use dashmap::DashMap;
use net::ip::{link_local_from_mac, solicited_node_multicast};
use net::{IpVersion, Mac};
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;

/// Addresses of an interface, replaced as a whole when a subnet or lease changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub subnet: Subnet4,
    pub subnet6: Subnet6,
    pub gateway: Option<Ipv4Addr>,
    pub gateway6: Option<Ipv6Addr>,
    pub link_local: Ipv6Addr,
    pub ll_multicast: Ipv6Addr,
    /// Solicited-node multicast of the global IPv6 address, once one is known.
    pub multicast: Option<Ipv6Addr>,
}

impl InterfaceAddrs {
    #[must_use]
    pub fn new(mac: Mac, subnet: Subnet4, subnet6: Subnet6) -> Self {
        let link_local = link_local_from_mac(mac);
        Self {
            subnet,
            subnet6,
            gateway: None,
            gateway6: None,
            link_local,
            ll_multicast: solicited_node_multicast(link_local),
            multicast: subnet6
                .is_acquired()
                .then(|| solicited_node_multicast(subnet6.address())),
        }
    }

    /// Same addresses, with a new IPv4 subnet.
    #[must_use]
    pub fn with_subnet(&self, subnet: Subnet4) -> Self {
        Self {
            subnet,
            ..self.clone()
        }
    }

    /// Same addresses, with a new IPv6 subnet and the derived multicast address.
    #[must_use]
    pub fn with_subnet6(&self, subnet6: Subnet6) -> Self {
        Self {
            subnet6,
            multicast: subnet6
                .is_acquired()
                .then(|| solicited_node_multicast(subnet6.address())),
            ..self.clone()
        }
    }

    /// Whether an address of `version` has been configured or leased.
    #[must_use]
    pub fn is_acquired(&self, version: IpVersion) -> bool {
        match version {
            IpVersion::V4 => self.subnet.is_acquired(),
            IpVersion::V6 => self.subnet6.is_acquired(),
        }
    }

    /// The interface's own address of family `I` (unspecified while pending).
    #[must_use]
    pub fn own<I: NatIp>(&self) -> I {
        let addr = match I::VERSION {
            IpVersion::V4 => IpAddr::V4(self.subnet.address()),
            IpVersion::V6 => IpAddr::V6(self.subnet6.address()),
        };
        I::try_from_addr(addr).unwrap_or_else(I::unspecified)
    }

    /// Whether `addr` is on the link, within an acquired subnet.
    #[must_use]
    pub fn on_link(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.subnet.is_acquired() && self.subnet.contains(&a),
            IpAddr::V6(a) => {
                a.is_unicast_link_local()
                    || (self.subnet6.is_acquired() && self.subnet6.contains(&a))
            }
        }
    }

    /// Whether a packet to `addr` is meant for the interface itself.
    #[must_use]
    pub fn is_local(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => {
                a.is_broadcast()
                    || a.is_multicast()
                    || (self.subnet.is_acquired()
                        && (a == self.subnet.address() || a == self.subnet.net().broadcast()))
            }
            IpAddr::V6(a) => {
                a.is_multicast()
                    || a == self.link_local
                    || a == self.ll_multicast
                    || Some(a) == self.multicast
                    || (self.subnet6.is_acquired() && a == self.subnet6.address())
            }
        }
    }

    /// The neighbor a packet to `dst` is handed to.
    #[must_use]
    pub fn next_hop(&self, dst: IpAddr) -> IpAddr {
        if self.on_link(dst) {
            return dst;
        }
        let gateway = match dst {
            IpAddr::V4(_) => self.gateway.map(IpAddr::V4),
            IpAddr::V6(_) => self.gateway6.map(IpAddr::V6),
        };
        gateway.unwrap_or(dst)
    }
}

/// A physical interface and the state the translation engine keeps for it.
#[derive(Debug)]
pub struct Interface {
    role: Role,
    index: u16,
    vlan: u16,
    kni_name: Option<String>,
    mac: Mac,
    addrs: ArcSwap<InterfaceAddrs>,
    table: TranslationTable,
    port_maps: Option<PortMaps>,
    neighbors: DashMap<IpAddr, Mac, RandomState>,
}

impl Interface {
    /// Build the interface playing `role` from its configuration and hardware address.
    #[must_use]
    pub fn new(role: Role, config: &IfaceConfig, mac: Mac) -> Self {
        let addrs = InterfaceAddrs::new(mac, config.subnet, config.subnet6());
        debug!(
            "Interface {} ({role}): link-local {} multicast {}",
            config.index, addrs.link_local, addrs.ll_multicast
        );
        Self {
            role,
            index: config.index,
            vlan: config.vlan_tag,
            kni_name: config.kni().map(str::to_string),
            mac,
            addrs: ArcSwap::from_pointee(addrs),
            table: TranslationTable::new(),
            port_maps: (role == Role::Public).then(PortMaps::new),
            neighbors: DashMap::with_hasher(hasher_state()),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// VLAN id, `0` when untagged.
    #[must_use]
    pub fn vlan(&self) -> u16 {
        self.vlan
    }

    /// Local-stack device name.
    #[must_use]
    pub fn kni(&self) -> Option<&str> {
        self.kni_name.as_deref()
    }

    #[must_use]
    pub fn has_kni(&self) -> bool {
        self.kni_name.is_some()
    }

    #[must_use]
    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Current addresses.
    #[must_use]
    pub fn addrs(&self) -> Arc<InterfaceAddrs> {
        self.addrs.load_full()
    }

    pub(crate) fn store_addrs(&self, addrs: InterfaceAddrs) {
        self.addrs.store(Arc::new(addrs));
    }

    /// Flows keyed by the tuples seen on this interface.
    #[must_use]
    pub fn table(&self) -> &TranslationTable {
        &self.table
    }

    /// Port bookkeeping, present on the public side only.
    #[must_use]
    pub fn port_maps(&self) -> Option<&PortMaps> {
        self.port_maps.as_ref()
    }

    pub fn learn_neighbor(&self, ip: IpAddr, mac: Mac) {
        if ip.is_unspecified() || mac.is_multicast() {
            return;
        }
        if self.neighbors.insert(ip, mac) != Some(mac) {
            debug!("Interface {}: learnt neighbor {ip} at {mac}", self.index);
        }
    }

    #[must_use]
    pub fn neighbor(&self, ip: IpAddr) -> Option<Mac> {
        self.neighbors.get(&ip).map(|entry| *entry.value())
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addrs = self.addrs();
        write!(
            f,
            "{} port {} mac {} subnet {} subnet6 {}",
            self.role, self.index, self.mac, addrs.subnet, addrs.subnet6
        )?;
        if self.vlan != 0 {
            write!(f, " vlan {}", self.vlan)?;
        }
        if let Some(kni) = &self.kni_name {
            write!(f, " kni {kni}")?;
        }
        Ok(())
    }
}
