// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface pairs: the NAT domain made of one private and one public interface.
//!
//! The pair owns the only lock of the engine. It serializes the allocation cursor, every
//! structural change of the two translation tables (new dynamic flows, static rules) and address
//! updates. Packet lookups never take it.

use crate::device::LocalStack;
use crate::dumps::TraceDumps;
use crate::errors::{ControlError, NatError};
use crate::interface::{Interface, InterfaceAddrs};
use crate::natip::NatIp;
use crate::portmap::{Clock, PORT_END, PORT_START, Stamp, Timeouts};
use crate::sync::{Mutex, lock};
use crate::tuple::Tuple;
use config::{
    ConfigError, ForwardedPort, ForwardingContext, PortPairConfig, Role, Subnet4, Subnet6,
    check_port_forwarding,
};
use ipnet::{Ipv4Net, Ipv6Net};
use metrics::counter;
use net::{ChecksumMode, IpProto, IpVersion, Mac};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Settings shared by every pair of a gateway.
#[derive(Clone)]
pub struct PairSettings {
    pub checksum: ChecksumMode,
    pub timeouts: Timeouts,
    /// Origin of the entry timestamps.
    pub epoch: Instant,
    pub dumps: Arc<TraceDumps>,
    pub local_stack: Arc<dyn LocalStack>,
}

/// An address lease reported by the address-acquisition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    V4 {
        subnet: Ipv4Net,
        gateway: Option<Ipv4Addr>,
    },
    V6 {
        subnet: Ipv6Net,
        gateway: Option<Ipv6Addr>,
    },
}

const fn side_index(role: Role) -> usize {
    match role {
        Role::Private => 0,
        Role::Public => 1,
    }
}

/// What the pair mutex guards, besides the tables.
#[derive(Debug)]
pub(crate) struct PairState {
    /// Port handed out last.
    cursor: u16,
    /// Installed static rules, per side.
    rules: [Vec<ForwardedPort>; 2],
}

const fn next_port(port: u16) -> u16 {
    if port >= PORT_END - 1 || port < PORT_START {
        PORT_START
    } else {
        port + 1
    }
}

/// A private/public interface pair.
pub struct InterfacePair {
    id: usize,
    pub(crate) private: Interface,
    pub(crate) public: Interface,
    state: Mutex<PairState>,
    pub(crate) clock: Clock,
    pub(crate) timeouts: Timeouts,
    pub(crate) checksum: ChecksumMode,
    pub(crate) dumps: Arc<TraceDumps>,
    local_stack: Arc<dyn LocalStack>,
}

impl InterfacePair {
    /// Build pair `id` and install its static forwarding rules.
    ///
    /// # Errors
    ///
    /// Fails if a forwarding rule does not pass validation.
    pub fn new(
        id: usize,
        config: &PortPairConfig,
        private_mac: Mac,
        public_mac: Mac,
        settings: &PairSettings,
    ) -> Result<Self, ConfigError> {
        let rules = [
            config.check_forwarding(Role::Private)?,
            config.check_forwarding(Role::Public)?,
        ];
        let pair = Self {
            id,
            private: Interface::new(Role::Private, &config.private_port, private_mac),
            public: Interface::new(Role::Public, &config.public_port, public_mac),
            state: Mutex::new(PairState {
                cursor: PORT_START,
                rules: [vec![], vec![]],
            }),
            clock: Clock::new(settings.epoch),
            timeouts: settings.timeouts,
            checksum: settings.checksum,
            dumps: settings.dumps.clone(),
            local_stack: settings.local_stack.clone(),
        };
        {
            let stamp = pair.clock.stamp(Instant::now());
            let mut state = lock(&pair.state);
            for (role, rules) in [Role::Private, Role::Public].into_iter().zip(rules) {
                for rule in rules {
                    pair.install_rule(&mut state, role, &rule, stamp)
                        .map_err(|_| ConfigError::ProtocolVersionMismatch(rule.port))?;
                    state.rules[side_index(role)].push(rule);
                }
            }
        }
        info!("Pair {id}: {} <-> {}", pair.private, pair.public);
        Ok(pair)
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The interface playing `role`.
    #[must_use]
    pub fn side(&self, role: Role) -> &Interface {
        match role {
            Role::Private => &self.private,
            Role::Public => &self.public,
        }
    }

    /// The role of the interface with port index `index`, if it belongs to this pair.
    #[must_use]
    pub fn role_of(&self, index: u16) -> Option<Role> {
        [Role::Private, Role::Public]
            .into_iter()
            .find(|role| self.side(*role).index() == index)
    }

    /// Static rules currently installed on the `role` side.
    #[must_use]
    pub fn forwarding_rules(&self, role: Role) -> Vec<ForwardedPort> {
        lock(&self.state).rules[side_index(role)].clone()
    }

    /// See [`InterfacePair::allocate_port_at`].
    ///
    /// # Errors
    ///
    /// See [`InterfacePair::allocate_port_at`].
    pub fn allocate_port<I: NatIp>(
        &self,
        proto: IpProto,
        private: Tuple<I>,
    ) -> Result<Tuple<I>, NatError> {
        self.allocate_port_at(proto, private, Instant::now())
    }

    /// Map the private endpoint `private` to a public endpoint, allocating a public port.
    ///
    /// If another worker mapped `private` first to a usable public endpoint, its mapping is
    /// returned. Otherwise the ports following the last allocated one are scanned, wrapping
    /// around the ephemeral range once, and the first reclaimable port is taken: the mapping it
    /// carried (if any) is removed from both tables and the new one is installed in both.
    ///
    /// # Errors
    ///
    /// * [`NatError::PortExhausted`] when no port of the range is reclaimable at `now`
    /// * [`NatError::AddressPending`] when the public interface has no address of this family
    /// * [`NatError::UnsupportedProtocol`] for a protocol that is not translated in this family
    pub fn allocate_port_at<I: NatIp>(
        &self,
        proto: IpProto,
        private: Tuple<I>,
        now: Instant,
    ) -> Result<Tuple<I>, NatError> {
        let mut state = lock(&self.state);
        let addrs = self.public.addrs();
        if !addrs.is_acquired(I::VERSION) {
            return Err(NatError::AddressPending);
        }
        // rules installed while the address was pending are keyed on the unspecified address
        match self.private.table().lookup(proto, &private) {
            Some(public) if !public.is_unspecified() => return Ok(public),
            _ => {}
        }
        let entries = self
            .public
            .port_maps()
            .and_then(|maps| maps.entries::<I>(proto))
            .ok_or(NatError::UnsupportedProtocol)?;
        let public_addr = addrs.own::<I>();
        let stamp = self.clock.stamp(now);

        let mut port = state.cursor;
        for _ in PORT_START..PORT_END {
            port = next_port(port);
            let entry = &entries[usize::from(port)];
            if !entry.is_reclaimable(stamp, &self.timeouts) {
                continue;
            }
            let public = Tuple::new(public_addr, port);
            self.release(&mut state, proto, public);
            entry.claim(stamp);
            state.cursor = port;
            self.public.table().insert(proto, public, private);
            self.private.table().insert(proto, private, public);
            counter!("natgw_port_allocations_total", "protocol" => proto.to_string()).increment(1);
            debug!("Pair {}: new {proto} flow {private} -> {public}", self.id);
            return Ok(public);
        }
        counter!("natgw_port_exhaustions_total", "protocol" => proto.to_string()).increment(1);
        warn!(
            "Pair {}: no free {proto} port for {private}, dropping",
            self.id
        );
        Err(NatError::PortExhausted)
    }

    /// Remove the flow currently using `public`, from both tables.
    fn release<I: NatIp>(&self, _state: &mut PairState, proto: IpProto, public: Tuple<I>) {
        let Some(private) = self.public.table().remove(proto, &public) else {
            return;
        };
        if self.private.table().lookup(proto, &private) == Some(public) {
            self.private.table().remove(proto, &private);
        }
        debug!("Pair {}: reclaimed {proto} flow {private} -> {public}", self.id);
    }

    fn install_rule(
        &self,
        state: &mut PairState,
        role: Role,
        rule: &ForwardedPort,
        now: Stamp,
    ) -> Result<(), NatError> {
        match rule.protocol.version {
            IpVersion::V4 => self.install_rule_in::<Ipv4Addr>(state, role, rule, now),
            IpVersion::V6 => self.install_rule_in::<Ipv6Addr>(state, role, rule, now),
        }
    }

    fn remove_rule(&self, state: &mut PairState, role: Role, rule: &ForwardedPort) {
        let (proto, port) = (rule.protocol.proto, rule.port);
        match rule.protocol.version {
            IpVersion::V4 => self.remove_rule_in::<Ipv4Addr>(state, role, proto, port),
            IpVersion::V6 => self.remove_rule_in::<Ipv6Addr>(state, role, proto, port),
        }
    }

    /// Publish a static rule: the rule's side maps its own address and the listening port to
    /// the destination, the other side maps the destination back unless it is the local-stack
    /// sentinel. On the public side the port is pinned so the allocator never takes it.
    fn install_rule_in<I: NatIp>(
        &self,
        state: &mut PairState,
        role: Role,
        rule: &ForwardedPort,
        now: Stamp,
    ) -> Result<(), NatError> {
        let proto = rule.protocol.proto;
        let destination =
            I::try_from_addr(rule.destination.addr).ok_or(NatError::FamilyMismatch)?;
        self.remove_rule_in::<I>(state, role, proto, rule.port);

        let own = self.side(role);
        let key = Tuple::new(own.addrs().own::<I>(), rule.port);
        let value = Tuple::new(destination, rule.destination.port);
        own.table().insert(proto, key, value);
        if !value.is_unspecified() {
            self.side(role.opposite()).table().insert(proto, value, key);
        }
        if let Some(entry) = own.port_maps().and_then(|maps| maps.entry::<I>(proto, rule.port)) {
            entry.pin(now);
        }
        debug!("Pair {}: {role} rule {key} -> {value} ({proto})", self.id);
        Ok(())
    }

    /// Remove whatever the `role` side maps for its own address and `port`, with the reverse
    /// mapping, and free the port.
    fn remove_rule_in<I: NatIp>(
        &self,
        _state: &mut PairState,
        role: Role,
        proto: IpProto,
        port: u16,
    ) {
        let own = self.side(role);
        let key = Tuple::new(own.addrs().own::<I>(), port);
        if let Some(value) = own.table().remove(proto, &key) {
            let opposite = self.side(role.opposite()).table();
            if !value.is_unspecified() && opposite.lookup(proto, &value) == Some(key) {
                opposite.remove(proto, &value);
            }
            debug!("Pair {}: removed {role} mapping {key} -> {value} ({proto})", self.id);
        }
        if let Some(entry) = own.port_maps().and_then(|maps| maps.entry::<I>(proto, port)) {
            entry.reset();
        }
    }

    /// Validate `rule` for the `role` side against the current addresses of the other side.
    ///
    /// # Errors
    ///
    /// See [`config::check_port_forwarding`].
    pub fn check_forwarding_rule(
        &self,
        role: Role,
        rule: &ForwardedPort,
    ) -> Result<ForwardedPort, ConfigError> {
        let own = self.side(role);
        let opposite = self.side(role.opposite()).addrs();
        let ctx = ForwardingContext {
            index: own.index(),
            role,
            kni_name: own.kni(),
            opposite_subnet: &opposite.subnet,
            opposite_subnet6: &opposite.subnet6,
        };
        check_port_forwarding(&ctx, rule)
    }

    /// Remove the forwarding of `rule`'s port and protocol on the `role` side, then install
    /// `rule` if `enable` is set.
    ///
    /// # Errors
    ///
    /// Fails without any change if the rule does not pass validation.
    pub fn change_port_forwarding(
        &self,
        role: Role,
        rule: &ForwardedPort,
        enable: bool,
    ) -> Result<(), ControlError> {
        let checked = self.check_forwarding_rule(role, rule)?;
        let stamp = self.clock.stamp(Instant::now());
        let mut state = lock(&self.state);
        self.remove_rule(&mut state, role, &checked);
        state.rules[side_index(role)]
            .retain(|r| r.protocol != checked.protocol || r.port != checked.port);
        if enable {
            self.install_rule(&mut state, role, &checked, stamp)?;
            state.rules[side_index(role)].push(checked);
        }
        info!(
            "Pair {}: {} forwarding {checked} on {role} port {}",
            self.id,
            if enable { "enabled" } else { "disabled" },
            self.side(role).index()
        );
        Ok(())
    }

    /// Replace the IPv4 subnet of the `role` side.
    pub fn set_subnet4(&self, role: Role, subnet: Subnet4) {
        self.update_addrs(role, |addrs| addrs.with_subnet(subnet));
    }

    /// Replace the IPv6 subnet of the `role` side. Derived multicast addresses follow.
    pub fn set_subnet6(&self, role: Role, subnet: Subnet6) {
        self.update_addrs(role, |addrs| addrs.with_subnet6(subnet));
    }

    /// Apply an address lease to the `role` side, recording its gateway.
    pub fn apply_lease(&self, role: Role, lease: Lease) {
        match lease {
            Lease::V4 { subnet, gateway } => self.update_addrs(role, |addrs| InterfaceAddrs {
                gateway,
                ..addrs.with_subnet(Subnet4::acquired(subnet))
            }),
            Lease::V6 { subnet, gateway } => self.update_addrs(role, |addrs| InterfaceAddrs {
                gateway6: gateway,
                ..addrs.with_subnet6(Subnet6::acquired(subnet))
            }),
        }
    }

    /// Swap the addresses of the `role` side and re-key its static rules on the new address.
    ///
    /// Flows keyed on the previous address are left in place.
    fn update_addrs(&self, role: Role, update: impl FnOnce(&InterfaceAddrs) -> InterfaceAddrs) {
        let iface = self.side(role);
        let addrs = {
            let mut state = lock(&self.state);
            let addrs = update(&iface.addrs());
            iface.store_addrs(addrs.clone());
            let stamp = self.clock.stamp(Instant::now());
            let rules = state.rules[side_index(role)].clone();
            for rule in &rules {
                if let Err(e) = self.install_rule(&mut state, role, rule, stamp) {
                    warn!("Pair {}: could not re-install {rule}: {e}", self.id);
                }
            }
            addrs
        };
        info!(
            "Pair {}: {role} port {} subnet {} subnet6 {}",
            self.id,
            iface.index(),
            addrs.subnet,
            addrs.subnet6
        );
        self.local_stack
            .addresses_changed(iface.index(), iface.kni(), &addrs);
    }

    /// ARP request resolving `next_hop` on the `role` side, if it is an IPv4 address and the
    /// interface has one to send from.
    #[must_use]
    pub fn arp_request_for(&self, role: Role, next_hop: IpAddr) -> Option<Vec<u8>> {
        let IpAddr::V4(target) = next_hop else {
            return None;
        };
        let iface = self.side(role);
        let addrs = iface.addrs();
        if !addrs.subnet.is_acquired() {
            return None;
        }
        net::arp::request(iface.mac(), addrs.subnet.address(), target, iface.vlan()).ok()
    }
}
