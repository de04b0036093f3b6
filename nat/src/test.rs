// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{DeviceInfo, Nat, NatOptions};
use config::NatConfig;
use net::Mac;
use std::path::PathBuf;

struct Devices;

impl DeviceInfo for Devices {
    fn mac_address(&self, index: u16) -> Mac {
        let [hi, lo] = index.to_be_bytes();
        Mac([0x02, 0x00, 0x00, 0x00, hi, lo])
    }

    fn tx_checksum_offload(&self, _index: u16) -> bool {
        false
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("natgw-nat-{name}-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

#[allow(clippy::unwrap_used)]
fn build(json: &str, name: &str) -> Nat {
    let config = NatConfig::from_json(json).unwrap();
    config.validate().unwrap();
    let options = NatOptions {
        dump_dir: scratch_dir(name),
        ..NatOptions::default()
    };
    Nat::new(&config, &Devices, options).unwrap()
}

const GATEWAY: &str = r#"{
    "host-name": "gw",
    "port-pairs": [{
        "private-port": {
            "index": 0,
            "subnet": "10.0.0.1/24",
            "subnet6": "fd00::1/64",
            "kni-name": "priv0",
            "forward-ports": [
                { "port": 22, "destination": "0.0.0.0:22", "protocol": "TCP" }
            ]
        },
        "public-port": {
            "index": 1,
            "subnet": "198.51.100.5",
            "subnet6": "2001:db8::5/64",
            "kni-name": "pub1",
            "forward-ports": [
                { "port": 8080, "destination": "10.0.0.9:80", "protocol": "TCP" },
                { "port": 53, "destination": "0.0.0.0:53", "protocol": "UDP" },
                { "port": 5353, "destination": "[fd00::9]:", "protocol": "UDP6" }
            ]
        }
    }]
}"#;

#[cfg(not(feature = "shuttle"))]
#[allow(clippy::unwrap_used, clippy::panic)] // valid in tests
mod tests {
    use super::*;
    use crate::{
        ConnState, ControlError, DropReason, Egress, Lease, NatError, PORT_END, PORT_START,
        TraceType, Tuple,
    };
    use config::{ConfigError, Role};
    use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
    use net::Frame;
    use net::IpProto;
    use net::test_utils::{TcpKind, echo4, tagged, tcp4, tcp6, udp4, udp6};
    use pretty_assertions::assert_eq;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::time::{Duration, Instant};
    use tracing_test::traced_test;

    const REMOTE_MAC: Mac = Mac([0x02, 0xee, 0x00, 0x00, 0x00, 0x01]);

    const NO_KNI: &str = r#"{
        "host-name": "gw",
        "port-pairs": [{
            "private-port": { "index": 2, "subnet": "10.0.0.1/24" },
            "public-port": {
                "index": 3,
                "subnet": "dhcp",
                "forward-ports": [
                    { "port": 8080, "destination": "10.0.0.9:80", "protocol": "TCP" }
                ]
            }
        }]
    }"#;

    const PUBLIC: [u8; 4] = [198, 51, 100, 5];
    const REMOTE: [u8; 4] = [93, 184, 216, 34];
    const HOST: [u8; 4] = [10, 0, 0, 5];

    fn forwarded(egress: Egress) -> Frame {
        match egress {
            Egress::Forward(frame) => frame,
            other => panic!("expected a forwarded frame, got {other:?}"),
        }
    }

    fn dropped(egress: Egress) -> DropReason {
        match egress {
            Egress::Drop(reason) => reason,
            other => panic!("expected a drop, got {other:?}"),
        }
    }

    fn ip(addr: [u8; 4]) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(addr))
    }

    fn assert_valid_checksums(frame: &Frame) {
        let headers = PacketHeaders::from_ethernet_slice(frame.as_bytes()).unwrap();
        let payload = headers.payload.slice();
        match (headers.net.unwrap(), headers.transport.unwrap()) {
            (NetHeaders::Ipv4(ip, _), TransportHeader::Tcp(tcp)) => {
                assert_eq!(ip.header_checksum, ip.calc_header_checksum());
                assert_eq!(tcp.checksum, tcp.calc_checksum_ipv4(&ip, payload).unwrap());
            }
            (NetHeaders::Ipv4(ip, _), TransportHeader::Udp(udp)) => {
                assert_eq!(ip.header_checksum, ip.calc_header_checksum());
                assert_eq!(udp.checksum, udp.calc_checksum_ipv4(&ip, payload).unwrap());
            }
            (NetHeaders::Ipv6(ip, _), TransportHeader::Tcp(tcp)) => {
                assert_eq!(tcp.checksum, tcp.calc_checksum_ipv6(&ip, payload).unwrap());
            }
            (NetHeaders::Ipv6(ip, _), TransportHeader::Udp(udp)) => {
                assert_eq!(udp.checksum, udp.calc_checksum_ipv6(&ip, payload).unwrap());
            }
            _ => {}
        }
    }

    #[test]
    fn outbound_flow_and_reply() {
        let nat = build(GATEWAY, "outbound");
        let pair = nat.pair(0).unwrap();
        pair.side(Role::Public).learn_neighbor(ip(REMOTE), REMOTE_MAC);
        let t0 = Instant::now();

        let syn = tcp4(HOST, 40000, REMOTE, 443, TcpKind::Syn);
        let out = forwarded(pair.process_at(Role::Private, syn, t0));
        let port = out.src_port().unwrap();
        assert_eq!(port, PORT_START + 1);
        assert_eq!(out.src_ip(), Some(ip(PUBLIC)));
        assert_eq!(out.dst_ip(), Some(ip(REMOTE)));
        assert_eq!(out.dst_port(), Some(443));
        assert_eq!(out.src_mac(), pair.side(Role::Public).mac());
        assert_eq!(out.dst_mac(), REMOTE_MAC);
        assert_valid_checksums(&out);

        let private = Tuple::new(Ipv4Addr::from(HOST), 40000);
        let public = Tuple::new(Ipv4Addr::from(PUBLIC), port);
        assert_eq!(
            pair.side(Role::Private).table().lookup(IpProto::Tcp, &private),
            Some(public)
        );
        assert_eq!(
            pair.side(Role::Public).table().lookup(IpProto::Tcp, &public),
            Some(private)
        );

        // the private host was learnt from the outbound frame
        let reply = tcp4(REMOTE, 443, PUBLIC, port, TcpKind::Ack);
        let back = forwarded(pair.process_at(Role::Public, reply, t0));
        assert_eq!(back.dst_ip(), Some(ip(HOST)));
        assert_eq!(back.dst_port(), Some(40000));
        assert_eq!(back.src_ip(), Some(ip(REMOTE)));
        assert_eq!(back.dst_mac(), net::test_utils::SRC_MAC);
        assert_valid_checksums(&back);

        // same flow, same port
        let again = tcp4(HOST, 40000, REMOTE, 443, TcpKind::Ack);
        let out = forwarded(pair.process_at(Role::Private, again, t0));
        assert_eq!(out.src_port(), Some(port));
    }

    #[test]
    fn static_rule_forwards_without_allocation() {
        let nat = build(GATEWAY, "static");
        let pair = nat.pair(0).unwrap();
        let public = pair.side(Role::Public);
        let key = Tuple::new(Ipv4Addr::from(PUBLIC), 8080);
        let target = Tuple::new(Ipv4Addr::new(10, 0, 0, 9), 80);
        assert_eq!(public.table().lookup(IpProto::Tcp, &key), Some(target));
        let entry = public
            .port_maps()
            .unwrap()
            .entry::<Ipv4Addr>(IpProto::Tcp, 8080)
            .unwrap();
        assert!(entry.is_static());

        pair.side(Role::Private)
            .learn_neighbor(ip([10, 0, 0, 9]), REMOTE_MAC);
        let syn = tcp4([203, 0, 113, 7], 5555, PUBLIC, 8080, TcpKind::Syn);
        let inside = forwarded(pair.process(Role::Public, syn));
        assert_eq!(inside.dst_ip(), Some(ip([10, 0, 0, 9])));
        assert_eq!(inside.dst_port(), Some(80));
        assert_valid_checksums(&inside);

        let flows = public.table().len::<Ipv4Addr>(IpProto::Tcp);
        let answer = tcp4([10, 0, 0, 9], 80, [203, 0, 113, 7], 5555, TcpKind::Ack);
        let outside = forwarded(pair.process(Role::Private, answer));
        assert_eq!(outside.src_ip(), Some(ip(PUBLIC)));
        assert_eq!(outside.src_port(), Some(8080));
        assert_eq!(public.table().len::<Ipv4Addr>(IpProto::Tcp), flows);
    }

    #[test]
    fn kni_rule_delivers_locally() {
        let nat = build(GATEWAY, "kni");
        let pair = nat.pair(0).unwrap();
        let query = udp4([203, 0, 113, 7], 3333, PUBLIC, 53);
        let Egress::Kni(frame) = pair.process(Role::Public, query.clone()) else {
            panic!("expected local delivery");
        };
        assert_eq!(frame.as_bytes(), query.as_slice());
        assert_eq!(
            pair.side(Role::Private)
                .table()
                .lookup(IpProto::Udp, &Tuple::new(Ipv4Addr::UNSPECIFIED, 53)),
            None
        );

        // private side rule and plain traffic to the gateway
        let ssh = tcp4(HOST, 50000, [10, 0, 0, 1], 22, TcpKind::Syn);
        assert!(matches!(pair.process(Role::Private, ssh), Egress::Kni(_)));
        let other = tcp4(HOST, 50000, [10, 0, 0, 1], 23, TcpKind::Syn);
        assert!(matches!(pair.process(Role::Private, other), Egress::Kni(_)));
    }

    #[test]
    fn fin_from_both_sides_shortens_reuse() {
        let nat = build(GATEWAY, "fin");
        let pair = nat.pair(0).unwrap();
        pair.side(Role::Public).learn_neighbor(ip(REMOTE), REMOTE_MAC);
        let t0 = Instant::now();
        let stamp = |ms| pair.clock.stamp(t0 + Duration::from_millis(ms));
        let maps = pair.side(Role::Public).port_maps().unwrap();

        let out = forwarded(pair.process_at(
            Role::Private,
            tcp4(HOST, 40000, REMOTE, 443, TcpKind::Syn),
            t0,
        ));
        let closed = out.src_port().unwrap();
        pair.process_at(Role::Private, tcp4(HOST, 40000, REMOTE, 443, TcpKind::Fin), t0);
        let entry = maps.entry::<Ipv4Addr>(IpProto::Tcp, closed).unwrap();
        assert_eq!(entry.state(), ConnState::FinOneSide);
        pair.process_at(Role::Private, tcp4(HOST, 40000, REMOTE, 443, TcpKind::Fin), t0);
        assert_eq!(entry.state(), ConnState::FinOneSide);
        pair.process_at(Role::Public, tcp4(REMOTE, 443, PUBLIC, closed, TcpKind::Fin), t0);
        assert_eq!(entry.state(), ConnState::Closed);
        assert!(!entry.is_reclaimable(stamp(999), &pair.timeouts));
        assert!(entry.is_reclaimable(stamp(1_001), &pair.timeouts));

        let out = forwarded(pair.process_at(
            Role::Private,
            tcp4(HOST, 40001, REMOTE, 443, TcpKind::Syn),
            t0,
        ));
        let half = out.src_port().unwrap();
        pair.process_at(Role::Public, tcp4(REMOTE, 443, PUBLIC, half, TcpKind::Fin), t0);
        let entry = maps.entry::<Ipv4Addr>(IpProto::Tcp, half).unwrap();
        assert_eq!(entry.state(), ConnState::FinOneSide);
        assert!(!entry.is_reclaimable(stamp(59_000), &pair.timeouts));
        assert!(entry.is_reclaimable(stamp(60_001), &pair.timeouts));

        // with every other port busy, only the closed one comes back, after the reuse delay
        let host = |i: u32| Tuple::new(Ipv4Addr::from(0x0a01_0000 + i), 1000);
        let mut i = 0;
        while pair.allocate_port_at(IpProto::Tcp, host(i), t0).is_ok() {
            i += 1;
        }
        let at = |ms| t0 + Duration::from_millis(ms);
        assert_eq!(
            pair.allocate_port_at(IpProto::Tcp, host(i), at(999)),
            Err(NatError::PortExhausted)
        );
        let reused = pair.allocate_port_at(IpProto::Tcp, host(i), at(1_001)).unwrap();
        assert_eq!(reused.port, closed);
        let private = pair.side(Role::Private).table();
        let first = Tuple::new(Ipv4Addr::from(HOST), 40000);
        assert_eq!(private.lookup(IpProto::Tcp, &first), None);
        assert_eq!(private.lookup(IpProto::Tcp, &host(i)), Some(reused));
    }

    #[test]
    fn rst_closes_flow() {
        let nat = build(GATEWAY, "rst");
        let pair = nat.pair(0).unwrap();
        pair.side(Role::Public).learn_neighbor(ip(REMOTE), REMOTE_MAC);
        let out = forwarded(pair.process(Role::Private, tcp4(HOST, 40000, REMOTE, 443, TcpKind::Syn)));
        let port = out.src_port().unwrap();
        pair.process(Role::Public, tcp4(REMOTE, 443, PUBLIC, port, TcpKind::Rst));
        let entry = pair
            .side(Role::Public)
            .port_maps()
            .unwrap()
            .entry::<Ipv4Addr>(IpProto::Tcp, port)
            .unwrap();
        assert_eq!(entry.state(), ConnState::Closed);
    }

    #[test]
    fn allocator_exhaustion_and_reclaim() {
        let nat = build(GATEWAY, "exhaustion");
        let pair = nat.pair(0).unwrap();
        let t0 = Instant::now();
        let host = |i: u32| Tuple::new(Ipv4Addr::from(0x0a01_0000 + i), 1000);

        let mut allocated = 0;
        let mut i = 0;
        loop {
            match pair.allocate_port_at(IpProto::Tcp, host(i), t0) {
                Ok(public) => {
                    assert_ne!(public.port, 8080);
                    assert!((PORT_START..PORT_END).contains(&public.port));
                    allocated += 1;
                }
                Err(e) => {
                    assert_eq!(e, NatError::PortExhausted);
                    break;
                }
            }
            i += 1;
        }
        // the static rule on 8080 holds one port of the range
        assert_eq!(allocated, usize::from(PORT_END - PORT_START) - 1);
        assert_eq!(
            pair.allocate_port_at(IpProto::Tcp, host(i), t0 + Duration::from_secs(59)),
            Err(NatError::PortExhausted)
        );

        // UDP has its own ports
        assert!(pair.allocate_port_at(IpProto::Udp, host(0), t0).is_ok());

        let later = t0 + Duration::from_secs(61);
        let public = pair.allocate_port_at(IpProto::Tcp, host(i), later).unwrap();
        assert_eq!(public.port, PORT_START + 1);
        let private = pair.side(Role::Private).table();
        assert_eq!(private.lookup(IpProto::Tcp, &host(0)), None);
        assert_eq!(private.lookup(IpProto::Tcp, &host(i)), Some(public));
        assert_eq!(
            pair.side(Role::Public).table().lookup(IpProto::Tcp, &public),
            Some(host(i))
        );
    }

    #[test]
    fn echo_identifier_is_translated() {
        let nat = build(GATEWAY, "echo");
        let pair = nat.pair(0).unwrap();
        pair.side(Role::Public).learn_neighbor(ip(REMOTE), REMOTE_MAC);
        let out = forwarded(pair.process(Role::Private, echo4(HOST, REMOTE, 77)));
        assert_eq!(out.protocol(), Some(IpProto::Icmp));
        assert_eq!(out.src_ip(), Some(ip(PUBLIC)));
        let id = out.src_port().unwrap();
        let back = forwarded(pair.process(Role::Public, echo4(REMOTE, PUBLIC, id)));
        assert_eq!(back.dst_ip(), Some(ip(HOST)));
        assert_eq!(back.dst_port(), Some(77));
    }

    #[test]
    fn ipv6_flows() {
        let nat = build(GATEWAY, "ipv6");
        let pair = nat.pair(0).unwrap();
        let host: Ipv6Addr = "fd00::5".parse().unwrap();
        let remote: Ipv6Addr = "2001:db8:ffff::1".parse().unwrap();
        let own: Ipv6Addr = "2001:db8::5".parse().unwrap();
        pair.side(Role::Public)
            .learn_neighbor(IpAddr::V6(remote), REMOTE_MAC);

        let out = forwarded(pair.process(Role::Private, tcp6(host, 40000, remote, 443, TcpKind::Syn)));
        assert_eq!(out.src_ip(), Some(IpAddr::V6(own)));
        assert_valid_checksums(&out);
        let port = out.src_port().unwrap();
        let back = forwarded(pair.process(Role::Public, tcp6(remote, 443, own, port, TcpKind::Ack)));
        assert_eq!(back.dst_ip(), Some(IpAddr::V6(host)));
        assert_eq!(back.dst_port(), Some(40000));

        // static UDP6 rule with the listening port as destination port
        let target: Ipv6Addr = "fd00::9".parse().unwrap();
        pair.side(Role::Private)
            .learn_neighbor(IpAddr::V6(target), REMOTE_MAC);
        let peer: Ipv6Addr = "2001:db8::77".parse().unwrap();
        let inside = forwarded(pair.process(Role::Public, udp6(peer, 1234, own, 5353)));
        assert_eq!(inside.dst_ip(), Some(IpAddr::V6(target)));
        assert_eq!(inside.dst_port(), Some(5353));
        assert_valid_checksums(&inside);
        assert_eq!(
            pair.side(Role::Public).neighbor(IpAddr::V6(peer)),
            Some(net::test_utils::SRC_MAC)
        );
    }

    #[test]
    fn drops() {
        let nat = build(GATEWAY, "drops");
        let pair = nat.pair(0).unwrap();
        assert_eq!(
            dropped(pair.process(Role::Public, tcp4(REMOTE, 443, [198, 51, 100, 77], 1025, TcpKind::Ack))),
            DropReason::NotForUs
        );
        let tagged_frame = tagged(tcp4(REMOTE, 443, PUBLIC, 1025, TcpKind::Ack), 7);
        assert_eq!(
            dropped(pair.process(Role::Public, tagged_frame)),
            DropReason::VlanMismatch
        );
        assert!(matches!(
            dropped(pair.process(Role::Private, vec![0u8; 10])),
            DropReason::Malformed(_)
        ));
        assert_eq!(
            dropped(pair.process(Role::Private, tcp4(HOST, 40000, REMOTE, 443, TcpKind::Syn))),
            DropReason::MissL2Resolution {
                next_hop: ip(REMOTE)
            }
        );
        let arp = pair.arp_request_for(Role::Public, ip(REMOTE)).unwrap();
        assert_eq!(arp.len(), 42);
        assert!(nat.process(5, Role::Public, vec![]).is_none());
    }

    #[test]
    fn unmatched_inbound_without_kni_is_dropped() {
        let nat = build(NO_KNI, "nokni");
        let pair = nat.pair(0).unwrap();
        pair.apply_lease(
            Role::Public,
            Lease::V4 {
                subnet: "198.51.100.5/24".parse().unwrap(),
                gateway: Some(Ipv4Addr::new(198, 51, 100, 1)),
            },
        );
        assert_eq!(
            dropped(pair.process(Role::Public, udp4(REMOTE, 53, PUBLIC, 40000))),
            DropReason::NoMapping
        );
        assert_eq!(
            dropped(pair.process(Role::Private, tcp4(HOST, 4000, [10, 0, 0, 1], 22, TcpKind::Syn))),
            DropReason::NoMapping
        );
    }

    #[test]
    fn lease_enables_translation() {
        let nat = build(NO_KNI, "lease");
        let pair = nat.pair(0).unwrap();
        let syn = || tcp4(HOST, 40000, REMOTE, 443, TcpKind::Syn);
        assert_eq!(
            dropped(pair.process(Role::Private, syn())),
            DropReason::Nat(NatError::AddressPending)
        );
        assert_eq!(
            dropped(pair.process(Role::Public, tcp4(REMOTE, 443, PUBLIC, 8080, TcpKind::Syn))),
            DropReason::Nat(NatError::AddressPending)
        );

        let gateway = Ipv4Addr::new(198, 51, 100, 1);
        pair.apply_lease(
            Role::Public,
            Lease::V4 {
                subnet: "198.51.100.5/24".parse().unwrap(),
                gateway: Some(gateway),
            },
        );
        pair.side(Role::Public)
            .learn_neighbor(IpAddr::V4(gateway), REMOTE_MAC);
        let out = forwarded(pair.process(Role::Private, syn()));
        assert_eq!(out.src_ip(), Some(ip(PUBLIC)));
        assert_eq!(out.dst_mac(), REMOTE_MAC);

        // the static rule follows the leased address
        let rule = pair
            .side(Role::Public)
            .table()
            .lookup(IpProto::Tcp, &Tuple::new(Ipv4Addr::from(PUBLIC), 8080));
        assert_eq!(rule, Some(Tuple::new(Ipv4Addr::new(10, 0, 0, 9), 80)));
    }

    #[test]
    fn static_rule_reply_waits_for_address() {
        let nat = build(NO_KNI, "pending-rule");
        let pair = nat.pair(0).unwrap();
        pair.side(Role::Public).learn_neighbor(ip(REMOTE), REMOTE_MAC);
        let server = Tuple::new(Ipv4Addr::new(10, 0, 0, 9), 80);
        let reply = || tcp4([10, 0, 0, 9], 80, REMOTE, 5555, TcpKind::Ack);

        assert_eq!(
            dropped(pair.process(Role::Private, reply())),
            DropReason::Nat(NatError::AddressPending)
        );
        assert_eq!(
            pair.allocate_port(IpProto::Tcp, server),
            Err(NatError::AddressPending)
        );

        let gateway = Ipv4Addr::new(198, 51, 100, 1);
        pair.apply_lease(
            Role::Public,
            Lease::V4 {
                subnet: "198.51.100.5/24".parse().unwrap(),
                gateway: Some(gateway),
            },
        );
        pair.side(Role::Public)
            .learn_neighbor(IpAddr::V4(gateway), REMOTE_MAC);
        let out = forwarded(pair.process(Role::Private, reply()));
        assert_eq!(out.src_ip(), Some(ip(PUBLIC)));
        assert_eq!(out.src_port(), Some(8080));
    }

    #[test]
    #[traced_test]
    fn control_port_forwarding() {
        let nat = build(GATEWAY, "forwarding");
        let pair = nat.pair(0).unwrap();
        let rule: config::ForwardedPort = serde_json_rule(9090, "10.0.0.10:90", "TCP");
        assert_eq!(nat.change_port_forwarding(1, &rule, true).unwrap(), "Success");
        assert!(logs_contain("enabled forwarding TCP:9090 -> 10.0.0.10:90 on public port 1"));

        let key = Tuple::new(Ipv4Addr::from(PUBLIC), 9090);
        let target = Tuple::new(Ipv4Addr::new(10, 0, 0, 10), 90);
        let public = pair.side(Role::Public);
        assert_eq!(public.table().lookup(IpProto::Tcp, &key), Some(target));
        assert_eq!(
            pair.side(Role::Private).table().lookup(IpProto::Tcp, &target),
            Some(key)
        );
        let entry = public
            .port_maps()
            .unwrap()
            .entry::<Ipv4Addr>(IpProto::Tcp, 9090)
            .unwrap();
        assert!(entry.is_static());
        assert!(pair.forwarding_rules(Role::Public).contains(&rule));

        nat.change_port_forwarding(1, &rule, false).unwrap();
        assert_eq!(public.table().lookup(IpProto::Tcp, &key), None);
        assert_eq!(pair.side(Role::Private).table().lookup(IpProto::Tcp, &target), None);
        assert!(!entry.is_static());
        assert!(!pair.forwarding_rules(Role::Public).contains(&rule));

        let outside = serde_json_rule(9090, "10.0.1.10:90", "TCP");
        assert!(matches!(
            nat.change_port_forwarding(1, &outside, true),
            Err(ControlError::Rule(ConfigError::DestinationOutsideSubnet { .. }))
        ));
        assert_eq!(public.table().lookup(IpProto::Tcp, &key), None);
        assert_eq!(
            nat.change_port_forwarding(0, &rule, true),
            Err(ControlError::Rule(ConfigError::PrivateForwarding(0)))
        );
        assert_eq!(
            nat.change_port_forwarding(9, &rule, true),
            Err(ControlError::UnknownInterface(9))
        );
    }

    #[test]
    fn control_replaces_dynamic_flow() {
        let nat = build(GATEWAY, "replace");
        let pair = nat.pair(0).unwrap();
        let private = Tuple::new(Ipv4Addr::from(HOST), 40000);
        let public = pair.allocate_port(IpProto::Udp, private).unwrap();
        let rule = serde_json_rule(public.port, "10.0.0.10:", "UDP");
        nat.change_port_forwarding(1, &rule, true).unwrap();
        assert_eq!(pair.side(Role::Private).table().lookup(IpProto::Udp, &private), None);
        assert_eq!(
            pair.side(Role::Public).table().lookup(IpProto::Udp, &public),
            Some(Tuple::new(Ipv4Addr::new(10, 0, 0, 10), public.port))
        );
    }

    fn serde_json_rule(port: u16, destination: &str, protocol: &str) -> config::ForwardedPort {
        config::ForwardedPort {
            port,
            destination: destination.parse().unwrap(),
            protocol: protocol.parse().unwrap(),
        }
    }

    #[test]
    fn control_interface_address() {
        let nat = build(GATEWAY, "address");
        let pair = nat.pair(0).unwrap();
        assert_eq!(
            nat.change_interface_address(1, "203.0.113.9/24").unwrap(),
            "Successfully set port 1 subnet to 203.0.113.9/24"
        );
        let public = pair.side(Role::Public);
        assert_eq!(public.addrs().subnet.address(), Ipv4Addr::new(203, 0, 113, 9));
        let target = Some(Tuple::new(Ipv4Addr::new(10, 0, 0, 9), 80));
        let rekeyed = Tuple::new(Ipv4Addr::new(203, 0, 113, 9), 8080);
        assert_eq!(public.table().lookup(IpProto::Tcp, &rekeyed), target);
        // flows keyed on the previous address stay
        let stale = Tuple::new(Ipv4Addr::from(PUBLIC), 8080);
        assert_eq!(public.table().lookup(IpProto::Tcp, &stale), target);

        let reply = nat.change_interface_address(1, "2001:db8:1::5/64").unwrap();
        assert_eq!(reply, "Successfully set port 1 subnet to 2001:db8:1::5/64");
        assert_eq!(
            public.addrs().multicast,
            Some("ff02::1:ff00:5".parse().unwrap())
        );

        assert_eq!(
            nat.change_interface_address(1, "dhcp"),
            Err(ControlError::InvalidSubnet("dhcp".to_string()))
        );
        assert_eq!(
            nat.change_interface_address(1, "not-a-subnet"),
            Err(ControlError::InvalidSubnet("not-a-subnet".to_string()))
        );
        assert_eq!(
            nat.change_interface_address(42, "10.0.0.1/24"),
            Err(ControlError::UnknownInterface(42))
        );
    }

    #[test]
    fn dumps_follow_control() {
        let nat = build(GATEWAY, "dumps");
        let pair = nat.pair(0).unwrap();
        assert_eq!(nat.control_dump(true, TraceType::Drop), "Success");
        pair.process(Role::Public, tcp4(REMOTE, 443, [198, 51, 100, 77], 1025, TcpKind::Ack));
        pair.process(Role::Public, udp4(REMOTE, 3333, PUBLIC, 53));
        nat.shutdown();

        let drops = std::fs::read(nat.dumps().path(TraceType::Drop, 1)).unwrap();
        assert!(drops.len() > 24 + 16);
        assert!(!nat.dumps().path(TraceType::Kni, 1).exists());
        nat.control_dump(false, TraceType::Drop);
    }
}

#[cfg(feature = "shuttle")]
#[allow(clippy::unwrap_used)] // valid in tests
mod shuttle_tests {
    use super::*;
    use crate::Tuple;
    use net::IpProto;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    #[test]
    fn concurrent_allocation_of_one_flow() {
        shuttle::check_random(
            || {
                let nat = Arc::new(build(GATEWAY, "shuttle-same"));
                let private = Tuple::new(Ipv4Addr::new(10, 0, 0, 5), 40000);
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let nat = nat.clone();
                        shuttle::thread::spawn(move || {
                            nat.pair(0)
                                .unwrap()
                                .allocate_port(IpProto::Udp, private)
                                .unwrap()
                        })
                    })
                    .collect();
                let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
                assert_eq!(results[0], results[1]);
            },
            100,
        );
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        shuttle::check_random(
            || {
                let nat = Arc::new(build(GATEWAY, "shuttle-distinct"));
                let handles: Vec<_> = (0..3u16)
                    .map(|i| {
                        let nat = nat.clone();
                        shuttle::thread::spawn(move || {
                            let private = Tuple::new(Ipv4Addr::new(10, 0, 0, 5), 40000 + i);
                            let pair = nat.pair(0).unwrap();
                            let public = pair.allocate_port(IpProto::Tcp, private).unwrap();
                            let table = pair.side(config::Role::Public).table();
                            assert_eq!(table.lookup(IpProto::Tcp, &public), Some(private));
                            public.port
                        })
                    })
                    .collect();
                let mut ports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
                ports.sort_unstable();
                ports.dedup();
                assert_eq!(ports.len(), 3);
            },
            100,
        );
    }
}
