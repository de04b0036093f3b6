// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type for configuration / validation failures.
//! Any result returned by the parsing or validation functions of this crate is a `ConfigError`.

use std::net::IpAddr;
use thiserror::Error;

/// The reasons why we may reject a configuration
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Malformed config document: {0}")]
    Json(String),

    // Parsers
    #[error("Failed to parse subnet '{0}'")]
    InvalidSubnet(String),
    #[error("Failed to parse destination '{0}': {1}")]
    InvalidDestination(String, &'static str),
    #[error("Bad protocol name: {0}")]
    InvalidProtocol(String),

    // Interface pairs
    #[error(
        "Private port with index {private} has vlan tag {private_vlan} while public port with index \
         {public} has vlan tag {public_vlan}. Transition between VLAN-enabled and VLAN-disabled \
         networks is not supported"
    )]
    VlanMismatch {
        private: u16,
        public: u16,
        private_vlan: u16,
        public_vlan: u16,
    },
    #[error("Port with index {0} has an out of range vlan tag {1}")]
    InvalidVlan(u16, u16),
    #[error("Interface index {0} is used more than once")]
    DuplicateInterfaceIndex(u16),
    #[error("DHCP option for port {0} requires that you set host-name configuration option")]
    DhcpWithoutHostName(u16),

    // Forwarding rules
    #[error(
        "Port forwarding protocol should be TCP or UDP for IPv4 addresses and TCP6 or UDP6 for \
         IPv6 addresses (rule for port {0})"
    )]
    ProtocolVersionMismatch(u16),
    #[error(
        "Port with index {0} should have \"kni-name\" setting to forward packets to KNI address \
         0.0.0.0 or [::]"
    )]
    KniRequired(u16),
    #[error(
        "Forwarding to KNI requires the destination port to equal the forwarded port: {port} and \
         {destination_port}"
    )]
    KniPortMismatch { port: u16, destination_port: u16 },
    #[error(
        "Only KNI port forwarding is allowed on private port {0}: translated connections from \
         private to public network need no forwarding rules"
    )]
    PrivateForwarding(u16),
    #[error("Destination address {address} should be within subnet {subnet}")]
    DestinationOutsideSubnet { address: IpAddr, subnet: String },
}

/// Result-like type for configurations
pub type ConfigResult = Result<(), ConfigError>;
