// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Static port forwarding rules and their validation.

use crate::errors::ConfigError;
use crate::subnet::{Subnet4, Subnet6};
use net::{IpProto, IpVersion};
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

/// Side of an interface pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Private,
    Public,
}

impl Role {
    #[must_use]
    pub const fn opposite(self) -> Role {
        match self {
            Role::Private => Role::Public,
            Role::Public => Role::Private,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Private => write!(f, "private"),
            Role::Public => write!(f, "public"),
        }
    }
}

/// Protocol of a forwarding rule: a transport protocol bound to an IP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForwardProtocol {
    pub proto: IpProto,
    pub version: IpVersion,
}

/// Accepted protocol names.
const PROTOCOLS: [(&str, ForwardProtocol); 4] = [
    (
        "TCP",
        ForwardProtocol {
            proto: IpProto::Tcp,
            version: IpVersion::V4,
        },
    ),
    (
        "UDP",
        ForwardProtocol {
            proto: IpProto::Udp,
            version: IpVersion::V4,
        },
    ),
    (
        "TCP6",
        ForwardProtocol {
            proto: IpProto::Tcp,
            version: IpVersion::V6,
        },
    ),
    (
        "UDP6",
        ForwardProtocol {
            proto: IpProto::Udp,
            version: IpVersion::V6,
        },
    ),
];

impl ForwardProtocol {
    #[must_use]
    pub fn name(&self) -> &'static str {
        PROTOCOLS
            .iter()
            .find(|(_, p)| p == self)
            .map_or("?", |(name, _)| *name)
    }
}

impl FromStr for ForwardProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PROTOCOLS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, proto)| *proto)
            .ok_or_else(|| ConfigError::InvalidProtocol(s.to_string()))
    }
}

impl TryFrom<String> for ForwardProtocol {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForwardProtocol> for String {
    fn from(value: ForwardProtocol) -> Self {
        value.name().to_string()
    }
}

impl Display for ForwardProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A `host:port` endpoint. An empty port parses as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Destination {
    pub addr: IpAddr,
    pub port: u16,
}

impl Destination {
    #[must_use]
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    #[must_use]
    pub fn version(&self) -> IpVersion {
        match self.addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Destinations `0.0.0.0` and `[::]` mean "deliver to the local stack".
    #[must_use]
    pub fn is_kni(&self) -> bool {
        self.addr.is_unspecified()
    }
}

impl FromStr for Destination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |why| ConfigError::InvalidDestination(s.to_string(), why);
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(|| bad("missing port"))?;
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(|| bad("missing port"))?;
            if host.contains(':') {
                return Err(bad("too many colons in address"));
            }
            (host, port)
        };
        let addr = host
            .parse::<IpAddr>()
            .map_err(|_| bad("bad IP address"))?;
        let port = if port.is_empty() {
            0
        } else {
            port.parse::<u16>().map_err(|_| bad("bad port"))?
        };
        Ok(Destination { addr, port })
    }
}

impl TryFrom<String> for Destination {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        value.to_string()
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr {
            IpAddr::V4(a) => write!(f, "{a}:{}", self.port),
            IpAddr::V6(a) => write!(f, "[{a}]:{}", self.port),
        }
    }
}

/// A static forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ForwardedPort {
    pub port: u16,
    pub destination: Destination,
    pub protocol: ForwardProtocol,
}

impl Display for ForwardedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} -> {}", self.protocol, self.port, self.destination)
    }
}

/// What a forwarding rule is checked against: the interface owning it and the current subnets
/// of the interface on the other side of the pair.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingContext<'a> {
    pub index: u16,
    pub role: Role,
    pub kni_name: Option<&'a str>,
    pub opposite_subnet: &'a Subnet4,
    pub opposite_subnet6: &'a Subnet6,
}

/// Validate `rule` for the interface described by `ctx`.
///
/// Returns the rule as it must be installed: a zero destination port on a translating rule is
/// replaced by the listening port.
///
/// # Errors
///
/// * the protocol's IP version differs from the destination's
/// * a KNI rule (unspecified destination) on an interface without `kni-name`, or whose
///   destination port differs from the listening port
/// * a translating rule on the private side
/// * a destination outside the opposite subnet
pub fn check_port_forwarding(
    ctx: &ForwardingContext<'_>,
    rule: &ForwardedPort,
) -> Result<ForwardedPort, ConfigError> {
    if rule.destination.version() != rule.protocol.version {
        return Err(ConfigError::ProtocolVersionMismatch(rule.port));
    }
    let mut checked = *rule;
    if rule.destination.is_kni() {
        if ctx.kni_name.is_none_or(str::is_empty) {
            return Err(ConfigError::KniRequired(ctx.index));
        }
        if rule.destination.port != rule.port {
            return Err(ConfigError::KniPortMismatch {
                port: rule.port,
                destination_port: rule.destination.port,
            });
        }
        return Ok(checked);
    }
    if ctx.role == Role::Private {
        return Err(ConfigError::PrivateForwarding(ctx.index));
    }
    let within = match rule.destination.addr {
        IpAddr::V4(a) => (ctx.opposite_subnet.contains(&a), ctx.opposite_subnet.to_string()),
        IpAddr::V6(a) => (ctx.opposite_subnet6.contains(&a), ctx.opposite_subnet6.to_string()),
    };
    if let (false, subnet) = within {
        return Err(ConfigError::DestinationOutsideSubnet {
            address: rule.destination.addr,
            subnet,
        });
    }
    if checked.destination.port == 0 {
        checked.destination.port = rule.port;
    }
    Ok(checked)
}
