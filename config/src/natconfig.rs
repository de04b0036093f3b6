// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The NAT configuration document and its load-time validation.

use crate::errors::{ConfigError, ConfigResult};
use crate::forward::{ForwardedPort, ForwardingContext, Role, check_port_forwarding};
use crate::subnet::{Subnet4, Subnet6};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Largest 802.1Q VLAN id.
pub const MAX_VLAN: u16 = 4095;

/// Configuration of one physical interface.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IfaceConfig {
    pub index: u16,
    pub subnet: Subnet4,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet6: Option<Subnet6>,
    #[serde(default)]
    pub vlan_tag: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kni_name: Option<String>,
    #[serde(default)]
    pub forward_ports: Vec<ForwardedPort>,
}

impl IfaceConfig {
    /// Name of the local-stack device, if one is configured.
    #[must_use]
    pub fn kni(&self) -> Option<&str> {
        self.kni_name.as_deref().filter(|name| !name.is_empty())
    }

    /// The IPv6 subnet, pending when not configured.
    #[must_use]
    pub fn subnet6(&self) -> Subnet6 {
        self.subnet6.unwrap_or_default()
    }

    fn wants_dhcp(&self) -> bool {
        !self.subnet.is_acquired() || self.subnet6.is_some_and(|s| !s.is_acquired())
    }
}

/// A private/public interface pairing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortPairConfig {
    pub private_port: IfaceConfig,
    pub public_port: IfaceConfig,
}

impl PortPairConfig {
    /// The interface playing `role` in this pair.
    #[must_use]
    pub fn side(&self, role: Role) -> &IfaceConfig {
        match role {
            Role::Private => &self.private_port,
            Role::Public => &self.public_port,
        }
    }

    fn check_vlans(&self) -> ConfigResult {
        let (private, public) = (&self.private_port, &self.public_port);
        for iface in [private, public] {
            if iface.vlan_tag > MAX_VLAN {
                return Err(ConfigError::InvalidVlan(iface.index, iface.vlan_tag));
            }
        }
        if (private.vlan_tag == 0) != (public.vlan_tag == 0) {
            return Err(ConfigError::VlanMismatch {
                private: private.index,
                public: public.index,
                private_vlan: private.vlan_tag,
                public_vlan: public.vlan_tag,
            });
        }
        Ok(())
    }

    /// Validate every forwarding rule of the interface playing `role`.
    ///
    /// # Errors
    ///
    /// Returns the first rule rejection, see [`check_port_forwarding`].
    pub fn check_forwarding(&self, role: Role) -> Result<Vec<ForwardedPort>, ConfigError> {
        let iface = self.side(role);
        let opposite = self.side(role.opposite());
        let opposite_subnet6 = opposite.subnet6();
        let ctx = ForwardingContext {
            index: iface.index,
            role,
            kni_name: iface.kni(),
            opposite_subnet: &opposite.subnet,
            opposite_subnet6: &opposite_subnet6,
        };
        iface
            .forward_ports
            .iter()
            .map(|rule| check_port_forwarding(&ctx, rule))
            .collect()
    }
}

/// The whole NAT configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NatConfig {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub port_pairs: Vec<PortPairConfig>,
}

impl NatConfig {
    /// Parse a configuration document. The result is not validated.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON and on malformed addresses, subnets or protocol names.
    pub fn from_json(json: &str) -> Result<NatConfig, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))
    }

    /// Every interface of the configuration, with the role it plays.
    pub fn interfaces(&self) -> impl Iterator<Item = (Role, &IfaceConfig)> {
        self.port_pairs.iter().flat_map(|pair| {
            [
                (Role::Private, &pair.private_port),
                (Role::Public, &pair.public_port),
            ]
        })
    }

    /// Whether any interface acquires its address over DHCP.
    #[must_use]
    pub fn needs_dhcp(&self) -> bool {
        self.interfaces().any(|(_, iface)| iface.wants_dhcp())
    }

    /// Whether any interface has a local-stack device.
    #[must_use]
    pub fn needs_kni(&self) -> bool {
        self.interfaces().any(|(_, iface)| iface.kni().is_some())
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> ConfigResult {
        let mut seen = BTreeSet::new();
        for (_, iface) in self.interfaces() {
            if !seen.insert(iface.index) {
                return Err(ConfigError::DuplicateInterfaceIndex(iface.index));
            }
        }
        for pair in &self.port_pairs {
            pair.check_vlans()?;
            for role in [Role::Private, Role::Public] {
                let iface = pair.side(role);
                if iface.wants_dhcp() && self.host_name.is_empty() {
                    return Err(ConfigError::DhcpWithoutHostName(iface.index));
                }
                pair.check_forwarding(role)?;
            }
            debug!(
                "Validated pair private={} public={}",
                pair.private_port.index, pair.public_port.index
            );
        }
        Ok(())
    }
}

/// Read, parse and validate the configuration file at `path`.
///
/// # Errors
///
/// Any failure is a [`ConfigError`] and must prevent the gateway from starting.
pub fn load_config(path: impl AsRef<Path>) -> Result<NatConfig, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let config = NatConfig::from_json(&json)?;
    config.validate()?;
    info!(
        "Loaded configuration from {} with {} interface pair(s)",
        path.display(),
        config.port_pairs.len()
    );
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::forward::{Destination, ForwardProtocol};
    use net::{IpProto, IpVersion};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const SAMPLE: &str = r#"{
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
                "forward-ports": [
                    { "port": 8080, "destination": "10.0.0.9:80", "protocol": "TCP" },
                    { "port": 5353, "destination": "[fd00::9]:", "protocol": "UDP6" }
                ]
            }
        }]
    }"#;

    #[test]
    #[traced_test]
    fn parse_and_validate_sample() {
        let config = NatConfig::from_json(SAMPLE).unwrap();
        config.validate().unwrap();
        assert!(logs_contain("Validated pair private=0 public=1"));

        let pair = &config.port_pairs[0];
        assert_eq!(pair.private_port.kni(), Some("priv0"));
        assert_eq!(pair.public_port.kni(), None);
        assert_eq!(pair.public_port.vlan_tag, 0);
        assert_eq!(
            pair.public_port.forward_ports[0],
            ForwardedPort {
                port: 8080,
                destination: Destination::new("10.0.0.9".parse().unwrap(), 80),
                protocol: ForwardProtocol {
                    proto: IpProto::Tcp,
                    version: IpVersion::V4
                },
            }
        );
        let installed = pair.check_forwarding(Role::Public).unwrap();
        assert_eq!(installed[1].destination.port, 5353);
        assert!(config.needs_kni());
        assert!(!config.needs_dhcp());
    }

    #[test]
    fn serialization_round_trip() {
        let config = NatConfig::from_json(SAMPLE).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(NatConfig::from_json(&json).unwrap(), config);
    }

    fn pair_json(private: &str, public: &str) -> String {
        format!(r#"{{"host-name": "", "port-pairs": [{{"private-port": {private}, "public-port": {public}}}]}}"#)
    }

    #[test]
    fn vlan_mismatch_rejected() {
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.1/24", "vlan-tag": 10}"#,
            r#"{"index": 1, "subnet": "198.51.100.5"}"#,
        );
        let config = NatConfig::from_json(&json).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::VlanMismatch {
                private: 0,
                public: 1,
                private_vlan: 10,
                public_vlan: 0
            })
        );
    }

    #[test]
    fn dhcp_requires_host_name() {
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.1/24"}"#,
            r#"{"index": 1, "subnet": "dhcp"}"#,
        );
        let config = NatConfig::from_json(&json).unwrap();
        assert!(config.needs_dhcp());
        assert_eq!(config.validate(), Err(ConfigError::DhcpWithoutHostName(1)));
    }

    #[test]
    fn private_side_translating_rule_rejected() {
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.1/24", "forward-ports": [{"port": 80, "destination": "198.51.100.9:80", "protocol": "TCP"}]}"#,
            r#"{"index": 1, "subnet": "198.51.100.5/24"}"#,
        );
        let config = NatConfig::from_json(&json).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::PrivateForwarding(0)));
    }

    #[test]
    fn protocol_version_mismatch_rejected() {
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.1/24"}"#,
            r#"{"index": 1, "subnet": "198.51.100.5", "forward-ports": [{"port": 80, "destination": "10.0.0.9:80", "protocol": "UDP6"}]}"#,
        );
        let config = NatConfig::from_json(&json).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ProtocolVersionMismatch(80)));
    }

    #[test]
    fn duplicate_index_rejected() {
        let json = pair_json(
            r#"{"index": 3, "subnet": "10.0.0.1/24"}"#,
            r#"{"index": 3, "subnet": "198.51.100.5"}"#,
        );
        let config = NatConfig::from_json(&json).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::DuplicateInterfaceIndex(3)));
    }

    #[test]
    fn malformed_documents() {
        assert!(matches!(
            NatConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.300/24"}"#,
            r#"{"index": 1, "subnet": "198.51.100.5"}"#,
        );
        assert!(matches!(NatConfig::from_json(&json), Err(ConfigError::Json(_))));
        let json = pair_json(
            r#"{"index": 0, "subnet": "10.0.0.1/24"}"#,
            r#"{"index": 1, "subnet": "198.51.100.5", "forward-ports": [{"port": 80, "destination": "10.0.0.9:80", "protocol": "SCTP"}]}"#,
        );
        assert!(matches!(NatConfig::from_json(&json), Err(ConfigError::Json(_))));
    }

    #[test]
    fn missing_file() {
        let err = load_config("/nonexistent/natgw.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
