// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The gateway: every interface pair built from the configuration, and the control operations
//! applied to them at runtime.

use crate::device::{DeviceInfo, LocalStack, LoggingLocalStack};
use crate::dumps::{TraceDumps, TraceType};
use crate::errors::ControlError;
use crate::pair::{InterfacePair, PairSettings};
use crate::pipeline::Egress;
use crate::portmap::Timeouts;
use config::{ConfigError, ForwardedPort, NatConfig, Role, Subnet4, Subnet6};
use net::ChecksumMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Runtime settings of a [`Nat`], not part of the configuration file.
#[derive(Clone)]
pub struct NatOptions {
    pub checksum: ChecksumMode,
    pub timeouts: Timeouts,
    pub dump_dir: PathBuf,
    pub local_stack: Arc<dyn LocalStack>,
}

impl Default for NatOptions {
    fn default() -> Self {
        Self {
            checksum: ChecksumMode::Software,
            timeouts: Timeouts::default(),
            dump_dir: PathBuf::from("."),
            local_stack: Arc::new(LoggingLocalStack),
        }
    }
}

/// A NAT gateway.
pub struct Nat {
    pairs: Vec<InterfacePair>,
    dumps: Arc<TraceDumps>,
}

impl Nat {
    /// Build every pair of a validated configuration and install its static rules.
    ///
    /// # Errors
    ///
    /// Fails if a forwarding rule does not pass validation.
    pub fn new(
        config: &NatConfig,
        devices: &dyn DeviceInfo,
        options: NatOptions,
    ) -> Result<Self, ConfigError> {
        let dumps = Arc::new(TraceDumps::new(options.dump_dir));
        let settings = PairSettings {
            checksum: options.checksum,
            timeouts: options.timeouts,
            epoch: Instant::now(),
            dumps: dumps.clone(),
            local_stack: options.local_stack,
        };
        let pairs = config
            .port_pairs
            .iter()
            .enumerate()
            .map(|(id, pair)| {
                InterfacePair::new(
                    id,
                    pair,
                    devices.mac_address(pair.private_port.index),
                    devices.mac_address(pair.public_port.index),
                    &settings,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("NAT ready with {} pair(s)", pairs.len());
        Ok(Self { pairs, dumps })
    }

    #[must_use]
    pub fn pairs(&self) -> &[InterfacePair] {
        &self.pairs
    }

    #[must_use]
    pub fn pair(&self, id: usize) -> Option<&InterfacePair> {
        self.pairs.get(id)
    }

    #[must_use]
    pub fn dumps(&self) -> &TraceDumps {
        &self.dumps
    }

    /// Process a frame received on the `ingress` side of pair `pair`.
    ///
    /// Returns `None` for an unknown pair.
    pub fn process(&self, pair: usize, ingress: Role, data: Vec<u8>) -> Option<Egress> {
        Some(self.pairs.get(pair)?.process(ingress, data))
    }

    /// The pair owning port `interface_id`, and the role of that port.
    ///
    /// # Errors
    ///
    /// [`ControlError::UnknownInterface`] if no pair owns the port.
    pub fn find_interface(&self, interface_id: u32) -> Result<(&InterfacePair, Role), ControlError> {
        u16::try_from(interface_id)
            .ok()
            .and_then(|index| {
                self.pairs
                    .iter()
                    .find_map(|pair| pair.role_of(index).map(|role| (pair, role)))
            })
            .ok_or(ControlError::UnknownInterface(interface_id))
    }

    /// Enable or disable dumps of one trace class on every interface.
    #[instrument(level = "info", skip(self))]
    pub fn control_dump(&self, enable: bool, trace: TraceType) -> String {
        self.dumps.enable(trace, enable);
        "Success".to_string()
    }

    /// Set the address of port `interface_id` from a CIDR or a bare address of either family.
    ///
    /// Translations keyed on the previous address are not purged.
    ///
    /// # Errors
    ///
    /// Fails on an unknown port or a subnet that is not a concrete address.
    #[instrument(level = "info", skip(self))]
    pub fn change_interface_address(
        &self,
        interface_id: u32,
        subnet: &str,
    ) -> Result<String, ControlError> {
        let (pair, role) = self.find_interface(interface_id)?;
        let invalid = || ControlError::InvalidSubnet(subnet.to_string());
        let applied = if let Ok(subnet4) = subnet.parse::<Subnet4>() {
            if !subnet4.is_acquired() {
                return Err(invalid());
            }
            pair.set_subnet4(role, subnet4);
            subnet4.to_string()
        } else {
            let subnet6 = subnet.parse::<Subnet6>().map_err(|_| invalid())?;
            if !subnet6.is_acquired() {
                return Err(invalid());
            }
            pair.set_subnet6(role, subnet6);
            subnet6.to_string()
        };
        Ok(format!(
            "Successfully set port {interface_id} subnet to {applied}"
        ))
    }

    /// Replace the forwarding of `rule`'s port and protocol on port `interface_id`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown port or a rule rejected by validation, without any change.
    #[instrument(level = "info", skip(self))]
    pub fn change_port_forwarding(
        &self,
        interface_id: u32,
        rule: &ForwardedPort,
        enable: bool,
    ) -> Result<String, ControlError> {
        let (pair, role) = self.find_interface(interface_id)?;
        pair.change_port_forwarding(role, rule, enable)?;
        Ok("Success".to_string())
    }

    /// Close every trace dump file.
    pub fn shutdown(&self) {
        self.dumps.close_all();
        info!("NAT stopped");
    }
}
