// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Collaborators the engine consumes: hardware facts about the ports, and the local protocol
//! stack behind the KNI devices.

use crate::interface::InterfaceAddrs;
use net::Mac;
use tracing::info;

/// Facts about the physical ports.
pub trait DeviceInfo: Send + Sync {
    /// Hardware address of port `index`.
    fn mac_address(&self, index: u16) -> Mac;

    /// Whether port `index` can compute TCP/UDP checksums on transmit.
    fn tx_checksum_offload(&self, index: u16) -> bool;
}

/// The host protocol stack reached through KNI devices.
pub trait LocalStack: Send + Sync {
    /// Addresses of interface `index` changed (control-plane update or lease).
    fn addresses_changed(&self, index: u16, kni_name: Option<&str>, addrs: &InterfaceAddrs);
}

/// A [`LocalStack`] that only reports changes in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLocalStack;

impl LocalStack for LoggingLocalStack {
    fn addresses_changed(&self, index: u16, kni_name: Option<&str>, addrs: &InterfaceAddrs) {
        info!(
            "Port {index} (kni {}) now has subnet {} and subnet6 {}",
            kni_name.unwrap_or("none"),
            addrs.subnet,
            addrs.subnet6
        );
    }
}
