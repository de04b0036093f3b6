// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration model for the NAT gateway: the JSON document listing interface pairs, their
//! subnets and static forwarding rules, plus the checks a configuration must pass before the
//! gateway starts. The forwarding-rule check is also used at runtime when rules change.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

pub mod errors;
pub mod forward;
pub mod natconfig;
pub mod subnet;

pub use errors::{ConfigError, ConfigResult}; // re-export
pub use forward::{
    Destination, ForwardProtocol, ForwardedPort, ForwardingContext, Role, check_port_forwarding,
}; // re-export
pub use natconfig::{IfaceConfig, NatConfig, PortPairConfig, load_config}; // re-export
pub use subnet::{Network, Subnet, Subnet4, Subnet6}; // re-export
