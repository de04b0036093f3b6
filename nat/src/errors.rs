// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Error types for the translation engine and its control plane.

use config::ConfigError;

/// Reasons why a flow cannot be set up on the packet path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    #[error("no free port in the ephemeral range")]
    PortExhausted,
    #[error("public address not acquired yet")]
    AddressPending,
    #[error("protocol is not translated for this address family")]
    UnsupportedProtocol,
    #[error("address family mismatch")]
    FamilyMismatch,
}

/// Errors returned to control-plane callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown interface {0}")]
    UnknownInterface(u32),
    #[error("invalid subnet {0}")]
    InvalidSubnet(String),
    #[error("invalid forwarding rule: {0}")]
    Rule(#[from] ConfigError),
    #[error(transparent)]
    Nat(#[from] NatError),
}
