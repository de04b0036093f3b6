// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::net::SocketAddr;

/// Failures of the control transport.
#[derive(Debug, thiserror::Error)]
pub enum MgmtError {
    #[error("Failed to listen on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("Could not start the management thread: {0}")]
    Runtime(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Message of {0} bytes exceeds the limit")]
    TooLarge(usize),
}
