// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Remote control of a running NAT gateway.
//!
//! Requests and replies are JSON documents, each preceded by its length as a 4-byte big-endian
//! integer, exchanged over TCP.

mod client;
mod errors;
mod launch;
mod protocol;
mod server;

pub use client::ControlClient;
pub use errors::MgmtError;
pub use launch::start_mgmt;
pub use protocol::{
    LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE, Reply, Request, TraceKind, decode_message,
    encode_message,
};
pub use server::{ControlServer, dispatch};
