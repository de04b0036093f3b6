// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet I/O towards physical interfaces and their local-stack devices.

pub mod channel;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("port {0} is disconnected")]
    Disconnected(u16),
    #[error("transmit queue of port {0} is full")]
    QueueFull(u16),
}

/// Frame I/O of one physical interface and the local-stack device bound to it.
pub trait PacketIo: Send + Sync {
    /// Up to `max` frames received on the wire, waiting at most `timeout` for the first one.
    fn recv_burst(&self, max: usize, timeout: Duration) -> Vec<Vec<u8>>;

    /// Transmit a frame on the wire.
    ///
    /// # Errors
    ///
    /// Fails if the port is gone or its transmit queue is full.
    fn send(&self, frame: Vec<u8>) -> Result<(), DriverError>;

    /// Hand a frame to the local-stack device.
    ///
    /// # Errors
    ///
    /// Fails if the device is gone or its queue is full.
    fn send_kni(&self, frame: Vec<u8>) -> Result<(), DriverError>;

    /// Up to `max` frames the local stack wants to transmit, without waiting.
    fn recv_kni(&self, max: usize) -> Vec<Vec<u8>>;
}
