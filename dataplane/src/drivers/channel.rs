// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-process ports backed by channels.

use super::{DriverError, PacketIo};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use nat::DeviceInfo;
use net::Mac;
use std::time::Duration;

/// The gateway's end of a channel port.
pub struct ChannelPort {
    index: u16,
    wire_rx: Receiver<Vec<u8>>,
    wire_tx: Sender<Vec<u8>>,
    kni_rx: Receiver<Vec<u8>>,
    kni_tx: Sender<Vec<u8>>,
}

/// The far end of a channel port: the network on one side, the local stack on the other.
pub struct ChannelPeer {
    pub index: u16,
    /// Frames arriving on the wire.
    pub inject: Sender<Vec<u8>>,
    /// Frames the gateway transmitted.
    pub transmitted: Receiver<Vec<u8>>,
    /// Frames the local stack transmits.
    pub kni_inject: Sender<Vec<u8>>,
    /// Frames delivered to the local stack.
    pub kni_delivered: Receiver<Vec<u8>>,
}

/// A port with room for `capacity` frames in each queue.
#[must_use]
pub fn channel_port(index: u16, capacity: usize) -> (ChannelPort, ChannelPeer) {
    let (inject, wire_rx) = bounded(capacity);
    let (wire_tx, transmitted) = bounded(capacity);
    let (kni_inject, kni_rx) = bounded(capacity);
    let (kni_tx, kni_delivered) = bounded(capacity);
    (
        ChannelPort {
            index,
            wire_rx,
            wire_tx,
            kni_rx,
            kni_tx,
        },
        ChannelPeer {
            index,
            inject,
            transmitted,
            kni_inject,
            kni_delivered,
        },
    )
}

impl PacketIo for ChannelPort {
    fn recv_burst(&self, max: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let first = match self.wire_rx.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return vec![],
        };
        let mut burst = Vec::with_capacity(max);
        burst.push(first);
        burst.extend(self.wire_rx.try_iter().take(max.saturating_sub(1)));
        burst
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), DriverError> {
        push(&self.wire_tx, self.index, frame)
    }

    fn send_kni(&self, frame: Vec<u8>) -> Result<(), DriverError> {
        push(&self.kni_tx, self.index, frame)
    }

    fn recv_kni(&self, max: usize) -> Vec<Vec<u8>> {
        self.kni_rx.try_iter().take(max).collect()
    }
}

fn push(queue: &Sender<Vec<u8>>, index: u16, frame: Vec<u8>) -> Result<(), DriverError> {
    queue.try_send(frame).map_err(|e| match e {
        TrySendError::Full(_) => DriverError::QueueFull(index),
        TrySendError::Disconnected(_) => DriverError::Disconnected(index),
    })
}

/// Channel ports have locally administered addresses derived from their index, and no
/// offload capability.
pub struct ChannelDevices;

impl DeviceInfo for ChannelDevices {
    fn mac_address(&self, index: u16) -> Mac {
        let [hi, lo] = index.to_be_bytes();
        Mac([0x02, 0x4e, 0x41, 0x54, hi, lo])
    }

    fn tx_checksum_offload(&self, _index: u16) -> bool {
        false
    }
}
