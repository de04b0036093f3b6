// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::errors::MgmtError;
use crate::protocol::{
    LENGTH_PREFIX_SIZE, Reply, Request, decode_message, encode_message, message_len,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Blocking client of a control server, for tooling and tests.
pub struct ControlClient {
    stream: TcpStream,
}

impl ControlClient {
    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the control server at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be established.
    pub fn connect(addr: SocketAddr) -> Result<Self, MgmtError> {
        let stream = TcpStream::connect_timeout(&addr, Self::TIMEOUT)?;
        stream.set_read_timeout(Some(Self::TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send `request` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and malformed replies. A request refused by the gateway is a
    /// successful exchange with a [`Reply`] whose `ok` is false.
    pub fn send(&mut self, request: &Request) -> Result<Reply, MgmtError> {
        self.stream.write_all(&encode_message(request)?)?;
        self.stream.flush()?;

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        self.stream.read_exact(&mut prefix)?;
        let mut body = vec![0u8; message_len(prefix)?];
        self.stream.read_exact(&mut body)?;
        decode_message(&body)
    }
}
