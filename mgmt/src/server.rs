// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control server: accepts connections and applies requests to the gateway.

use crate::errors::MgmtError;
use crate::protocol::{
    LENGTH_PREFIX_SIZE, Reply, Request, decode_message, encode_message, message_len,
};
use nat::Nat;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Apply `request` to `nat`.
pub fn dispatch(nat: &Nat, request: Request) -> Reply {
    let result = match request {
        Request::ControlDump { enable, trace_type } => {
            Ok(nat.control_dump(enable, trace_type.into()))
        }
        Request::ChangeInterfaceAddress {
            interface_id,
            subnet,
        } => nat.change_interface_address(interface_id, &subnet),
        Request::ChangePortForwarding {
            interface_id,
            rule,
            enable,
        } => nat.change_port_forwarding(interface_id, &rule, enable),
    };
    match result {
        Ok(message) => Reply::success(message),
        Err(e) => {
            warn!("Control request failed: {e}");
            Reply::error(e.to_string())
        }
    }
}

/// Listener for control connections.
pub struct ControlServer {
    listener: TcpListener,
    nat: Arc<Nat>,
}

impl ControlServer {
    /// Listen on `addr`.
    ///
    /// # Errors
    ///
    /// [`MgmtError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, nat: Arc<Nat>) -> Result<Self, MgmtError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MgmtError::Bind {
                addr,
                reason: e.to_string(),
            })?;
        Ok(Self { listener, nat })
    }

    /// Wrap a listener bound elsewhere. It must be in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be registered with the runtime.
    pub fn from_std(listener: std::net::TcpListener, nat: Arc<Nat>) -> Result<Self, MgmtError> {
        Ok(Self {
            listener: TcpListener::from_std(listener)?,
            nat,
        })
    }

    /// Address the server listens on.
    ///
    /// # Errors
    ///
    /// Fails if the socket address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr, MgmtError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until the task is dropped. Each connection gets its own task.
    pub async fn run(self) {
        info!(
            "Control server listening on {}",
            self.listener
                .local_addr()
                .map_or_else(|e| e.to_string(), |a| a.to_string())
        );
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let nat = self.nat.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &nat).await {
                            debug!("Control connection from {peer} closed: {e}");
                        }
                    });
                }
                Err(e) => error!("Control accept error: {e}"),
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, nat: &Nat) -> Result<(), MgmtError> {
    loop {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match stream.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // an oversized message cannot be skipped reliably, give up on the connection
        let len = match message_len(prefix) {
            Ok(len) => len,
            Err(e) => {
                send_reply(&mut stream, &Reply::error(e.to_string())).await?;
                return Err(e);
            }
        };
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        let reply = match decode_message::<Request>(&body) {
            Ok(request) => {
                debug!("Control request {}: {request:?}", request.name());
                dispatch(nat, request)
            }
            Err(e) => {
                warn!("Invalid control request: {e}");
                Reply::error(e.to_string())
            }
        };
        send_reply(&mut stream, &reply).await?;
    }
}

async fn send_reply(stream: &mut TcpStream, reply: &Reply) -> Result<(), MgmtError> {
    stream.write_all(&encode_message(reply)?).await?;
    stream.flush().await?;
    Ok(())
}
