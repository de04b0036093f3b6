// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::errors::MgmtError;
use crate::server::ControlServer;
use nat::Nat;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Start the control server on its own thread, running a single-threaded tokio runtime.
///
/// The listener is bound before the thread starts, so that a bad address fails the caller.
/// Returns the thread handle and the bound address.
///
/// # Errors
///
/// [`MgmtError::Bind`] if `addr` cannot be bound, [`MgmtError::Runtime`] if the thread cannot
/// be spawned.
pub fn start_mgmt(
    addr: SocketAddr,
    nat: Arc<Nat>,
) -> Result<(JoinHandle<()>, SocketAddr), MgmtError> {
    let bind_error = |e: std::io::Error| MgmtError::Bind {
        addr,
        reason: e.to_string(),
    };
    let listener = TcpListener::bind(addr).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;
    debug!("Will serve control requests on {local}");

    let handle = std::thread::Builder::new()
        .name("mgmt".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Tokio runtime creation failed: {e}");
                    return;
                }
            };
            rt.block_on(async move {
                match ControlServer::from_std(listener, nat) {
                    Ok(server) => server.run().await,
                    Err(e) => error!("Failed to start control server: {e}"),
                }
            });
        })
        .map_err(|e| MgmtError::Runtime(e.to_string()))?;
    Ok((handle, local))
}
