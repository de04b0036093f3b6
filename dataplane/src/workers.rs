// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet workers: for every pair and direction, threads moving frames from the ingress port
//! through the translation pipeline to their egress.

use crate::drivers::{DriverError, PacketIo};
use config::Role;
use metrics::counter;
use nat::{DropReason, Egress, InterfacePair, Nat};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace};

const BURST: usize = 32;
const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub(crate) enum WorkerError {
    #[error("no packet I/O for port {0}")]
    MissingPort(u16),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Ports of a gateway, by interface index.
pub(crate) type Ports = HashMap<u16, Arc<dyn PacketIo>>;

pub(crate) struct Workers {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Start `per_direction` workers for each direction of each pair of `nat`.
    pub(crate) fn start(
        nat: &Arc<Nat>,
        ports: &Ports,
        per_direction: usize,
    ) -> Result<Self, WorkerError> {
        let mut workers = Workers {
            stop: Arc::new(AtomicBool::new(false)),
            handles: vec![],
        };
        for pair in nat.pairs() {
            for role in [Role::Private, Role::Public] {
                let port = |role: Role| {
                    let index = pair.side(role).index();
                    ports.get(&index).cloned().ok_or(WorkerError::MissingPort(index))
                };
                let (ingress, egress) = (port(role)?, port(role.opposite())?);
                for n in 0..per_direction {
                    let ctx = Context {
                        nat: nat.clone(),
                        pair: pair.id(),
                        role,
                        ingress: ingress.clone(),
                        egress: egress.clone(),
                    };
                    let stop = workers.stop.clone();
                    let handle = std::thread::Builder::new()
                        .name(format!("worker-{}-{role}-{n}", pair.id()))
                        .spawn(move || ctx.run(&stop))?;
                    workers.handles.push(handle);
                }
            }
        }
        info!("Started {} packet worker(s)", workers.handles.len());
        Ok(workers)
    }

    /// Ask every worker to stop and wait for them.
    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            if handle.join().is_err() {
                error!("A packet worker panicked");
            }
        }
        info!("Packet workers stopped");
    }
}

struct Context {
    nat: Arc<Nat>,
    pair: usize,
    role: Role,
    ingress: Arc<dyn PacketIo>,
    egress: Arc<dyn PacketIo>,
}

impl Context {
    fn run(&self, stop: &AtomicBool) {
        let Some(pair) = self.nat.pair(self.pair) else {
            error!("Worker started for unknown pair {}", self.pair);
            return;
        };
        debug!("Entering worker loop for pair {} ({} ingress)", self.pair, self.role);
        while !stop.load(Ordering::Relaxed) {
            for data in self.ingress.recv_burst(BURST, POLL) {
                self.handle(pair, data);
            }
            // the local stack talks through the physical port, untranslated
            for frame in self.ingress.recv_kni(BURST) {
                transmit(self.ingress.send(frame));
            }
        }
    }

    fn handle(&self, pair: &InterfacePair, data: Vec<u8>) {
        match pair.process(self.role, data) {
            Egress::Forward(frame) => transmit(self.egress.send(frame.into_bytes())),
            Egress::Kni(frame) => transmit(self.ingress.send_kni(frame.into_bytes())),
            Egress::Drop(DropReason::MissL2Resolution { next_hop }) => {
                if let Some(request) = pair.arp_request_for(self.role.opposite(), next_hop) {
                    trace!("Pair {}: resolving {next_hop}", self.pair);
                    transmit(self.egress.send(request));
                }
            }
            Egress::Drop(_) => {}
        }
    }
}

fn transmit(result: Result<(), DriverError>) {
    if let Err(e) = result {
        trace!("Transmit failed: {e}");
        counter!("natgw_tx_errors_total").increment(1);
    }
}
