// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod args;
mod drivers;
mod workers;

use crate::args::{CmdArgs, Parser};
use crate::drivers::PacketIo;
use crate::drivers::channel::{ChannelDevices, ChannelPeer, channel_port};
use crate::workers::{Ports, WorkerError, Workers};

use config::{ConfigError, NatConfig, load_config};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use mgmt::{MgmtError, start_mgmt};
use nat::{DeviceInfo, Nat, NatOptions};
use net::ChecksumMode;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PORT_QUEUE: usize = 1024;

#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error("Bad configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Control API: {0}")]
    Mgmt(#[from] MgmtError),
    #[error("Packet workers: {0}")]
    Workers(#[from] WorkerError),
    #[error("Metrics exporter: {0}")]
    Metrics(#[from] BuildError),
    #[error("Signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

fn init_logging(directives: Option<&str>) -> Result<(), String> {
    let filter = match directives {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    }
    .map_err(|e| e.to_string())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Offload checksums only when every port can.
fn checksum_mode(args: &CmdArgs, config: &NatConfig, devices: &dyn DeviceInfo) -> ChecksumMode {
    if args.nocsum() {
        return ChecksumMode::None;
    }
    if args.nohwcsum() {
        return ChecksumMode::Software;
    }
    if config
        .interfaces()
        .all(|(_, iface)| devices.tx_checksum_offload(iface.index))
    {
        ChecksumMode::Offload
    } else {
        warn!("hardware offloading not available on all ports, using software checksums");
        ChecksumMode::Software
    }
}

fn start_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Serving metrics on {addr}");
    Ok(())
}

/// In-process ports for every interface, with the far ends kept open.
fn channel_ports(config: &NatConfig) -> (Ports, Vec<ChannelPeer>) {
    let mut ports = Ports::new();
    let mut peers = vec![];
    for (_, iface) in config.interfaces() {
        let (port, peer) = channel_port(iface.index, PORT_QUEUE);
        ports.insert(iface.index, Arc::new(port) as Arc<dyn PacketIo>);
        peers.push(peer);
    }
    (ports, peers)
}

fn run(args: &CmdArgs) -> Result<(), StartError> {
    let config = load_config(args.config())?;
    if config.needs_dhcp() {
        warn!("Interfaces configured for DHCP stay pending until a lease is applied");
    }

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    if let Some(addr) = args.metrics_address() {
        start_metrics(addr)?;
    }

    let devices = ChannelDevices;
    let options = NatOptions {
        checksum: checksum_mode(args, &config, &devices),
        dump_dir: args.dump_dir().to_path_buf(),
        ..NatOptions::default()
    };
    let nat = Arc::new(Nat::new(&config, &devices, options)?);
    let (_mgmt, control) = start_mgmt(args.control_address(), nat.clone())?;
    info!("Control API on {control}");

    info!("Using in-process channel ports");
    let (ports, _peers) = channel_ports(&config);
    let workers = Workers::start(&nat, &ports, args.workers())?;

    let _ = stop_rx.recv();
    info!("Shutting down NAT gateway");
    workers.stop();
    nat.shutdown();
    Ok(())
}

fn main() {
    let args = CmdArgs::parse();
    if let Err(e) = init_logging(args.tracing()) {
        eprintln!("Invalid tracing configuration: {e}");
        std::process::exit(2);
    }
    info!("Starting NAT gateway...");
    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    struct Offloading(bool);

    impl DeviceInfo for Offloading {
        fn mac_address(&self, index: u16) -> net::Mac {
            ChannelDevices.mac_address(index)
        }

        fn tx_checksum_offload(&self, index: u16) -> bool {
            self.0 || index == 0
        }
    }

    fn config() -> NatConfig {
        NatConfig::from_json(
            r#"{"port-pairs": [{
                "private-port": { "index": 0, "subnet": "10.0.0.1/24" },
                "public-port": { "index": 1, "subnet": "198.51.100.5" }
            }]}"#,
        )
        .unwrap()
    }

    #[test]
    #[traced_test]
    fn checksum_selection() {
        let config = config();
        let args = |extra: &[&str]| {
            CmdArgs::try_parse_from(std::iter::once("natgw").chain(extra.iter().copied())).unwrap()
        };
        assert_eq!(checksum_mode(&args(&[]), &config, &Offloading(true)), ChecksumMode::Offload);
        assert_eq!(
            checksum_mode(&args(&["--nohwcsum"]), &config, &Offloading(true)),
            ChecksumMode::Software
        );
        assert_eq!(
            checksum_mode(&args(&["--nocsum"]), &config, &Offloading(true)),
            ChecksumMode::None
        );
        assert_eq!(
            checksum_mode(&args(&[]), &config, &Offloading(false)),
            ChecksumMode::Software
        );
        assert!(logs_contain("hardware offloading not available on all ports"));
    }

    #[test]
    fn ports_for_every_interface() {
        let (ports, peers) = channel_ports(&config());
        assert_eq!(ports.len(), 2);
        assert_eq!(
            peers.iter().map(|peer| peer.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
