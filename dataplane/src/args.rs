// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub(crate) use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "natgw")]
#[command(version)]
#[command(about = "Stateful NAT gateway between private and public networks", long_about = None)]
pub(crate) struct CmdArgs {
    /// Configuration file
    #[arg(long, value_name = "path", default_value = "config.json")]
    config: PathBuf,
    /// Do not recalculate checksums after translation
    #[arg(long, default_value_t = false)]
    nocsum: bool,
    /// Compute checksums in software even if the ports can offload them
    #[arg(long, default_value_t = false)]
    nohwcsum: bool,
    /// Listen address of the control API
    #[arg(long, value_name = "addr", default_value = "0.0.0.0:60602")]
    control_address: SocketAddr,
    /// Directory receiving trace dump files
    #[arg(long, value_name = "dir", default_value = ".")]
    dump_dir: PathBuf,
    /// Worker threads per interface and direction
    #[arg(long, value_name = "n", default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    workers: u16,
    /// Listen address of the Prometheus exporter, disabled if unset
    #[arg(long, value_name = "addr")]
    metrics_address: Option<SocketAddr>,
    /// Log filter directives, overriding RUST_LOG
    #[arg(long, value_name = "directives")]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn config(&self) -> &Path {
        &self.config
    }

    pub fn nocsum(&self) -> bool {
        self.nocsum
    }

    pub fn nohwcsum(&self) -> bool {
        self.nohwcsum
    }

    pub fn control_address(&self) -> SocketAddr {
        self.control_address
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn workers(&self) -> usize {
        usize::from(self.workers)
    }

    pub fn metrics_address(&self) -> Option<SocketAddr> {
        self.metrics_address
    }

    pub fn tracing(&self) -> Option<&str> {
        self.tracing.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let args = CmdArgs::try_parse_from(["natgw"]).unwrap();
        assert_eq!(args.config(), Path::new("config.json"));
        assert_eq!(args.control_address(), "0.0.0.0:60602".parse().unwrap());
        assert_eq!(args.workers(), 1);
        assert!(!args.nocsum() && !args.nohwcsum());
        assert!(args.metrics_address().is_none());
        assert!(args.tracing().is_none());
    }

    #[test]
    fn overrides() {
        let args = CmdArgs::try_parse_from([
            "natgw",
            "--config",
            "/etc/natgw.json",
            "--nohwcsum",
            "--workers",
            "4",
            "--metrics-address",
            "127.0.0.1:9100",
            "--tracing",
            "nat=debug",
        ])
        .unwrap();
        assert_eq!(args.config(), Path::new("/etc/natgw.json"));
        assert!(args.nohwcsum());
        assert_eq!(args.workers(), 4);
        assert_eq!(args.metrics_address(), Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(args.tracing(), Some("nat=debug"));
        assert_eq!(args.dump_dir(), Path::new("."));
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(CmdArgs::try_parse_from(["natgw", "--workers", "0"]).is_err());
        assert!(CmdArgs::try_parse_from(["natgw", "--control-address", "nowhere"]).is_err());
    }
}
