// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet trace dumps.
//!
//! Each trace class can be enabled at runtime. Frames of an enabled class are appended to a
//! classic pcap file `<class>-<port index>.pcap` in the dump directory. Files are created on the
//! first frame dumped after enabling and stay open until [`TraceDumps::close_all`].

use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

const SNAPLEN: u32 = 65535;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Trace classes, one per egress decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceType {
    Drop,
    Translate,
    Kni,
}

impl TraceType {
    pub const ALL: [TraceType; 3] = [TraceType::Drop, TraceType::Translate, TraceType::Kni];

    const fn index(self) -> usize {
        match self {
            TraceType::Drop => 0,
            TraceType::Translate => 1,
            TraceType::Kni => 2,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TraceType::Drop => "drop",
            TraceType::Translate => "translate",
            TraceType::Kni => "kni",
        }
    }
}

impl Display for TraceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn open_dump(path: &Path) -> Result<PcapWriter<File>, pcap_file::PcapError> {
    let header = PcapHeader {
        snaplen: SNAPLEN,
        datalink: DataLink::ETHERNET,
        ..PcapHeader::default()
    };
    PcapWriter::with_header(File::create(path).map_err(pcap_file::PcapError::IoError)?, header)
}

fn write_record(
    writer: &mut PcapWriter<File>,
    frame: &[u8],
    at: SystemTime,
) -> Result<(), pcap_file::PcapError> {
    let orig_len = u32::try_from(frame.len()).unwrap_or(u32::MAX);
    let captured = &frame[..frame.len().min(SNAPLEN as usize)];
    let timestamp = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    writer.write_packet(&PcapPacket::new(timestamp, orig_len, captured))?;
    Ok(())
}

/// The trace dump files of a gateway.
#[derive(Debug)]
pub struct TraceDumps {
    dir: PathBuf,
    enabled: [AtomicBool; 3],
    classes: [Mutex<HashMap<u16, PcapWriter<File>>>; 3],
}

impl TraceDumps {
    /// Dumps written under `dir`, every class disabled.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: std::array::from_fn(|_| AtomicBool::new(false)),
            classes: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    pub fn enable(&self, trace: TraceType, enable: bool) {
        self.enabled[trace.index()].store(enable, Ordering::Relaxed);
        info!(
            "{} dump of {trace} packets",
            if enable { "Enabled" } else { "Disabled" }
        );
    }

    #[must_use]
    pub fn is_enabled(&self, trace: TraceType) -> bool {
        self.enabled[trace.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn path(&self, trace: TraceType, port: u16) -> PathBuf {
        self.dir.join(format!("{trace}-{port}.pcap"))
    }

    /// Append `frame` to the `trace` file of `port`, if that class is enabled.
    ///
    /// Failures are logged and the frame is not dumped.
    pub fn dump(&self, trace: TraceType, port: u16, frame: &[u8]) {
        if !self.is_enabled(trace) {
            return;
        }
        let mut files = lock(&self.classes[trace.index()]);
        if !files.contains_key(&port) {
            let path = self.path(trace, port);
            match open_dump(&path) {
                Ok(writer) => {
                    debug!("Opened dump file {}", path.display());
                    files.insert(port, writer);
                }
                Err(e) => {
                    error!("Failed to open dump file {}: {e}", path.display());
                    return;
                }
            }
        }
        let Some(writer) = files.get_mut(&port) else {
            return;
        };
        if let Err(e) = write_record(writer, frame, SystemTime::now()) {
            error!("Failed to write {trace} dump of port {port}: {e}");
        }
    }

    /// Flush and close every open file. Later dumps reopen (and truncate) them.
    pub fn close_all(&self) {
        for trace in TraceType::ALL {
            let mut files = lock(&self.classes[trace.index()]);
            for (port, writer) in files.drain() {
                if let Err(e) = writer.into_writer().flush() {
                    error!("Failed to flush {trace} dump of port {port}: {e}");
                }
            }
        }
    }
}
