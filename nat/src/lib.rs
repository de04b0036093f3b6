// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Stateful Network Address Translation between pairs of private and public interfaces.
//!
//! Frames leaving the private network get their source rewritten to the public interface's
//! address and a public port allocated for the flow; replies are rewritten back. Static
//! forwarding rules expose private endpoints on public ports, or deliver traffic to the local
//! protocol stack.
//!
//! # Concurrency
//!
//! Any number of workers may call [`InterfacePair::process`] on the same pair. Lookups in the
//! [`TranslationTable`]s never take the pair lock; only flow creation, static rule changes and
//! address updates do. Port map entries are refreshed with relaxed atomics.
//!
//! # Limitations
//!
//! - Changing an interface address does not purge the flows keyed on the previous address.
//! - ICMP echo flows always use the connection timeout.
//! - IPv6 next hops are only learnt from received traffic; there is no neighbor discovery.

mod control;
mod device;
mod dumps;
mod errors;
mod interface;
mod natip;
mod pair;
mod pipeline;
mod portmap;
mod sync;
mod table;
mod tuple;

#[cfg(test)]
mod test;

pub use control::{Nat, NatOptions};
pub use device::{DeviceInfo, LocalStack, LoggingLocalStack};
pub use dumps::{TraceDumps, TraceType};
pub use errors::{ControlError, NatError};
pub use interface::{Interface, InterfaceAddrs};
pub use natip::NatIp;
pub use pair::{InterfacePair, Lease, PairSettings};
pub use pipeline::{DropReason, Egress};
pub use portmap::{
    Clock, ConnState, Direction, PORT_END, PORT_START, PortMapEntry, PortMaps, Stamp, Timeouts,
};
pub use table::{FamilyTable, TranslationTable};
pub use tuple::{Tuple, Tuple4, Tuple6};
