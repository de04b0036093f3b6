// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The pair lock, swapped for its `shuttle` model when the `shuttle` feature is enabled so that
//! concurrency tests can explore interleavings around it.

#[cfg(not(feature = "shuttle"))]
pub use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "shuttle")]
pub use shuttle::sync::{Mutex, MutexGuard};

/// Lock `mutex`, recovering the guard if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
