// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! # fdmux
//!
//! > A virtual file-descriptor table for sandboxed applications.
//!
//! fdmux exposes a POSIX-like descriptor interface "above"
//! (open/close/read/write/seek/stat/select/dup/...) when it is provided a
//! `Platform` interface "below". The backends behind the descriptors are
//! explicitly *not* POSIX: stub devices, a persistent storage service that
//! completes operations through asynchronous callbacks, and a host network
//! stack reached through a capability trait.
//!
//! The interesting part is the multiplexing layer in [`table`]: a single
//! monitor (one mutex, one condition variable) owns the descriptor map, the
//! path-handler registry and the host address table, dispatches descriptor
//! operations polymorphically to whichever [`stream::Stream`] owns the
//! descriptor, implements a blocking, timeout-aware `select` across arbitrary
//! backend types, and bridges callback-completed subsystems into synchronous
//! call semantics.
//!
//! To use fdmux, you must provide a type that implements the
//! [`platform::Provider`] trait; then construct an [`FdTable`] from it. The
//! table is an explicitly constructed, explicitly passed instance; there is
//! at most one per process by convention (see the
//! `enforce_singleton_table_instance` feature), never via implicit global
//! access.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod bridge;
pub mod devices;
pub mod errors;
pub mod hosts;
pub mod net;
pub mod platform;
pub mod select;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod table;

pub use select::FdSet;
pub use table::{Fd, FdTable, TableConfig, Waker};
