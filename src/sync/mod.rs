// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Higher-level synchronization primitives
//!
//! The implementation of [`Mutex`] in this module is derived from the
//! futex-based mutex in Rust's `std`, modified to invoke through the
//! [`platform`](crate::platform) rather than through regular system
//! interfaces. [`Condvar`] follows the same construction: its notification
//! counter lives in the platform raw mutex's atomic.

use crate::platform;

mod condvar;
mod mutex;

pub use condvar::{Condvar, WaitTimeoutResult};
pub use mutex::{Mutex, MutexGuard};

/// A convenience name for specific requirements from the platform
pub trait RawSyncPrimitivesProvider: platform::RawMutexProvider + Sync + 'static {}
impl<Platform> RawSyncPrimitivesProvider for Platform where
    Platform: platform::RawMutexProvider + Sync + 'static
{
}
