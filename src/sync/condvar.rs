// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Condition variables

use core::sync::atomic::Ordering::Relaxed;

use crate::platform::{ImmediatelyWokenUp, RawMutex as _, UnblockedOrTimedOut};

use super::{MutexGuard, RawSyncPrimitivesProvider};

/// Condition variables, roughly analogous to Rust's
/// [`std::sync::Condvar`](https://doc.rust-lang.org/std/sync/struct.Condvar.html).
///
/// The underlying atomic of the raw mutex is used as a notification sequence
/// counter: `wait` snapshots the counter while still holding the mutex, so a
/// notification between unlock and block is observed as a non-matching value
/// and the wait returns immediately rather than being lost.
///
/// Spurious wakeups are permitted; callers must re-check their condition in a
/// loop.
pub struct Condvar<Platform: RawSyncPrimitivesProvider> {
    futex: Platform::RawMutex,
}

/// Whether a [`Condvar::wait_timeout`] returned because of a timeout.
///
/// Note that a `false` here does not guarantee the awaited condition holds;
/// it only means a wake arrived before the timeout elapsed.
#[must_use]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

impl<Platform: RawSyncPrimitivesProvider> Condvar<Platform> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            futex: <Platform::RawMutex as crate::platform::RawMutex>::INIT,
        }
    }

    /// Blocks the current thread until this condition variable receives a
    /// notification.
    ///
    /// The mutex behind `guard` is atomically released with respect to
    /// notifications, and re-acquired before this returns.
    pub fn wait<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, Platform, T>,
    ) -> MutexGuard<'a, Platform, T> {
        // Snapshot the sequence while the mutex is still held; a notify that
        // happens after the unlock below bumps the sequence and `block`
        // returns immediately with `ImmediatelyWokenUp`.
        let seq = self.futex.underlying_atomic().load(Relaxed);
        let mutex = MutexGuard::source(&guard);
        drop(guard);
        let _ = self.futex.block(seq);
        mutex.lock()
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    pub fn wait_timeout<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, Platform, T>,
        timeout: core::time::Duration,
    ) -> (MutexGuard<'a, Platform, T>, WaitTimeoutResult) {
        let seq = self.futex.underlying_atomic().load(Relaxed);
        let mutex = MutexGuard::source(&guard);
        drop(guard);
        let timed_out = match self.futex.block_or_timeout(seq, timeout) {
            Ok(UnblockedOrTimedOut::TimedOut) => true,
            Ok(UnblockedOrTimedOut::Unblocked) | Err(ImmediatelyWokenUp) => false,
        };
        (mutex.lock(), WaitTimeoutResult(timed_out))
    }

    /// Wakes up all blocked threads on this condvar.
    ///
    /// There is deliberately no single-thread notify: the waiters here
    /// cannot be matched to the events that satisfy them, so every state
    /// change broadcasts and each waiter re-checks its own condition.
    pub fn notify_all(&self) {
        self.futex.underlying_atomic().fetch_add(1, Relaxed);
        self.futex.wake_all();
    }
}

impl<Platform: RawSyncPrimitivesProvider> Default for Condvar<Platform> {
    fn default() -> Self {
        Self::new()
    }
}
