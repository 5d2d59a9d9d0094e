// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! The underlying platform upon which the descriptor table resides.
//!
//! The top-level trait that denotes something is a valid fdmux platform is
//! [`Provider`]. It is merely a collection of subtraits that could be
//! composed independently from various other crates that implement them upon
//! various types: raw futex-style mutexes, monotonic time, debug logging,
//! the host console, a randomness source, the host TCP stack, and the
//! asynchronous persistent-storage service.
//!
//! Ideally, a [`Provider`] is zero-sized, and only exists to provide access
//! to functionality provided by it. _However_, most of the provided APIs act
//! upon an `&self` to allow storage of any useful "globals" within it.

#[cfg(test)]
pub(crate) mod mock;

use alloc::sync::Arc;

use thiserror::Error;

use crate::bridge::Completion;
use crate::storage::StorageBackend;
use crate::table::Waker;

/// A provider of a platform upon which an [`FdTable`](crate::FdTable) can
/// operate.
pub trait Provider:
    RawMutexProvider
    + TimeProvider
    + DebugLogProvider
    + ConsoleProvider
    + EntropyProvider
    + TcpProvider
    + StorageProvider
    + Sync
    + 'static
{
}

/// A provider of raw mutexes
pub trait RawMutexProvider {
    type RawMutex: RawMutex;
}

/// A raw mutex/lock API; expected to roughly match (or even be implemented
/// using) a Linux futex.
pub trait RawMutex: Send + Sync {
    /// The initial (unlocked, value zero) state.
    const INIT: Self;

    /// Returns a reference to the underlying atomic value
    fn underlying_atomic(&self) -> &core::sync::atomic::AtomicU32;

    /// Wake up `n` threads blocked on this raw mutex.
    ///
    /// Returns the number of waiters that were woken up.
    fn wake_many(&self, n: usize) -> usize;

    /// Wake up one thread blocked on this raw mutex.
    ///
    /// Returns true if this actually woke up such a thread, or false if no
    /// thread was waiting on this raw mutex.
    fn wake_one(&self) -> bool {
        self.wake_many(1) > 0
    }

    /// Wake up all threads that are blocked on this raw mutex.
    ///
    /// Returns the number of waiters that were woken up.
    fn wake_all(&self) -> usize {
        self.wake_many(usize::MAX)
    }

    /// If the underlying value is `val`, block until a wake operation wakes
    /// us up.
    fn block(&self, val: u32) -> Result<(), ImmediatelyWokenUp>;

    /// If the underlying value is `val`, block until a wake operation wakes
    /// us up, or some `time` has passed without a wake operation having
    /// occurred.
    fn block_or_timeout(
        &self,
        val: u32,
        time: core::time::Duration,
    ) -> Result<UnblockedOrTimedOut, ImmediatelyWokenUp>;
}

/// A zero-sized struct indicating that the block was immediately unblocked
/// (due to non-matching value).
pub struct ImmediatelyWokenUp;

/// Named-boolean to indicate whether [`RawMutex::block_or_timeout`] was woken
/// up or timed out.
#[must_use]
pub enum UnblockedOrTimedOut {
    /// Unblocked by a wake call
    Unblocked,
    /// Sufficient time elapsed without a wake call
    TimedOut,
}

/// An interface to understanding time.
pub trait TimeProvider {
    type Instant: Instant;
    /// Returns an instant corresponding to "now".
    fn now(&self) -> Self::Instant;
}

/// An opaque measurement of a monotonically nondecreasing clock.
pub trait Instant: Copy {
    /// Returns the amount of time elapsed from another instant to this one,
    /// or `None` if that instant is later than this one.
    fn checked_duration_since(&self, earlier: &Self) -> Option<core::time::Duration>;

    /// Returns the instant that is `duration` later than this one, or `None`
    /// on overflow.
    fn checked_add(&self, duration: core::time::Duration) -> Option<Self>
    where
        Self: Sized;

    /// Returns the amount of time elapsed from another instant to this one,
    /// or zero duration if that instant is later than this one.
    fn duration_since(&self, earlier: &Self) -> core::time::Duration {
        self.checked_duration_since(earlier)
            .unwrap_or(core::time::Duration::from_secs(0))
    }
}

/// An interface to dumping debug output for tracing purposes.
pub trait DebugLogProvider {
    /// Print `msg` to the debug log
    ///
    /// Newlines are *not* automatically appended to `msg`, thus the caller
    /// must make sure to include newlines if necessary.
    ///
    /// On some platforms, this might be a slow/expensive operation, thus
    /// callers should prefer combining all strings part of a single logical
    /// message into a single `debug_log_print` call.
    fn debug_log_print(&self, msg: &str);
}

/// The host console sink behind the standard output/error descriptors.
pub trait ConsoleProvider {
    /// Write `buf` to the given console channel, returning the number of
    /// bytes accepted.
    fn write_console(&self, channel: ConsoleChannel, buf: &[u8])
        -> Result<usize, ConsoleWriteError>;
}

/// The two output channels of the host console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleChannel {
    Stdout,
    Stderr,
}

/// Possible errors from [`ConsoleProvider::write_console`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConsoleWriteError {
    #[error("console output has been closed by the host")]
    Closed,
}

/// A cryptographically-secure source of random bytes, backing `/dev/random`.
pub trait EntropyProvider {
    /// Fill `buf` entirely with random bytes.
    fn fill_random_bytes(&self, buf: &mut [u8]);
}

/// The host TCP stack, reached synchronously from within a locked `connect`
/// call.
pub trait TcpProvider {
    type Connection: TcpConnection + Send + Sync + 'static;

    /// Establish a connection to `host:port`, blocking until the attempt
    /// resolves.
    ///
    /// The provided `waker` must be invoked by the backend whenever the
    /// readiness of the returned connection may have changed (data arriving,
    /// a send draining, the peer closing); the descriptor table relies on
    /// these wakes to re-evaluate `select` predicates.
    fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        waker: Waker,
    ) -> Result<Self::Connection, TcpConnectError>;
}

/// Possible errors from [`TcpProvider::connect_tcp`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TcpConnectError {
    #[error("the remote host actively refused the connection")]
    Refused,
    #[error("the remote host could not be reached")]
    Unreachable,
}

/// An established TCP connection.
///
/// All operations are non-blocking; the readiness predicates are consumed by
/// the readiness multiplexer without blocking.
pub trait TcpConnection {
    /// Queue `buf` for sending. Returns the number of bytes accepted.
    fn send(&self, buf: &[u8]) -> Result<usize, TcpIoError>;

    /// Receive into `buf`. Returns the number of bytes received; zero means
    /// the peer has closed the connection.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, TcpIoError>;

    /// Whether a `receive` would make progress without blocking.
    fn read_ready(&self) -> bool;

    /// Whether a `send` would make progress without blocking.
    fn write_ready(&self) -> bool;

    /// Whether the connection is in an exceptional condition.
    fn has_error(&self) -> bool;

    /// Tear the connection down. Further operations return
    /// [`TcpIoError::Closed`].
    fn close(&self);
}

/// Possible errors from [`TcpConnection`] operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TcpIoError {
    #[error("operation would block")]
    WouldBlock,
    #[error("the connection has been closed")]
    Closed,
}

/// The asynchronous persistent-storage service.
///
/// Storage can only be opened through a completion callback; the descriptor
/// table bridges this into its synchronous world (see
/// [`bridge`](crate::bridge)).
pub trait StorageProvider {
    type Storage: StorageBackend + Send + Sync + 'static;

    /// Begin opening the storage backend.
    ///
    /// The `completion` must be delivered exactly once, with `None` if the
    /// backend is unavailable. It must *not* be invoked re-entrantly from
    /// within this call: the completion takes the table's monitor lock
    /// itself, and the submitting thread may already be holding it.
    fn open_storage(&self, completion: Completion<Option<Arc<Self::Storage>>>);
}
