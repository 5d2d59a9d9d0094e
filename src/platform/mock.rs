// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! A `std`-backed platform for tests.
//!
//! The raw mutex emulates a futex with a std mutex/condvar pair; storage
//! completions are delivered from spawned threads so they are never
//! re-entrant; the TCP stack hands out in-memory connections the test can
//! drive from the other end.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{
    AtomicBool, AtomicU32,
    Ordering::{Relaxed, SeqCst},
};
use core::time::Duration;

use std::collections::HashSet;
use std::sync::{Condvar as StdCondvar, Mutex as StdMutex};
use std::thread;
use std::time::Instant as StdInstant;

use crate::bridge::Completion;
use crate::stream::{ArcStream, FileStatus, FileType, Mode, NodeInfo, OFlags};
use crate::table::{Fd, Waker};

use super::{
    ConsoleChannel, ConsoleProvider, ConsoleWriteError, DebugLogProvider, EntropyProvider,
    ImmediatelyWokenUp, Instant, Provider, RawMutex, RawMutexProvider, StorageProvider,
    TcpConnectError, TcpConnection, TcpIoError, TcpProvider, TimeProvider, UnblockedOrTimedOut,
};

/// A futex emulated with a std mutex/condvar pair.
///
/// The generation counter under `inner` stands in for the kernel wait queue:
/// every wake bumps it, and blocked threads wait for it to move.
pub(crate) struct MockRawMutex {
    value: AtomicU32,
    waiters: AtomicU32,
    inner: StdMutex<u64>,
    cond: StdCondvar,
}

impl RawMutex for MockRawMutex {
    const INIT: Self = Self {
        value: AtomicU32::new(0),
        waiters: AtomicU32::new(0),
        inner: StdMutex::new(0),
        cond: StdCondvar::new(),
    };

    fn underlying_atomic(&self) -> &AtomicU32 {
        &self.value
    }

    fn wake_many(&self, n: usize) -> usize {
        let woken = (self.waiters.load(SeqCst) as usize).min(n);
        let mut generation = self.inner.lock().unwrap();
        *generation += 1;
        drop(generation);
        self.cond.notify_all();
        woken
    }

    fn block(&self, val: u32) -> Result<(), ImmediatelyWokenUp> {
        let mut generation = self.inner.lock().unwrap();
        if self.value.load(SeqCst) != val {
            return Err(ImmediatelyWokenUp);
        }
        let start = *generation;
        self.waiters.fetch_add(1, SeqCst);
        while *generation == start {
            generation = self.cond.wait(generation).unwrap();
        }
        self.waiters.fetch_sub(1, SeqCst);
        Ok(())
    }

    fn block_or_timeout(
        &self,
        val: u32,
        time: Duration,
    ) -> Result<UnblockedOrTimedOut, ImmediatelyWokenUp> {
        let deadline = StdInstant::now() + time;
        let mut generation = self.inner.lock().unwrap();
        if self.value.load(SeqCst) != val {
            return Err(ImmediatelyWokenUp);
        }
        let start = *generation;
        self.waiters.fetch_add(1, SeqCst);
        let outcome = loop {
            if *generation != start {
                break UnblockedOrTimedOut::Unblocked;
            }
            let now = StdInstant::now();
            let Some(remaining) = deadline.checked_duration_since(now) else {
                break UnblockedOrTimedOut::TimedOut;
            };
            let (reacquired, _) = self.cond.wait_timeout(generation, remaining).unwrap();
            generation = reacquired;
        };
        self.waiters.fetch_sub(1, SeqCst);
        Ok(outcome)
    }
}

/// Monotonic time straight from std.
#[derive(Clone, Copy)]
pub(crate) struct MockInstant(StdInstant);

impl Instant for MockInstant {
    fn checked_duration_since(&self, earlier: &Self) -> Option<Duration> {
        self.0.checked_duration_since(earlier.0)
    }

    fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(MockInstant)
    }
}

/// An in-memory TCP connection the test drives from the peer end.
#[derive(Clone)]
pub(crate) struct MockConnection {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    rx: StdMutex<VecDeque<u8>>,
    tx: StdMutex<Vec<u8>>,
    closed: AtomicBool,
    peer_closed: AtomicBool,
    waker: StdMutex<Option<Waker>>,
}

impl MockConnection {
    fn new(waker: Waker) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                rx: StdMutex::new(VecDeque::new()),
                tx: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                peer_closed: AtomicBool::new(false),
                waker: StdMutex::new(Some(waker)),
            }),
        }
    }

    fn poke(&self) {
        if let Some(waker) = self.inner.waker.lock().unwrap().as_ref() {
            waker.wake();
        }
    }

    /// Make bytes arrive from the peer.
    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.inner
            .rx
            .lock()
            .unwrap()
            .extend(bytes.iter().copied());
        self.poke();
    }

    /// Everything sent through the connection so far.
    pub(crate) fn sent(&self) -> Vec<u8> {
        self.inner.tx.lock().unwrap().clone()
    }

    /// Close the connection from the peer side.
    pub(crate) fn close_peer(&self) {
        self.inner.peer_closed.store(true, SeqCst);
        self.poke();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(SeqCst)
    }
}

impl TcpConnection for MockConnection {
    fn send(&self, buf: &[u8]) -> Result<usize, TcpIoError> {
        if self.inner.closed.load(SeqCst) {
            return Err(TcpIoError::Closed);
        }
        self.inner.tx.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize, TcpIoError> {
        if self.inner.closed.load(SeqCst) {
            return Err(TcpIoError::Closed);
        }
        let mut rx = self.inner.rx.lock().unwrap();
        if rx.is_empty() {
            return if self.inner.peer_closed.load(SeqCst) {
                Ok(0)
            } else {
                Err(TcpIoError::WouldBlock)
            };
        }
        let mut n = 0;
        while n < buf.len() {
            match rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn read_ready(&self) -> bool {
        !self.inner.rx.lock().unwrap().is_empty() || self.inner.peer_closed.load(SeqCst)
    }

    fn write_ready(&self) -> bool {
        !self.inner.closed.load(SeqCst)
    }

    fn has_error(&self) -> bool {
        false
    }

    fn close(&self) {
        self.inner.closed.store(true, SeqCst);
        self.inner.waker.lock().unwrap().take();
    }
}

/// A storage backend that remembers created directories and completes from
/// a spawned thread.
pub(crate) struct MockStorage {
    dirs: Arc<StdMutex<Vec<String>>>,
    fail_dirs: Arc<StdMutex<HashSet<String>>>,
}

impl MockStorage {
    fn new() -> Self {
        Self {
            dirs: Arc::new(StdMutex::new(Vec::new())),
            fail_dirs: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub(crate) fn created_dirs(&self) -> Vec<String> {
        self.dirs.lock().unwrap().clone()
    }
}

impl crate::storage::StorageBackend for MockStorage {
    fn make_directory(&self, path: &str, completion: Completion<bool>) {
        let ok = !self.fail_dirs.lock().unwrap().contains(path);
        let dirs = Arc::clone(&self.dirs);
        let path = path.to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            if ok {
                dirs.lock().unwrap().push(path);
            }
            completion.complete(ok);
        });
    }

    fn open_file(&self, _fd: Fd, _path: &str, _flags: OFlags) -> Option<ArcStream> {
        None
    }

    fn stat(&self, _path: &str) -> Option<FileStatus> {
        Some(FileStatus {
            file_type: FileType::Directory,
            mode: Mode::RUSR | Mode::WUSR,
            size: 0,
            blksize: 4096,
            node_info: NodeInfo {
                dev: 3,
                ino: 1,
                rdev: None,
            },
        })
    }
}

/// The all-in-one test platform. Leaked to `'static` because every
/// component keeps a `&'static` platform reference.
pub(crate) struct MockPlatform {
    stdout: StdMutex<Vec<u8>>,
    stderr: StdMutex<Vec<u8>>,
    debug_log: StdMutex<Vec<String>>,
    entropy_state: AtomicU32,
    refused_hosts: StdMutex<HashSet<String>>,
    connect_delay: StdMutex<Duration>,
    connections: StdMutex<Vec<(String, u16, MockConnection)>>,
    storage_enabled: AtomicBool,
    storage: Arc<MockStorage>,
    fail_storage_dirs: Arc<StdMutex<HashSet<String>>>,
}

impl MockPlatform {
    pub(crate) fn new() -> &'static Self {
        let storage = MockStorage::new();
        let fail_storage_dirs = Arc::clone(&storage.fail_dirs);
        Box::leak(Box::new(Self {
            stdout: StdMutex::new(Vec::new()),
            stderr: StdMutex::new(Vec::new()),
            debug_log: StdMutex::new(Vec::new()),
            entropy_state: AtomicU32::new(0x9E37_79B9),
            refused_hosts: StdMutex::new(HashSet::new()),
            connect_delay: StdMutex::new(Duration::ZERO),
            connections: StdMutex::new(Vec::new()),
            storage_enabled: AtomicBool::new(true),
            storage: Arc::new(storage),
            fail_storage_dirs,
        }))
    }

    /// Drain everything written to the given console channel.
    pub(crate) fn take_console(&self, channel: ConsoleChannel) -> Vec<u8> {
        let sink = match channel {
            ConsoleChannel::Stdout => &self.stdout,
            ConsoleChannel::Stderr => &self.stderr,
        };
        core::mem::take(&mut *sink.lock().unwrap())
    }

    pub(crate) fn debug_log_lines(&self) -> Vec<String> {
        self.debug_log.lock().unwrap().clone()
    }

    /// Make future connection attempts to `host` fail.
    pub(crate) fn refuse_connections_to(&self, host: &str) {
        self.refused_hosts.lock().unwrap().insert(host.to_string());
    }

    /// Make future connection attempts block for `delay` before resolving.
    pub(crate) fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// The most recent connection handed out, with the target it was opened
    /// for.
    pub(crate) fn last_connection(&self) -> Option<(String, u16, MockConnection)> {
        self.connections.lock().unwrap().last().cloned()
    }

    /// Make the storage open resolve to "unavailable".
    pub(crate) fn disable_storage(&self) {
        self.storage_enabled.store(false, SeqCst);
    }

    /// Make directory creation for `path` fail.
    pub(crate) fn fail_make_directory(&self, path: &str) {
        self.fail_storage_dirs
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    pub(crate) fn storage(&self) -> &MockStorage {
        &self.storage
    }
}

impl RawMutexProvider for MockPlatform {
    type RawMutex = MockRawMutex;
}

impl TimeProvider for MockPlatform {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(StdInstant::now())
    }
}

impl DebugLogProvider for MockPlatform {
    fn debug_log_print(&self, msg: &str) {
        self.debug_log.lock().unwrap().push(msg.to_string());
    }
}

impl ConsoleProvider for MockPlatform {
    fn write_console(
        &self,
        channel: ConsoleChannel,
        buf: &[u8],
    ) -> Result<usize, ConsoleWriteError> {
        let sink = match channel {
            ConsoleChannel::Stdout => &self.stdout,
            ConsoleChannel::Stderr => &self.stderr,
        };
        sink.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl EntropyProvider for MockPlatform {
    fn fill_random_bytes(&self, buf: &mut [u8]) {
        let mut s = self.entropy_state.load(Relaxed);
        for byte in buf {
            s ^= s << 13;
            s ^= s >> 17;
            s ^= s << 5;
            *byte = s as u8;
        }
        self.entropy_state.store(s, Relaxed);
    }
}

impl TcpProvider for MockPlatform {
    type Connection = MockConnection;

    fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        waker: Waker,
    ) -> Result<MockConnection, TcpConnectError> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.refused_hosts.lock().unwrap().contains(host) {
            return Err(TcpConnectError::Refused);
        }
        let connection = MockConnection::new(waker);
        self.connections
            .lock()
            .unwrap()
            .push((host.to_string(), port, connection.clone()));
        Ok(connection)
    }
}

impl StorageProvider for MockPlatform {
    type Storage = MockStorage;

    fn open_storage(&self, completion: Completion<Option<Arc<MockStorage>>>) {
        let storage = if self.storage_enabled.load(SeqCst) {
            Some(Arc::clone(&self.storage))
        } else {
            None
        };
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            completion.complete(storage);
        });
    }
}

impl Provider for MockPlatform {}
