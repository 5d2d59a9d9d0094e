// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! The process-wide virtual descriptor table.
//!
//! One monitor (a single [`Mutex`] plus a single [`Condvar`]) owns every
//! piece of multiplexed state: the descriptor map, the path-handler
//! registry, the host address table, the terminal input buffer, and the
//! storage-backend slot. Any mutation that could change the outcome of a
//! blocked `select` or a bridged storage wait broadcasts on the condition
//! variable; waiters re-check their predicate in a loop.


use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use hashbrown::HashMap;

use crate::bridge::{Completion, ResultCell};
use crate::devices::{NullHandler, RandomHandler, TermState, TermStream, TtyHandler};
use crate::errors::{
    CloseError, ConnectError, ControlError, DupError, FstatError, MkdirError, OpenError,
    ReadDirError, ReadError, SeekError, SelectError, StatError, TerminalError, WriteError,
};
use crate::hosts::{HostAddr, HostTable};
use crate::net::SocketStream;
use crate::platform::{
    ConsoleChannel, DebugLogProvider as _, Instant as _, Provider, StorageProvider as _,
    TcpProvider as _, TimeProvider as _,
};
use crate::select::FdSet;
use crate::storage::{PersistentHandler, StorageBackend as _};
use crate::stream::{
    ArcStream, DirEntry, FcntlCmd, FileStatus, OFlags, PathHandler, SeekWhence, Stream as _,
};
use crate::sync::{Condvar, Mutex, MutexGuard};

/// A descriptor number in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(u32);

impl Fd {
    /// Standard input, bound at table construction.
    pub const STDIN: Fd = Fd(0);
    /// Standard output, bound at table construction.
    pub const STDOUT: Fd = Fd(1);
    /// Standard error, bound at table construction.
    pub const STDERR: Fd = Fd(2);
    /// The lowest descriptor the allocator will hand out.
    pub const FIRST_DYNAMIC: Fd = Fd(3);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a descriptor number currently stands for.
enum Slot {
    /// Allocated but not yet bound; the number will not be handed out again,
    /// but no operation can go through it.
    Reserved,
    /// A socket created but not yet connected. Closable, not usable.
    Unconnected,
    /// Bound to a live stream.
    Open(ArcStream),
}

/// Construction-time options for an [`FdTable`].
#[derive(Default)]
#[non_exhaustive]
pub struct TableConfig {
    /// Paths to front with the persistent-storage backend once it becomes
    /// available.
    pub persistent_paths: Vec<String>,
}

struct TableState<P: Provider> {
    slots: HashMap<Fd, Slot>,
    registry: HashMap<String, Box<dyn PathHandler>>,
    hosts: HostTable,
    storage: Option<Arc<P::Storage>>,
    /// Set once the storage open attempt has resolved either way; bridged
    /// waits on storage hold off until then.
    storage_ready: bool,
    term_input: Arc<spin::Mutex<TermState>>,
}

struct TableX<P: Provider> {
    platform: &'static P,
    state: Mutex<P, TableState<P>>,
    cond: Condvar<P>,
}

/// The virtual descriptor table.
///
/// Cheap to clone; all clones share the same table. There is at most one
/// table per process by convention (enforced under the
/// `enforce_singleton_table_instance` feature).
pub struct FdTable<P: Provider> {
    x: Arc<TableX<P>>,
}

impl<P: Provider> Clone for FdTable<P> {
    fn clone(&self) -> Self {
        Self {
            x: Arc::clone(&self.x),
        }
    }
}

/// A type-erased handle that pokes the table's condition variable.
///
/// Handed to backends whose readiness changes asynchronously; invoking it
/// makes blocked `select` callers re-evaluate their predicates. Outlives the
/// table safely: waking a dropped table is a no-op.
#[derive(Clone)]
pub struct Waker {
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl Waker {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            wake: Arc::new(wake),
        }
    }

    pub fn wake(&self) {
        (self.wake)();
    }
}

#[cfg(feature = "enforce_singleton_table_instance")]
static TABLE_INSTANCE_EXISTS: core::sync::atomic::AtomicBool =
    core::sync::atomic::AtomicBool::new(false);

enum ReadinessKind {
    Read,
    Write,
    Except,
}

impl<P: Provider> FdTable<P> {
    /// Build a table on `platform`.
    ///
    /// Binds the three standard descriptors to terminal streams, registers
    /// the stub device paths, and kicks off the asynchronous storage open;
    /// `config.persistent_paths` get handlers once storage arrives.
    pub fn new(platform: &'static P, config: TableConfig) -> Self {
        #[cfg(feature = "enforce_singleton_table_instance")]
        assert!(
            !TABLE_INSTANCE_EXISTS.swap(true, core::sync::atomic::Ordering::SeqCst),
            "an FdTable instance already exists in this process"
        );

        let term_input = Arc::new(spin::Mutex::new(TermState::new()));

        let mut slots = HashMap::new();
        slots.insert(
            Fd::STDIN,
            Slot::Open(Arc::new(TermStream::new(
                platform,
                Arc::clone(&term_input),
                None,
                OFlags::RDONLY,
            ))),
        );
        slots.insert(
            Fd::STDOUT,
            Slot::Open(Arc::new(TermStream::new(
                platform,
                Arc::clone(&term_input),
                Some(ConsoleChannel::Stdout),
                OFlags::WRONLY,
            ))),
        );
        slots.insert(
            Fd::STDERR,
            Slot::Open(Arc::new(TermStream::new(
                platform,
                Arc::clone(&term_input),
                Some(ConsoleChannel::Stderr),
                OFlags::WRONLY,
            ))),
        );

        let mut registry: HashMap<String, Box<dyn PathHandler>> = HashMap::new();
        registry.insert("/dev/null".to_string(), Box::new(NullHandler));
        registry.insert(
            "/dev/random".to_string(),
            Box::new(RandomHandler::new(platform)),
        );
        registry.insert(
            "/dev/tty".to_string(),
            Box::new(TtyHandler::new(platform, Arc::clone(&term_input))),
        );

        let table = Self {
            x: Arc::new(TableX {
                platform,
                state: Mutex::new(TableState {
                    slots,
                    registry,
                    hosts: HostTable::new(),
                    storage: None,
                    storage_ready: false,
                    term_input,
                }),
                cond: Condvar::new(),
            }),
        };

        let weak = Arc::downgrade(&table.x);
        let persistent_paths = config.persistent_paths;
        platform.open_storage(Completion::new(move |storage: Option<Arc<P::Storage>>| {
            let Some(x) = weak.upgrade() else { return };
            let mut state = x.state.lock();
            if let Some(storage) = &storage {
                for path in &persistent_paths {
                    state.registry.insert(
                        path.clone(),
                        Box::new(PersistentHandler::new(Arc::clone(storage))),
                    );
                }
            } else {
                x.platform
                    .debug_log_print("persistent storage failed to open\n");
            }
            state.storage = storage;
            state.storage_ready = true;
            x.cond.notify_all();
        }));

        table
    }

    /// The smallest unused descriptor at or above
    /// [`Fd::FIRST_DYNAMIC`], reserved so it cannot be handed out twice.
    fn allocate(state: &mut TableState<P>) -> Fd {
        let mut n = Fd::FIRST_DYNAMIC.raw();
        while state.slots.contains_key(&Fd(n)) {
            n += 1;
        }
        let fd = Fd(n);
        state.slots.insert(fd, Slot::Reserved);
        fd
    }

    fn stream_of(state: &TableState<P>, fd: Fd) -> Option<ArcStream> {
        match state.slots.get(&fd) {
            Some(Slot::Open(stream)) => Some(Arc::clone(stream)),
            _ => None,
        }
    }

    /// Invoke the stream's teardown if no other descriptor references it.
    fn teardown_if_last(stream: &ArcStream) {
        if Arc::strong_count(stream) == 1 {
            stream.close();
        }
    }

    /// Open `path` through its registered handler, binding the produced
    /// stream to a fresh descriptor.
    pub fn open(&self, path: &str, flags: OFlags) -> Result<Fd, OpenError> {
        let mut guard = self.x.state.lock();
        let state = &mut *guard;
        if !state.registry.contains_key(path) {
            return Err(OpenError::NoSuchEntry);
        }
        let fd = Self::allocate(state);
        let handler = state
            .registry
            .get(path)
            .ok_or(OpenError::NoSuchEntry)?;
        match handler.open(fd, path, flags) {
            Some(stream) => {
                state.slots.insert(fd, Slot::Open(stream));
                self.x.cond.notify_all();
                Ok(fd)
            }
            None => {
                state.slots.remove(&fd);
                Err(OpenError::AccessDenied)
            }
        }
    }

    /// Release `fd`. Closing a reserved or unconnected descriptor just
    /// releases the number; closing the last descriptor of a stream tears
    /// the stream down.
    pub fn close(&self, fd: Fd) -> Result<(), CloseError> {
        let mut guard = self.x.state.lock();
        match guard.slots.remove(&fd) {
            None => Err(CloseError::BadDescriptor),
            Some(Slot::Open(stream)) => {
                Self::teardown_if_last(&stream);
                drop(stream);
                self.x.cond.notify_all();
                Ok(())
            }
            Some(_) => {
                self.x.cond.notify_all();
                Ok(())
            }
        }
    }

    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, ReadError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(ReadError::BadDescriptor)?;
        let n = stream.read(buf)?;
        // Draining input may change readiness for other readers.
        self.x.cond.notify_all();
        Ok(n)
    }

    pub fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, WriteError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(WriteError::BadDescriptor)?;
        let n = stream.write(buf)?;
        self.x.cond.notify_all();
        Ok(n)
    }

    pub fn seek(&self, fd: Fd, offset: isize, whence: SeekWhence) -> Result<usize, SeekError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(SeekError::BadDescriptor)?;
        stream.seek(offset, whence)
    }

    /// The status of the resource behind `fd`.
    pub fn fstat(&self, fd: Fd) -> Result<FileStatus, FstatError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(FstatError::BadDescriptor)?;
        Ok(stream.status())
    }

    /// The status of the resource at `path`, answered by its handler
    /// without opening it.
    pub fn stat(&self, path: &str) -> Result<FileStatus, StatError> {
        let guard = self.x.state.lock();
        let handler = guard.registry.get(path).ok_or(StatError::NoSuchEntry)?;
        handler.stat(path).ok_or(StatError::BackendFailure)
    }

    pub fn read_dir(&self, fd: Fd) -> Result<Vec<DirEntry>, ReadDirError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(ReadDirError::BadDescriptor)?;
        stream.read_dir()
    }

    /// Whether `fd` refers to a terminal (`isatty`).
    pub fn is_terminal(&self, fd: Fd) -> Result<bool, TerminalError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(TerminalError::BadDescriptor)?;
        Ok(stream.is_terminal())
    }

    pub fn fcntl(&self, fd: Fd, cmd: FcntlCmd) -> Result<OFlags, ControlError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(ControlError::BadDescriptor)?;
        let flags = stream.fcntl(cmd)?;
        self.x.cond.notify_all();
        Ok(flags)
    }

    pub fn ioctl(&self, fd: Fd, request: u32) -> Result<(), ControlError> {
        let guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(ControlError::BadDescriptor)?;
        stream.ioctl(request)
    }

    /// Duplicate `fd` onto a fresh descriptor sharing the same stream.
    pub fn dup(&self, fd: Fd) -> Result<Fd, DupError> {
        let mut guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(DupError::BadDescriptor)?;
        let new_fd = Self::allocate(&mut guard);
        match stream.dup(new_fd) {
            Some(duplicate) => {
                guard.slots.insert(new_fd, Slot::Open(duplicate));
                self.x.cond.notify_all();
                Ok(new_fd)
            }
            None => {
                guard.slots.remove(&new_fd);
                Err(DupError::AccessDenied)
            }
        }
    }

    /// Duplicate `fd` onto `new_fd`, silently closing whatever `new_fd`
    /// stood for. Duplicating a descriptor onto itself is a no-op.
    pub fn dup2(&self, fd: Fd, new_fd: Fd) -> Result<Fd, DupError> {
        let mut guard = self.x.state.lock();
        let stream = Self::stream_of(&guard, fd).ok_or(DupError::BadDescriptor)?;
        if fd == new_fd {
            return Ok(new_fd);
        }
        if let Some(Slot::Open(old)) = guard.slots.remove(&new_fd) {
            Self::teardown_if_last(&old);
        }
        match stream.dup(new_fd) {
            Some(duplicate) => {
                guard.slots.insert(new_fd, Slot::Open(duplicate));
                self.x.cond.notify_all();
                Ok(new_fd)
            }
            None => {
                self.x.cond.notify_all();
                Err(DupError::AccessDenied)
            }
        }
    }

    fn poll_ready(state: &TableState<P>, fd: Fd, kind: &ReadinessKind) -> bool {
        match state.slots.get(&fd) {
            Some(Slot::Open(stream)) => match kind {
                ReadinessKind::Read => stream.read_ready(),
                ReadinessKind::Write => stream.write_ready(),
                ReadinessKind::Except => stream.exception(),
            },
            // Reserved and unconnected descriptors are watchable but never
            // ready.
            Some(_) => false,
            None => false,
        }
    }

    fn validate_sets(state: &TableState<P>, sets: [&FdSet; 3]) -> Result<(), SelectError> {
        for set in sets {
            for fd in set.iter() {
                if !state.slots.contains_key(&fd) {
                    return Err(SelectError::BadDescriptor);
                }
            }
        }
        Ok(())
    }

    fn any_ready(state: &TableState<P>, sets: [(&FdSet, ReadinessKind); 3]) -> bool {
        sets.iter()
            .any(|(set, kind)| set.iter().any(|fd| Self::poll_ready(state, fd, kind)))
    }

    /// Retain only the ready members of `set`; returns how many remain.
    fn apply_set(state: &TableState<P>, set: &mut FdSet, kind: ReadinessKind) -> usize {
        let retained: FdSet = set
            .iter()
            .filter(|fd| Self::poll_ready(state, *fd, &kind))
            .collect();
        let count = retained.len();
        *set = retained;
        count
    }

    /// Block until a watched descriptor is ready or `timeout` elapses.
    ///
    /// On return the three sets have been narrowed to their ready members
    /// and the total count is returned; a timeout yields `Ok(0)` with all
    /// sets emptied. Every watched descriptor must exist in the table, both
    /// on entry and on every re-check; a concurrent close of a watched
    /// descriptor makes the call fail.
    pub fn select(
        &self,
        read: &mut FdSet,
        write: &mut FdSet,
        except: &mut FdSet,
        timeout: Option<Duration>,
    ) -> Result<usize, SelectError> {
        // Overflowing deadline arithmetic degrades to an indefinite wait.
        let deadline = timeout.and_then(|t| self.x.platform.now().checked_add(t));
        let mut guard = self.x.state.lock();
        let expired = loop {
            Self::validate_sets(&guard, [&*read, &*write, &*except])?;
            let ready = Self::any_ready(
                &guard,
                [
                    (&*read, ReadinessKind::Read),
                    (&*write, ReadinessKind::Write),
                    (&*except, ReadinessKind::Except),
                ],
            );
            if ready {
                break false;
            }
            match deadline {
                None => {
                    guard = self.x.cond.wait(guard);
                }
                Some(deadline) => {
                    let now = self.x.platform.now();
                    let Some(remaining) = deadline.checked_duration_since(&now) else {
                        break true;
                    };
                    if remaining.is_zero() {
                        break true;
                    }
                    let (reacquired, _timed_out) = self.x.cond.wait_timeout(guard, remaining);
                    guard = reacquired;
                }
            }
        };

        if expired {
            read.clear();
            write.clear();
            except.clear();
            return Ok(0);
        }

        let mut count = 0;
        count += Self::apply_set(&guard, read, ReadinessKind::Read);
        count += Self::apply_set(&guard, write, ReadinessKind::Write);
        count += Self::apply_set(&guard, except, ReadinessKind::Except);
        Ok(count)
    }

    /// Allocate a socket descriptor. It carries no stream until
    /// [`connect`](Self::connect) succeeds; until then only `close` works
    /// through it.
    pub fn socket(&self) -> Fd {
        let mut guard = self.x.state.lock();
        let fd = Self::allocate(&mut guard);
        guard.slots.insert(fd, Slot::Unconnected);
        self.x.cond.notify_all();
        fd
    }

    /// Connect the unconnected socket `fd` to `addr:port`.
    ///
    /// The address is mapped back to the host name it was assigned for (see
    /// [`resolve_host`](Self::resolve_host)); an address the table never
    /// assigned is passed to the platform in dotted-quad form.
    ///
    /// The monitor lock is held across the platform connect, so the slot
    /// cannot change out from under the attempt; concurrent table calls
    /// serialize behind it.
    pub fn connect(&self, fd: Fd, addr: HostAddr, port: u16) -> Result<(), ConnectError> {
        let mut guard = self.x.state.lock();
        match guard.slots.get(&fd) {
            Some(Slot::Unconnected) => {}
            _ => return Err(ConnectError::BadDescriptor),
        }
        let host = match guard.hosts.reverse(addr) {
            Some(name) => name.to_string(),
            None => format!("{addr}"),
        };
        let connection = self
            .x
            .platform
            .connect_tcp(&host, port, self.waker())
            .map_err(|err| {
                self.x
                    .platform
                    .debug_log_print(&format!("connect to {host}:{port} failed: {err}\n"));
                ConnectError::ConnectionRefused
            })?;
        guard
            .slots
            .insert(fd, Slot::Open(Arc::new(SocketStream::new(connection, fd))));
        self.x.cond.notify_all();
        Ok(())
    }

    /// The address for `name`, assigning a fresh synthetic one on first
    /// sight.
    pub fn resolve_host(&self, name: &str) -> HostAddr {
        self.x.state.lock().hosts.resolve(name)
    }

    /// Record an explicit name/address pair in the host table.
    pub fn add_host(&self, name: &str, addr: HostAddr) {
        self.x.state.lock().hosts.add(name.to_string(), addr);
    }

    /// Create a directory on the persistent-storage backend, blocking until
    /// the asynchronous backend answers.
    ///
    /// Callers arriving before the storage open has resolved wait for it
    /// first.
    pub fn make_directory(&self, path: &str) -> Result<(), MkdirError> {
        let mut guard = self.x.state.lock();
        while !guard.storage_ready {
            guard = self.x.cond.wait(guard);
        }
        let storage = guard
            .storage
            .clone()
            .ok_or(MkdirError::StorageUnavailable)?;

        let cell = ResultCell::new();
        let completion = {
            let cell = Arc::clone(&cell);
            let weak = Arc::downgrade(&self.x);
            Completion::new(move |ok: bool| {
                cell.set(ok);
                if let Some(x) = weak.upgrade() {
                    let _guard = x.state.lock();
                    x.cond.notify_all();
                }
            })
        };
        // Submitted under the monitor lock; the backend contract forbids
        // re-entrant delivery, so this cannot deadlock.
        storage.make_directory(path, completion);

        loop {
            if let Some(ok) = cell.take() {
                return if ok { Ok(()) } else { Err(MkdirError::Failed) };
            }
            guard = self.x.cond.wait(guard);
        }
    }

    /// Feed input bytes to the terminal; readers of the standard input and
    /// `/dev/tty` streams will see them.
    pub fn feed_stdin(&self, bytes: &[u8]) {
        let guard = self.x.state.lock();
        guard.term_input.lock().push(bytes);
        self.x.cond.notify_all();
    }

    /// Mark the end of terminal input; readers drain what is buffered, then
    /// see end-of-stream.
    pub fn close_stdin(&self) {
        let guard = self.x.state.lock();
        guard.term_input.lock().close_input();
        self.x.cond.notify_all();
    }

    /// Register `handler` for the exact path `path`.
    ///
    /// Panics if a handler is already registered for it; registrations are
    /// permanent.
    pub fn register_path_handler(&self, path: &str, handler: Box<dyn PathHandler>) {
        let mut guard = self.x.state.lock();
        let previous = guard.registry.insert(path.to_string(), handler);
        assert!(
            previous.is_none(),
            "a handler is already registered for {path}"
        );
    }

    /// A handle backends can use to make blocked `select` callers
    /// re-evaluate readiness.
    pub fn waker(&self) -> Waker {
        let weak = Arc::downgrade(&self.x);
        Waker::new(move || {
            if let Some(x) = weak.upgrade() {
                let _guard: MutexGuard<'_, P, _> = x.state.lock();
                x.cond.notify_all();
            }
        })
    }
}

#[cfg(feature = "enforce_singleton_table_instance")]
impl<P: Provider> Drop for TableX<P> {
    fn drop(&mut self) {
        TABLE_INSTANCE_EXISTS.store(false, core::sync::atomic::Ordering::SeqCst);
    }
}
