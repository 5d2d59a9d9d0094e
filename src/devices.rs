// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Stub device streams: the terminal, `/dev/null`, `/dev/random`.
//!
//! These are the streams bound to the standard descriptors at table
//! construction, plus the handlers behind the always-registered device
//! paths.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::errors::{ControlError, ReadError, WriteError};
use crate::platform::{ConsoleChannel, ConsoleProvider, EntropyProvider};
use crate::stream::{
    ArcStream, FcntlCmd, FileStatus, FileType, Mode, NodeInfo, OFlags, PathHandler, Stream,
};
use crate::table::Fd;

const fn nz(n: usize) -> core::num::NonZeroUsize {
    match core::num::NonZeroUsize::new(n) {
        Some(v) => v,
        None => panic!("device numbers are nonzero"),
    }
}

const TERM_NODE: NodeInfo = NodeInfo {
    dev: 1,
    ino: 1,
    rdev: Some(nz(0x0500)),
};
const NULL_NODE: NodeInfo = NodeInfo {
    dev: 1,
    ino: 2,
    rdev: Some(nz(0x0103)),
};
const RANDOM_NODE: NodeInfo = NodeInfo {
    dev: 1,
    ino: 3,
    rdev: Some(nz(0x0108)),
};

fn char_device_status(node_info: NodeInfo) -> FileStatus {
    FileStatus {
        file_type: FileType::CharacterDevice,
        mode: Mode::RUSR | Mode::WUSR,
        size: 0,
        blksize: 0,
        node_info,
    }
}

/// Input buffered for the terminal, fed by the embedder.
///
/// Shared between the standard-input stream, any `/dev/tty` streams, and the
/// table (which feeds it and broadcasts readiness changes).
pub struct TermState {
    input: VecDeque<u8>,
    eof: bool,
}

impl TermState {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            eof: false,
        }
    }

    /// Append input bytes for readers to consume.
    pub fn push(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Mark end of input; readers drain what is buffered, then see
    /// end-of-stream.
    pub fn close_input(&mut self) {
        self.eof = true;
    }
}

impl Default for TermState {
    fn default() -> Self {
        Self::new()
    }
}

/// A terminal stream: reads drain the shared [`TermState`], writes go to a
/// host console channel.
///
/// Standard input is a read-only `TermStream` with no output channel;
/// standard output/error are write-only ones; `/dev/tty` is a read/write one
/// writing to the stdout channel.
pub struct TermStream<P: ConsoleProvider + Sync + 'static> {
    platform: &'static P,
    state: Arc<spin::Mutex<TermState>>,
    channel: Option<ConsoleChannel>,
    flags: spin::Mutex<OFlags>,
}

impl<P: ConsoleProvider + Sync + 'static> TermStream<P> {
    pub fn new(
        platform: &'static P,
        state: Arc<spin::Mutex<TermState>>,
        channel: Option<ConsoleChannel>,
        flags: OFlags,
    ) -> Self {
        Self {
            platform,
            state,
            channel,
            flags: spin::Mutex::new(flags),
        }
    }
}

impl<P: ConsoleProvider + Sync + 'static> Stream for TermStream<P> {
    fn read(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if !self.flags.lock().readable() {
            return Err(ReadError::NotForReading);
        }
        let mut state = self.state.lock();
        if state.input.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(ReadError::WouldBlock)
            };
        }
        let mut n = 0;
        while n < buf.len() {
            match state.input.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, WriteError> {
        if !self.flags.lock().writable() {
            return Err(WriteError::NotForWriting);
        }
        let Some(channel) = self.channel else {
            return Err(WriteError::NotForWriting);
        };
        self.platform
            .write_console(channel, buf)
            .map_err(|_| WriteError::Closed)
    }

    fn dup(self: Arc<Self>, _new_fd: Fd) -> Option<ArcStream> {
        Some(self)
    }

    fn status(&self) -> FileStatus {
        char_device_status(TERM_NODE)
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn fcntl(&self, cmd: FcntlCmd) -> Result<OFlags, ControlError> {
        let mut flags = self.flags.lock();
        match cmd {
            FcntlCmd::GetStatusFlags => {}
            FcntlCmd::SetStatusFlags(new) => {
                let mutable = OFlags::NONBLOCK | OFlags::APPEND;
                *flags = (*flags & !mutable) | (new & mutable);
            }
        }
        Ok(*flags)
    }

    fn read_ready(&self) -> bool {
        if !self.flags.lock().readable() {
            return false;
        }
        let state = self.state.lock();
        !state.input.is_empty() || state.eof
    }

    fn write_ready(&self) -> bool {
        self.flags.lock().writable() && self.channel.is_some()
    }
}

/// The bit bucket: reads are immediately end-of-stream, writes are accepted
/// and discarded.
pub struct NullStream {
    flags: spin::Mutex<OFlags>,
}

impl NullStream {
    pub fn new(flags: OFlags) -> Self {
        Self {
            flags: spin::Mutex::new(flags),
        }
    }
}

impl Stream for NullStream {
    fn read(&self, _buf: &mut [u8]) -> Result<usize, ReadError> {
        if !self.flags.lock().readable() {
            return Err(ReadError::NotForReading);
        }
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, WriteError> {
        if !self.flags.lock().writable() {
            return Err(WriteError::NotForWriting);
        }
        Ok(buf.len())
    }

    fn seek(
        &self,
        _offset: isize,
        _whence: crate::stream::SeekWhence,
    ) -> Result<usize, crate::errors::SeekError> {
        Ok(0)
    }

    fn dup(self: Arc<Self>, _new_fd: Fd) -> Option<ArcStream> {
        Some(self)
    }

    fn status(&self) -> FileStatus {
        char_device_status(NULL_NODE)
    }

    fn fcntl(&self, cmd: FcntlCmd) -> Result<OFlags, ControlError> {
        let mut flags = self.flags.lock();
        match cmd {
            FcntlCmd::GetStatusFlags => {}
            FcntlCmd::SetStatusFlags(new) => {
                let mutable = OFlags::NONBLOCK | OFlags::APPEND;
                *flags = (*flags & !mutable) | (new & mutable);
            }
        }
        Ok(*flags)
    }

    fn read_ready(&self) -> bool {
        true
    }

    fn write_ready(&self) -> bool {
        true
    }
}

/// An inexhaustible source of random bytes.
pub struct RandomStream<P: EntropyProvider + Sync + 'static> {
    platform: &'static P,
    flags: spin::Mutex<OFlags>,
}

impl<P: EntropyProvider + Sync + 'static> RandomStream<P> {
    pub fn new(platform: &'static P, flags: OFlags) -> Self {
        Self {
            platform,
            flags: spin::Mutex::new(flags),
        }
    }
}

impl<P: EntropyProvider + Sync + 'static> Stream for RandomStream<P> {
    fn read(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if !self.flags.lock().readable() {
            return Err(ReadError::NotForReading);
        }
        self.platform.fill_random_bytes(buf);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize, WriteError> {
        if !self.flags.lock().writable() {
            return Err(WriteError::NotForWriting);
        }
        // Writes "stir the pool": accepted and ignored.
        Ok(buf.len())
    }

    fn dup(self: Arc<Self>, _new_fd: Fd) -> Option<ArcStream> {
        Some(self)
    }

    fn status(&self) -> FileStatus {
        char_device_status(RANDOM_NODE)
    }

    fn read_ready(&self) -> bool {
        true
    }

    fn write_ready(&self) -> bool {
        true
    }
}

/// Handler behind `/dev/null`.
pub struct NullHandler;

impl PathHandler for NullHandler {
    fn open(&self, _fd: Fd, _path: &str, flags: OFlags) -> Option<ArcStream> {
        Some(Arc::new(NullStream::new(flags)))
    }

    fn stat(&self, _path: &str) -> Option<FileStatus> {
        Some(char_device_status(NULL_NODE))
    }
}

/// Handler behind `/dev/random`.
pub struct RandomHandler<P: EntropyProvider + Sync + 'static> {
    platform: &'static P,
}

impl<P: EntropyProvider + Sync + 'static> RandomHandler<P> {
    pub fn new(platform: &'static P) -> Self {
        Self { platform }
    }
}

impl<P: EntropyProvider + Sync + 'static> PathHandler for RandomHandler<P> {
    fn open(&self, _fd: Fd, _path: &str, flags: OFlags) -> Option<ArcStream> {
        Some(Arc::new(RandomStream::new(self.platform, flags)))
    }

    fn stat(&self, _path: &str) -> Option<FileStatus> {
        Some(char_device_status(RANDOM_NODE))
    }
}

/// Handler behind `/dev/tty`; opened streams share the table's terminal
/// input state and write to the stdout channel.
pub struct TtyHandler<P: ConsoleProvider + Sync + 'static> {
    platform: &'static P,
    state: Arc<spin::Mutex<TermState>>,
}

impl<P: ConsoleProvider + Sync + 'static> TtyHandler<P> {
    pub fn new(platform: &'static P, state: Arc<spin::Mutex<TermState>>) -> Self {
        Self { platform, state }
    }
}

impl<P: ConsoleProvider + Sync + 'static> PathHandler for TtyHandler<P> {
    fn open(&self, _fd: Fd, _path: &str, flags: OFlags) -> Option<ArcStream> {
        Some(Arc::new(TermStream::new(
            self.platform,
            Arc::clone(&self.state),
            Some(ConsoleChannel::Stdout),
            flags,
        )))
    }

    fn stat(&self, _path: &str) -> Option<FileStatus> {
        Some(char_device_status(TERM_NODE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    fn term_state() -> Arc<spin::Mutex<TermState>> {
        Arc::new(spin::Mutex::new(TermState::new()))
    }

    #[test]
    fn null_discards_and_eofs() {
        let null = NullStream::new(OFlags::RDWR);
        assert_eq!(null.write(b"vanishes"), Ok(8));
        let mut buf = [0u8; 8];
        assert_eq!(null.read(&mut buf), Ok(0));
        assert!(null.read_ready() && null.write_ready());
    }

    #[test]
    fn null_honors_access_mode() {
        let null = NullStream::new(OFlags::WRONLY);
        let mut buf = [0u8; 1];
        assert_eq!(null.read(&mut buf), Err(ReadError::NotForReading));
    }

    #[test]
    fn random_fills_whole_buffer() {
        let platform = MockPlatform::new();
        let random = RandomStream::new(platform, OFlags::RDONLY);
        let mut buf = [0u8; 32];
        assert_eq!(random.read(&mut buf), Ok(32));
        assert!(buf.iter().any(|b| *b != 0));
    }

    #[test]
    fn stdin_blocks_then_drains_then_eofs() {
        let platform = MockPlatform::new();
        let state = term_state();
        let stdin = TermStream::new(platform, Arc::clone(&state), None, OFlags::RDONLY);

        let mut buf = [0u8; 16];
        assert_eq!(stdin.read(&mut buf), Err(ReadError::WouldBlock));
        assert!(!stdin.read_ready());

        state.lock().push(b"hello");
        assert!(stdin.read_ready());
        assert_eq!(stdin.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");

        state.lock().close_input();
        assert_eq!(stdin.read(&mut buf), Ok(0));
        assert!(stdin.read_ready());
    }

    #[test]
    fn stdout_writes_to_console() {
        let platform = MockPlatform::new();
        let stdout = TermStream::new(
            platform,
            term_state(),
            Some(ConsoleChannel::Stdout),
            OFlags::WRONLY,
        );
        assert_eq!(stdout.write(b"out\n"), Ok(4));
        assert_eq!(platform.take_console(ConsoleChannel::Stdout), b"out\n");
        assert!(stdout.is_terminal());
    }

    #[test]
    fn fcntl_only_touches_mutable_flags() {
        let platform = MockPlatform::new();
        let stdin = TermStream::new(platform, term_state(), None, OFlags::RDONLY);
        let flags = stdin
            .fcntl(FcntlCmd::SetStatusFlags(OFlags::NONBLOCK | OFlags::WRONLY))
            .unwrap();
        assert!(flags.contains(OFlags::NONBLOCK));
        assert!(flags.readable());
        assert!(!flags.writable());
    }
}
