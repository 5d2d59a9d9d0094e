// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! The polymorphic stream capability behind every descriptor.

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use core::ffi::c_uint;
use core::num::NonZeroUsize;

use crate::errors::{ControlError, ReadDirError, ReadError, SeekError, WriteError};
use crate::table::Fd;

/// A reference-counted handle to an open resource.
///
/// The descriptor table owns one reference per bound descriptor; `dup`/`dup2`
/// add references to the same underlying resource rather than cloning state.
pub type ArcStream = Arc<dyn Stream>;

/// The capability every backend handle implements.
///
/// All operations are invoked under the table's monitor lock, and none of
/// them may block: the readiness predicates in particular are consumed by the
/// readiness multiplexer, which must evaluate them while holding the lock.
pub trait Stream: Send + Sync {
    /// Read into `buf`, returning the number of bytes read (zero is
    /// end-of-stream).
    fn read(&self, buf: &mut [u8]) -> Result<usize, ReadError>;

    /// Write from `buf`, returning the number of bytes accepted.
    fn write(&self, buf: &[u8]) -> Result<usize, WriteError>;

    /// Reposition the stream offset. Returns the resulting offset.
    fn seek(&self, _offset: isize, _whence: SeekWhence) -> Result<usize, SeekError> {
        Err(SeekError::NonSeekable)
    }

    /// Backend-specific teardown.
    ///
    /// Invoked by the table exactly once, when the last descriptor
    /// referencing this handle is closed.
    fn close(&self) {}

    /// Produce a duplicate handle bound to `new_fd`.
    ///
    /// The duplicate shares the same underlying resource (a reference
    /// increment), not an independent copy. Returning `None` refuses the
    /// duplication.
    fn dup(self: Arc<Self>, new_fd: Fd) -> Option<ArcStream>;

    /// The status of the resource behind this handle (`fstat`).
    fn status(&self) -> FileStatus;

    /// Read directory entries (`getdents`).
    fn read_dir(&self) -> Result<Vec<DirEntry>, ReadDirError> {
        Err(ReadDirError::NotADirectory)
    }

    /// Whether this stream is a terminal device (`isatty`).
    fn is_terminal(&self) -> bool {
        false
    }

    /// Manipulate the stream's status flags (`fcntl`). Returns the resulting
    /// flags.
    fn fcntl(&self, _cmd: FcntlCmd) -> Result<OFlags, ControlError> {
        Err(ControlError::Unsupported)
    }

    /// Backend-specific control requests (`ioctl`).
    fn ioctl(&self, _request: u32) -> Result<(), ControlError> {
        Err(ControlError::Unsupported)
    }

    /// Whether a `read` would make progress without blocking.
    fn read_ready(&self) -> bool;

    /// Whether a `write` would make progress without blocking.
    fn write_ready(&self) -> bool;

    /// Whether the stream is in an exceptional condition.
    fn exception(&self) -> bool {
        false
    }
}

/// A factory bound to one exact path string, producing [`Stream`]s on open
/// and answering stat queries.
///
/// Handlers are registered once at startup-equivalent time and never removed
/// or replaced.
pub trait PathHandler: Send + Sync {
    /// Produce a stream for the descriptor `fd` being opened on `path`.
    ///
    /// Returning `None` refuses the open; the table reports this as an
    /// access-denied failure and releases the reserved descriptor.
    fn open(&self, fd: Fd, path: &str, flags: OFlags) -> Option<ArcStream>;

    /// Answer a `stat` for `path` without opening it. Returning `None`
    /// indicates the handler cannot answer (a generic backend failure).
    fn stat(&self, path: &str) -> Option<FileStatus>;
}

bitflags! {
    /// `O_*` constants for use with open, trimmed to the flags this crate
    /// interprets.
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct OFlags: c_uint {
        /// `O_RDONLY`: read-only
        const RDONLY = 0x0;
        /// `O_WRONLY`: write-only
        const WRONLY = 0x1;
        /// `O_RDWR`: read/write.
        ///
        /// This is not equal to `RDONLY | WRONLY`. It's a distinct flag.
        const RDWR = 0x2;
        /// `O_CREAT`: if path does not exist, create it as a regular file
        const CREAT = 0x40;
        /// `O_TRUNC`: truncate the file to zero length
        const TRUNC = 0x200;
        /// `O_APPEND`: append mode
        const APPEND = 0x400;
        /// `O_NONBLOCK`: non-blocking mode
        const NONBLOCK = 0x800;
        /// <https://docs.rs/bitflags/*/bitflags/#externally-defined-flags>
        const _ = !0;

        /// Mask extracting the access mode out of a set of flags
        const ACCMODE = 0x3;
    }
}

impl OFlags {
    /// Whether this access mode permits reading.
    pub fn readable(self) -> bool {
        let mode = self & OFlags::ACCMODE;
        mode == OFlags::RDONLY || mode == OFlags::RDWR
    }

    /// Whether this access mode permits writing.
    pub fn writable(self) -> bool {
        let mode = self & OFlags::ACCMODE;
        mode == OFlags::WRONLY || mode == OFlags::RDWR
    }
}

bitflags! {
    /// `S_I*` permission constants reported by `stat`.
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct Mode: c_uint {
        /// `S_IRUSR`: user has read permission
        const RUSR = 0o00400;
        /// `S_IWUSR`: user has write permission
        const WUSR = 0o00200;
        /// `S_IRGRP`: group has read permission
        const RGRP = 0o00040;
        /// `S_IWGRP`: group has write permission
        const WGRP = 0o00020;
        /// `S_IROTH`: others have read permission
        const ROTH = 0o00004;
        /// `S_IWOTH`: others have write permission
        const WOTH = 0o00002;
        /// <https://docs.rs/bitflags/*/bitflags/#externally-defined-flags>
        const _ = !0;
    }
}

/// The `whence` directive to [`Stream::seek`]
pub enum SeekWhence {
    /// The stream offset is set to `offset` bytes.
    RelativeToBeginning,
    /// The stream offset is set to its current location plus `offset` bytes.
    RelativeToCurrentOffset,
    /// The stream offset is set to the size of the resource plus `offset`
    /// bytes.
    RelativeToEnd,
}

/// Commands accepted by [`Stream::fcntl`].
#[non_exhaustive]
pub enum FcntlCmd {
    /// `F_GETFL`: report the current status flags.
    GetStatusFlags,
    /// `F_SETFL`: replace the mutable status flags (only `NONBLOCK` and
    /// `APPEND` are honored; access-mode bits are ignored).
    SetStatusFlags(OFlags),
}

/// Types of resources behind a descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum FileType {
    RegularFile,
    Directory,
    CharacterDevice,
    Socket,
}

/// The status of a resource, inspired by `stat(3type)`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct FileStatus {
    /// Resource type
    pub file_type: FileType,
    /// Permissions for the resource
    pub mode: Mode,
    /// Size in bytes. Informative only for regular files.
    pub size: usize,
    /// Block size for I/O
    pub blksize: usize,
    /// Information about this particular node
    pub node_info: NodeInfo,
}

/// Device/Inode information
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct NodeInfo {
    /// Device number
    pub dev: usize,
    /// Inode number
    pub ino: usize,
    /// Device that is being referred to (will be `Some(...)` only if special file)
    pub rdev: Option<NonZeroUsize>,
}

/// Directory entries returned by [`Stream::read_dir`]
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct DirEntry {
    pub name: alloc::string::String,
    pub file_type: FileType,
}
