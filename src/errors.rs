// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Errors produced by descriptor-table operations.
//!
//! Each operation gets its own error enum so that callers only ever match on
//! failures that operation can actually produce.

use thiserror::Error;

/// Possible errors for the open operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OpenError {
    #[error("no handler is registered for this path")]
    NoSuchEntry,
    #[error("the handler refused to open this path")]
    AccessDenied,
}

/// Possible errors for the close operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CloseError {
    #[error("file descriptor is not open")]
    BadDescriptor,
}

/// Possible errors for the read operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReadError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("file descriptor is not open for reading")]
    NotForReading,
    #[error("no data is available right now")]
    WouldBlock,
}

/// Possible errors for the write operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WriteError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("file descriptor is not open for writing")]
    NotForWriting,
    #[error("the stream cannot accept data right now")]
    WouldBlock,
    #[error("the stream has been closed")]
    Closed,
}

/// Possible errors for the seek operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SeekError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("the stream does not support seeking")]
    NonSeekable,
    #[error("the resulting offset would be invalid")]
    InvalidOffset,
}

/// Possible errors for the dup/dup2 operations
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DupError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("the stream refused to be duplicated")]
    AccessDenied,
}

/// Possible errors for the path-based stat operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StatError {
    #[error("no handler is registered for this path")]
    NoSuchEntry,
    #[error("the handler could not answer for this path")]
    BackendFailure,
}

/// Possible errors for the descriptor-based stat operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FstatError {
    #[error("file descriptor is not open")]
    BadDescriptor,
}

/// Possible errors for the directory-listing operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReadDirError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("the stream is not a directory")]
    NotADirectory,
}

/// Possible errors for the terminal query operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TerminalError {
    #[error("file descriptor is not open")]
    BadDescriptor,
}

/// Possible errors for the fcntl/ioctl operations
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControlError {
    #[error("file descriptor is not open")]
    BadDescriptor,
    #[error("the stream does not support this request")]
    Unsupported,
}

/// Possible errors for the readiness-multiplexing operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectError {
    #[error("a watched file descriptor is not open")]
    BadDescriptor,
}

/// Possible errors for the connect operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectError {
    #[error("file descriptor is not an unconnected socket")]
    BadDescriptor,
    #[error("the connection attempt was refused")]
    ConnectionRefused,
}

/// Possible errors for the directory-creation operation
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MkdirError {
    #[error("persistent storage is unavailable")]
    StorageUnavailable,
    #[error("the storage backend failed to create the directory")]
    Failed,
}
