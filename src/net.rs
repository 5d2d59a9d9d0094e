// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Connected TCP sockets as streams.

use alloc::sync::Arc;

use crate::errors::{ControlError, ReadError, WriteError};
use crate::platform::{TcpConnection, TcpIoError};
use crate::stream::{ArcStream, FcntlCmd, FileStatus, FileType, Mode, NodeInfo, OFlags, Stream};
use crate::table::Fd;

/// A connected socket wrapping a platform [`TcpConnection`].
///
/// Created by the table's `connect` operation; until then a socket
/// descriptor has no stream at all.
pub struct SocketStream<C: TcpConnection + Send + Sync + 'static> {
    connection: C,
    fd: Fd,
    flags: spin::Mutex<OFlags>,
}

impl<C: TcpConnection + Send + Sync + 'static> SocketStream<C> {
    pub fn new(connection: C, fd: Fd) -> Self {
        Self {
            connection,
            fd,
            flags: spin::Mutex::new(OFlags::RDWR | OFlags::NONBLOCK),
        }
    }
}

impl<C: TcpConnection + Send + Sync + 'static> Stream for SocketStream<C> {
    fn read(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        match self.connection.receive(buf) {
            Ok(n) => Ok(n),
            Err(TcpIoError::WouldBlock) => Err(ReadError::WouldBlock),
            // A closed connection reads as end-of-stream.
            Err(TcpIoError::Closed) => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, WriteError> {
        match self.connection.send(buf) {
            Ok(n) => Ok(n),
            Err(TcpIoError::WouldBlock) => Err(WriteError::WouldBlock),
            Err(TcpIoError::Closed) => Err(WriteError::Closed),
        }
    }

    fn close(&self) {
        self.connection.close();
    }

    fn dup(self: Arc<Self>, _new_fd: Fd) -> Option<ArcStream> {
        Some(self)
    }

    fn status(&self) -> FileStatus {
        FileStatus {
            file_type: FileType::Socket,
            mode: Mode::RUSR | Mode::WUSR,
            size: 0,
            blksize: 0,
            node_info: NodeInfo {
                dev: 2,
                ino: self.fd.raw() as usize,
                rdev: None,
            },
        }
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
        self.connection.read_ready()
    }

    fn write_ready(&self) -> bool {
        self.connection.write_ready()
    }

    fn exception(&self) -> bool {
        self.connection.has_error()
    }
}
