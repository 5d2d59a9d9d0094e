// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! The persistent-storage backend and the handler that fronts it.

use alloc::sync::Arc;

use crate::bridge::Completion;
use crate::stream::{ArcStream, FileStatus, OFlags, PathHandler};
use crate::table::Fd;

/// The persistent-storage service obtained through
/// [`StorageProvider::open_storage`](crate::platform::StorageProvider::open_storage).
///
/// Directory creation completes asynchronously through a [`Completion`]; the
/// remaining operations answer synchronously against whatever the backend
/// has already loaded.
pub trait StorageBackend {
    /// Begin creating the directory at `path`, delivering `true` on success.
    ///
    /// The completion must be delivered exactly once and never re-entrantly
    /// from within this call (see
    /// [`StorageProvider::open_storage`](crate::platform::StorageProvider::open_storage)).
    fn make_directory(&self, path: &str, completion: Completion<bool>);

    /// Produce a stream for the descriptor `fd` being opened on `path`, or
    /// `None` to refuse.
    fn open_file(&self, fd: Fd, path: &str, flags: OFlags) -> Option<ArcStream>;

    /// Answer a `stat` for `path` without opening it.
    fn stat(&self, path: &str) -> Option<FileStatus>;
}

/// A [`PathHandler`] delegating to the storage backend for one registered
/// path.
pub struct PersistentHandler<S: StorageBackend + Send + Sync + 'static> {
    storage: Arc<S>,
}

impl<S: StorageBackend + Send + Sync + 'static> PersistentHandler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

impl<S: StorageBackend + Send + Sync + 'static> PathHandler for PersistentHandler<S> {
    fn open(&self, fd: Fd, path: &str, flags: OFlags) -> Option<ArcStream> {
        self.storage.open_file(fd, path, flags)
    }

    fn stat(&self, path: &str) -> Option<FileStatus> {
        self.storage.stat(path)
    }
}
