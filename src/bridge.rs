// Copyright (c) The fdmux Authors.
// Licensed under the MIT license.

//! Bridging callback-completed subsystems into synchronous call semantics.
//!
//! Some platform services (persistent storage, notably) deliver their results
//! through one-shot callbacks on an arbitrary thread. The table turns such an
//! operation into a blocking call by pairing a [`ResultCell`] with a
//! [`Completion`] that stores into the cell and then pokes the table's
//! condition variable; the calling thread loops on the cell under the monitor
//! lock.

use alloc::boxed::Box;
use alloc::sync::Arc;

/// A one-shot callback carrying a result of type `T`.
///
/// Completions built by the descriptor table take the monitor lock and
/// broadcast on its condition variable after storing the result, so a
/// backend must never invoke one re-entrantly from a call made while that
/// lock is held.
pub struct Completion<T> {
    deliver: Box<dyn FnOnce(T) + Send>,
}

impl<T> Completion<T> {
    pub fn new(deliver: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Deliver the result. Consumes the completion; it cannot fire twice.
    pub fn complete(self, value: T) {
        (self.deliver)(value);
    }
}

/// A shared slot a [`Completion`] stores into and a blocked caller drains.
pub struct ResultCell<T> {
    slot: spin::Mutex<Option<T>>,
}

impl<T> ResultCell<T> {
    /// An empty cell, shared between the waiter and the completion.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: spin::Mutex::new(None),
        })
    }

    /// Store the result. Panics if a result was already stored; completions
    /// fire exactly once.
    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock();
        assert!(slot.is_none(), "completion delivered twice");
        *slot = Some(value);
    }

    /// Drain the result, if one has been stored.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}
