// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event channels with multi-subscriber fan-out.
//!
//! Backs `provider_available`/`provider_unavailable`, `agent_session_closed`,
//! `message_from_script`, and `message_from_debugger`. Each [`Signal<T>`] is a
//! thin wrapper over a broadcast channel: one producer, any number of
//! subscribers, in-order delivery per source.

use tokio::sync::broadcast;

/// Default channel capacity. Slow subscribers see `RecvError::Lagged` rather
/// than unbounded growth; callers that need strict delivery should drain
/// promptly.
const CAPACITY: usize = 256;

/// A multi-subscriber event source.
///
/// Cheap to clone: clones are handles to the same underlying channel, not
/// independent signals, which is what lets a callback closure capture one
/// by value instead of borrowing its owner.
#[derive(Debug)]
pub struct Signal<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Emit an event to all current subscribers. Returns the number of
    /// subscribers that received it (0 if nobody is listening — this is not
    /// an error; emission never fails the caller).
    pub fn emit(&self, value: T) -> usize {
        self.tx.send(value).unwrap_or(0)
    }

    /// Subscribe to future events. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
