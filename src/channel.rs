//! Bounded, closable FIFO used for the sensor -> worker handoff
//!
//! [`BoundedChannel`] is a single mutex guarding a `VecDeque` plus two
//! condition variables (`not_empty`, `not_full`). Producers block while the
//! queue is full, consumers block while it is empty, and both give up after
//! their timeout or as soon as the channel is closed.
//!
//! # Shutdown
//!
//! [`BoundedChannel::close`] rejects every later push but keeps the backlog:
//! consumers keep receiving buffered items until the queue is empty, and only
//! then does [`BoundedChannel::pop`] return `None` immediately. This lets the
//! pipeline drain to completion without any thread waiting forever.
//!
//! # Example
//!
//! ```
//! use reservoir_rs::channel::BoundedChannel;
//! use std::time::Duration;
//!
//! let channel = BoundedChannel::new(2);
//! assert!(channel.push(1, Duration::from_millis(10)).is_ok());
//! assert!(channel.push(2, Duration::from_millis(10)).is_ok());
//! // Full: times out and hands the item back
//! assert!(channel.push(3, Duration::from_millis(10)).is_err());
//!
//! channel.close();
//! assert_eq!(channel.pop(Duration::from_millis(10)), Some(1));
//! assert_eq!(channel.pop(Duration::from_millis(10)), Some(2));
//! assert_eq!(channel.pop(Duration::from_millis(10)), None);
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Why a push did not go through. The rejected item is handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError<T> {
    /// The channel stayed full for the whole timeout
    Timeout(T),
    /// The channel is closed
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the item that could not be pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Timeout(item) | PushError::Closed(item) => item,
        }
    }

    /// True if the push failed because the channel is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Timeout(_) => write!(f, "timed out waiting for channel capacity"),
            PushError::Closed(_) => write!(f, "channel closed"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

#[derive(Debug)]
struct ChannelState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity, thread-safe FIFO with blocking timeouts and close
#[derive(Debug)]
pub struct BoundedChannel<T> {
    state: Mutex<ChannelState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    // A panic while holding the lock cannot leave the queue half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an item, waiting up to `timeout` for free capacity
    ///
    /// Fails with [`PushError::Timeout`] if the channel stayed full, or
    /// [`PushError::Closed`] if it is (or becomes) closed while waiting.
    /// On success one waiting consumer is woken.
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let guard = self.lock();
        let (mut state, _) = self
            .not_full
            .wait_timeout_while(guard, timeout, |s| {
                !s.closed && s.queue.len() >= self.capacity
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.queue.len() >= self.capacity {
            return Err(PushError::Timeout(item));
        }

        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push without waiting
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, Duration::ZERO)
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout, and immediately once the channel is closed
    /// and drained.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |s| !s.closed && s.queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let item = state.queue.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.pop(Duration::ZERO)
    }

    /// Close the channel. Idempotent.
    ///
    /// Later pushes fail; buffered items can still be popped. Every blocked
    /// producer and consumer is woken.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!("Channel closed with {} buffered items", state.queue.len());
        }
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of buffered items right now (a snapshot, may be stale immediately)
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True if nothing is buffered right now
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// True if the buffer is at capacity right now
    pub fn is_full(&self) -> bool {
        self.lock().queue.len() >= self.capacity
    }

    /// True once [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True once the channel is closed and every buffered item has been taken
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.queue.is_empty()
    }

    /// Maximum number of buffered items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
