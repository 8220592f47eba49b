use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of offering an item to a [`ResponseBuffer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    /// Queued for the waiting caller.
    Queued,
    /// Nobody is awaiting a response; the item is handed back.
    NotAwaiting(T),
    /// The caller is awaiting but the queue is at capacity; the item is
    /// handed back to be dropped.
    Full(T),
}

/// Why a wait on a [`ResponseBuffer`] ended without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Deadline reached, or collapsed by [`ResponseBuffer::abort`].
    TimedOut,
    /// The buffer was closed.
    Closed,
}

struct Inner<T> {
    queue: VecDeque<T>,
    awaiting: bool,
    closed: bool,
    abort_epoch: u64,
}

/// Bounded single-consumer queue between the receive loop and one caller.
///
/// The "awaiting response" flag lives under the same lock as the queue, so
/// the receive loop's choice between queueing and handing an item back is
/// atomic with respect to the caller starting or ending a wait.
pub struct ResponseBuffer<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> ResponseBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(64)),
                awaiting: false,
                closed: false,
                abort_epoch: 0,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Start awaiting; anything left from an earlier exchange is discarded.
    ///
    /// The returned guard stops awaiting when dropped.
    pub fn begin(&self) -> AwaitGuard<'_, T> {
        let epoch = self.abort_epoch();
        self.begin_since(epoch)
    }

    /// [`begin`](Self::begin), but any abort after `epoch` collapses the
    /// wait at once.
    pub fn begin_since(&self, epoch: u64) -> AwaitGuard<'_, T> {
        let mut inner = self.lock();
        inner.queue.clear();
        inner.awaiting = true;
        drop(inner);
        AwaitGuard { buffer: self, epoch }
    }

    /// Count of [`abort`](Self::abort) calls so far.
    pub fn abort_epoch(&self) -> u64 {
        self.lock().abort_epoch
    }

    /// Producer side: queue `item` if a caller is awaiting.
    pub fn offer(&self, item: T) -> Offer<T> {
        let mut inner = self.lock();
        if !inner.awaiting || inner.closed {
            return Offer::NotAwaiting(item);
        }
        if inner.queue.len() >= self.capacity {
            return Offer::Full(item);
        }
        inner.queue.push_back(item);
        drop(inner);
        self.ready.notify_all();
        Offer::Queued
    }

    /// Wake every current waiter as if its deadline had passed.
    pub fn abort(&self) {
        self.lock().abort_epoch += 1;
        self.ready.notify_all();
    }

    /// Refuse further items and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.queue.clear();
        drop(inner);
        self.ready.notify_all();
    }

    /// Accept items again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_awaiting(&self) -> bool {
        self.lock().awaiting
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An open wait on a [`ResponseBuffer`].
pub struct AwaitGuard<'a, T> {
    buffer: &'a ResponseBuffer<T>,
    epoch: u64,
}

impl<T> AwaitGuard<'_, T> {
    /// Take the next item, blocking until `deadline`.
    pub fn next(&self, deadline: Instant) -> Result<T, WaitError> {
        let mut inner = self.buffer.lock();
        loop {
            if inner.closed {
                return Err(WaitError::Closed);
            }
            if let Some(item) = inner.queue.pop_front() {
                return Ok(item);
            }
            if inner.abort_epoch != self.epoch {
                return Err(WaitError::TimedOut);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::TimedOut);
            }
            inner = self
                .buffer
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// [`next`](Self::next) with a relative timeout.
    pub fn next_within(&self, timeout: Duration) -> Result<T, WaitError> {
        self.next(Instant::now() + timeout)
    }

    /// True once [`ResponseBuffer::abort`] has been called during this wait.
    pub fn aborted(&self) -> bool {
        self.buffer.lock().abort_epoch != self.epoch
    }
}

impl<T> Drop for AwaitGuard<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.buffer.lock();
        inner.awaiting = false;
        inner.queue.clear();
    }
}
