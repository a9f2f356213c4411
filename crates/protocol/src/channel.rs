//! Named bounded channels for stage boundaries
//!
//! Every hop in the pipeline is a bounded MPMC channel. `Inlet` is the
//! sending half, shared behind an `Arc` so that "same channel" can be checked
//! by identity (`Arc::ptr_eq`). `Outlet` is the receiving half and may be
//! cloned so several workers drain one queue.
//!
//! Both halves share a small state block tracking queue depth, which the
//! monitor registry reads as `len` / `capacity`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossfire::{MAsyncRx, MAsyncTx, TrySendError};

/// Why a send did not go through; the item is handed back
#[derive(Debug, PartialEq, Eq)]
pub enum SendFailure<T> {
    /// Channel at capacity
    Full(T),
    /// All receivers dropped
    Closed(T),
}

impl<T> SendFailure<T> {
    /// Recover the item that was not sent
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    queued: AtomicUsize,
    sent: AtomicU64,
    rejected: AtomicU64,
}

/// Sending half of a named bounded channel
pub struct Inlet<T> {
    name: Arc<str>,
    tx: MAsyncTx<T>,
    capacity: usize,
    state: Arc<ChannelState>,
}

/// Receiving half of a named bounded channel
pub struct Outlet<T> {
    rx: MAsyncRx<T>,
    state: Arc<ChannelState>,
}

/// Create a bounded channel of `capacity` items
pub fn inlet<T: Unpin + Send + 'static>(
    name: impl Into<Arc<str>>,
    capacity: usize,
) -> (Arc<Inlet<T>>, Outlet<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossfire::mpmc::bounded_async::<T>(capacity);
    let state = Arc::new(ChannelState::default());
    let inlet = Inlet {
        name: name.into(),
        tx,
        capacity,
        state: Arc::clone(&state),
    };
    (Arc::new(inlet), Outlet { rx, state })
}

impl<T: Unpin + Send + 'static> Inlet<T> {
    /// Non-blocking send; hands the item back when full or closed
    #[inline]
    pub fn try_send(&self, item: T) -> Result<(), SendFailure<T>> {
        self.state.queued.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(item) {
            Ok(()) => {
                self.state.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.state.queued.fetch_sub(1, Ordering::Relaxed);
                self.state.rejected.fetch_add(1, Ordering::Relaxed);
                match e {
                    TrySendError::Full(item) => Err(SendFailure::Full(item)),
                    TrySendError::Disconnected(item) => Err(SendFailure::Closed(item)),
                }
            }
        }
    }

    /// Blocking send; waits for space. Returns the item if the channel is closed.
    pub async fn send(&self, item: T) -> Result<(), T> {
        self.state.queued.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(item).await {
            Ok(()) => {
                self.state.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.state.queued.fetch_sub(1, Ordering::Relaxed);
                Err(e.0)
            }
        }
    }
}

impl<T> Inlet<T> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items currently queued (approximate under contention)
    #[inline]
    pub fn len(&self) -> usize {
        self.state.queued.load(Ordering::Relaxed).min(self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items accepted since creation
    #[inline]
    pub fn sent(&self) -> u64 {
        self.state.sent.load(Ordering::Relaxed)
    }

    /// Total items rejected by `try_send`
    #[inline]
    pub fn rejected(&self) -> u64 {
        self.state.rejected.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Inlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inlet")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T: Unpin + Send + 'static> Outlet<T> {
    /// Wait for the next item; `None` once every inlet is dropped and the queue is empty
    pub async fn recv(&self) -> Option<T> {
        match self.rx.recv().await {
            Ok(item) => {
                self.state.queued.fetch_sub(1, Ordering::Relaxed);
                Some(item)
            }
            Err(_) => None,
        }
    }

    /// Take an item if one is immediately available
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.state.queued.fetch_sub(1, Ordering::Relaxed);
                Some(item)
            }
            Err(_) => None,
        }
    }

    /// Items currently queued (approximate under contention)
    #[inline]
    pub fn len(&self) -> usize {
        self.state.queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Unpin + Send + 'static> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outlet")
            .field("len", &self.state.queued.load(Ordering::Relaxed))
            .finish()
    }
}
