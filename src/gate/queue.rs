//! Single-slot continuation queue.
//!
//! Work enqueued here is never run by the enqueuing thread. It waits in the
//! slot until a pumping thread takes it, so every continuation of a bridge
//! runs inside that bridge's pump loop and never anywhere else.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A unit of deferred work.
pub struct Continuation(Box<dyn FnOnce() + Send + 'static>);

impl Continuation {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Compose so that `self` runs before `next`.
    pub fn then(self, next: Continuation) -> Continuation {
        Continuation::new(move || {
            self.run();
            next.run();
        })
    }

    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation")
    }
}

struct Pending {
    chain: Continuation,
    len: usize,
}

type Listener = Box<dyn Fn() + Send + Sync + 'static>;

/// Holds at most one pending chain of continuations.
#[derive(Default)]
pub struct ContinuationQueue {
    slot: Mutex<Option<Pending>>,
    on_enqueue: Option<Listener>,
}

impl ContinuationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that calls `listener` after every enqueue.
    ///
    /// The listener runs on the enqueuing thread with the slot unlocked.
    pub fn with_listener<F>(listener: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            on_enqueue: Some(Box::new(listener)),
        }
    }

    /// Append work behind anything already pending, then signal.
    pub fn enqueue(&self, continuation: Continuation) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(match slot.take() {
                Some(pending) => Pending {
                    chain: pending.chain.then(continuation),
                    len: pending.len + 1,
                },
                None => Pending {
                    chain: continuation,
                    len: 1,
                },
            });
        }

        if let Some(listener) = &self.on_enqueue {
            listener();
        }
    }

    /// Remove the pending chain, if any.
    pub fn take_if_ready(&self) -> Option<Continuation> {
        self.take_with_len().map(|(chain, _)| chain)
    }

    /// Remove the pending chain along with the number of units composed into it.
    pub fn take_with_len(&self) -> Option<(Continuation, usize)> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|pending| (pending.chain, pending.len))
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |pending| pending.len)
    }
}

impl fmt::Debug for ContinuationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationQueue")
            .field("pending", &self.pending_len())
            .finish()
    }
}
