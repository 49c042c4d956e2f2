//! The workflow future and its waker.
//!
//! Waking the task never polls it. A wake enqueues one poll continuation on
//! the owning bridge, and the poll happens when some Driver thread pumps.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError, Weak};
use std::task::{Context, Poll, Wake, Waker};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::handle::WorkflowStatus;
use super::queue::Continuation;
use crate::error::Result;

/// Where a workflow task sends its continuations and reports its exit.
pub(crate) trait Schedule: Send + Sync {
    fn schedule(&self, continuation: Continuation);
    fn workflow_exited(&self, status: WorkflowStatus);
}

type WorkflowFuture = BoxFuture<'static, std::thread::Result<Result<()>>>;

pub(crate) struct WorkflowTask {
    future: Mutex<Option<WorkflowFuture>>,
    // Set while a poll continuation sits in the queue; collapses repeated wakes.
    scheduled: AtomicBool,
    scheduler: Weak<dyn Schedule>,
}

impl WorkflowTask {
    pub(crate) fn new<F>(future: F, scheduler: Weak<dyn Schedule>) -> Arc<Self>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Arc::new(Self {
            future: Mutex::new(Some(AssertUnwindSafe(future).catch_unwind().boxed())),
            scheduled: AtomicBool::new(false),
            scheduler,
        })
    }

    pub(crate) fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let task = Arc::clone(self);
        scheduler.schedule(Continuation::new(move || task.poll()));
    }

    fn poll(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);

        let (status, finished) = {
            let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(future) = slot.as_mut() else {
                return;
            };
            let waker = Waker::from(Arc::clone(&self));
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Pending => return,
                Poll::Ready(outcome) => (exit_status(outcome), slot.take()),
            }
        };
        drop(finished);

        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.workflow_exited(status);
        }
    }

    /// Drop the workflow future without reporting an exit.
    ///
    /// Skipped if the future is being polled right now.
    pub(crate) fn release(&self) {
        let future = match self.future.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => None,
        };
        drop(future);
    }
}

impl Wake for WorkflowTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl Drop for WorkflowTask {
    fn drop(&mut self) {
        // Nothing can wake a task whose last reference is going away, so a
        // future still pending here would leave the Driver blocked forever.
        let pending = self
            .future
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pending.is_none() {
            return;
        }
        drop(pending);
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.workflow_exited(WorkflowStatus::Abandoned);
        }
    }
}

fn exit_status(outcome: std::thread::Result<Result<()>>) -> WorkflowStatus {
    match outcome {
        Ok(Ok(())) => WorkflowStatus::Completed,
        Ok(Err(err)) => WorkflowStatus::Faulted(err.to_string()),
        Err(payload) => WorkflowStatus::Panicked(panic_message(payload.as_ref())),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
