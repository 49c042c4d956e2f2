//! Per-request phase gate.
//!
//! A [`Bridge`] lets an asynchronous workflow sit "inside" four synchronous,
//! strictly ordered Driver calls. Each Driver call blocks its thread and
//! pumps the bridge's continuation queue until the workflow has allowed the
//! phase that call is waiting for.
//!
//! Continuations of a bridge run only inside that bridge's pump loop, on
//! whichever Driver thread is currently pumping. Since the protocol never
//! issues two Driver calls for one request at the same time, the workflow
//! never runs concurrently with itself and needs no locking of its own.
//!
//! There is no timeout: a workflow that never allows the demanded phase, and
//! never finishes, blocks the pumping Driver thread indefinitely.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use uuid::Uuid;

use super::handle::{WorkflowHandle, WorkflowStage, WorkflowStatus};
use super::promise::{Fault, OutcomeFuture, OutcomePromise, Settler};
use super::queue::{Continuation, ContinuationQueue};
use super::task::{panic_message, Schedule, WorkflowTask};
use crate::error::{Error, Result};
use crate::phase::Phase;
use crate::{plog_debug, plog_error, plog_trace, plog_warn};

/// Identifier used to tell bridges apart in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(Uuid);

impl BridgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Coordinates one request's workflow with its four Driver calls.
///
/// Cloning gives another handle to the same bridge.
pub struct Bridge<S> {
    inner: Arc<Inner<S>>,
}

pub(crate) struct Inner<S> {
    id: BridgeId,
    state: Mutex<GateState<S>>,
    // Signalled when the watermark rises and when work is enqueued.
    changed: Condvar,
    queue: ContinuationQueue,
}

struct GateState<S> {
    watermark: Phase,
    started: bool,
    last_requested: Phase,
    status: WorkflowStatus,
    entering: Option<S>,
    task: Weak<WorkflowTask>,
    action: OutcomePromise<S>,
    completion: OutcomePromise<S>,
    result: OutcomePromise<S>,
}

impl<S> GateState<S> {
    fn new() -> Self {
        Self {
            watermark: Phase::None,
            started: false,
            last_requested: Phase::None,
            status: WorkflowStatus::Pending,
            entering: None,
            task: Weak::new(),
            action: OutcomePromise::new(Phase::ExecuteAction),
            completion: OutcomePromise::new(Phase::BeginResultComprehension),
            result: OutcomePromise::new(Phase::ExecuteResult),
        }
    }

    /// The promise settled by the report that follows `phase`.
    fn promise_mut(&mut self, phase: Phase) -> Option<&mut OutcomePromise<S>> {
        match phase {
            Phase::ExecuteAction => Some(&mut self.action),
            Phase::BeginResultComprehension => Some(&mut self.completion),
            Phase::ExecuteResult => Some(&mut self.result),
            Phase::None | Phase::EndRequest => None,
        }
    }
}

impl<S: Clone + Send + 'static> Bridge<S> {
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<S>>| {
            let weak = Weak::clone(weak);
            Inner {
                id: BridgeId::new(),
                state: Mutex::new(GateState::new()),
                changed: Condvar::new(),
                queue: ContinuationQueue::with_listener(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.notify_enqueued();
                    }
                }),
            }
        });
        plog_debug!("bridge {} created", inner.id);
        Self { inner }
    }

    pub fn id(&self) -> BridgeId {
        self.inner.id
    }

    /// First Driver call: start the workflow (once) and block until it lets
    /// the action execute.
    ///
    /// `factory` is invoked only by the first `begin` on this bridge; later
    /// calls drop it and just pump. The workflow is not polled by the
    /// factory call itself. Its first poll is queued, so it runs inside the
    /// pump like every later resumption. Once the workflow returns, fails or
    /// panics, the watermark jumps to [`Phase::EndRequest`] and every Driver
    /// call returns immediately from then on.
    ///
    /// A panicking `factory` counts as a panicked workflow: the bridge is
    /// released the same way and this call returns [`Error::Workflow`].
    pub fn begin<F, Fut>(&self, entering: S, factory: F) -> Result<()>
    where
        F: FnOnce(WorkflowHandle<S>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let first = {
            let mut state = self.inner.lock_state();
            if state.started {
                false
            } else {
                state.started = true;
                state.status = WorkflowStatus::Running;
                state.entering = Some(entering.clone());
                true
            }
        };

        if first {
            plog_debug!("bridge {} starting workflow", self.inner.id);
            let handle = WorkflowHandle::new(Arc::downgrade(&self.inner), entering);
            let future = match panic::catch_unwind(AssertUnwindSafe(|| factory(handle))) {
                Ok(future) => future,
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    self.inner
                        .workflow_exited(WorkflowStatus::Panicked(msg.clone()));
                    return Err(Error::Workflow(format!("factory panicked: {msg}")));
                }
            };
            let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
            let scheduler: Weak<dyn Schedule> = weak;
            let task = WorkflowTask::new(future, scheduler);
            self.inner.lock_state().task = Arc::downgrade(&task);
            task.schedule();
        } else {
            plog_debug!(
                "bridge {} begin called again; workflow already started",
                self.inner.id
            );
        }

        self.inner.pump_until(Phase::ExecuteAction);
        Ok(())
    }

    /// Second Driver call: settle the action outcome and block until action
    /// processing may complete.
    ///
    /// An unhandled `fault` fails the workflow's pending
    /// `request_action_execution` instead of resolving it with `snapshot`.
    pub fn report_action_outcome(&self, snapshot: S, fault: Option<Fault>) -> Result<()> {
        self.inner.report(
            Phase::ExecuteAction,
            snapshot,
            fault,
            Phase::BeginResultComprehension,
        )
    }

    /// Third Driver call: settle the completion outcome and block until the
    /// result may execute. This boundary has no failure channel.
    pub fn report_completion_outcome(&self, snapshot: S) -> Result<()> {
        self.inner.report(
            Phase::BeginResultComprehension,
            snapshot,
            None,
            Phase::ExecuteResult,
        )
    }

    /// Fourth Driver call: settle the result outcome and block until the
    /// request may end.
    pub fn report_result_outcome(&self, snapshot: S, fault: Option<Fault>) -> Result<()> {
        self.inner
            .report(Phase::ExecuteResult, snapshot, fault, Phase::EndRequest)
    }

    /// Highest phase the workflow has allowed so far.
    pub fn watermark(&self) -> Phase {
        self.inner.lock_state().watermark
    }

    pub fn status(&self) -> WorkflowStatus {
        self.inner.lock_state().status.clone()
    }

    pub fn stage(&self) -> WorkflowStage {
        self.inner.stage()
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock_state().started
    }

    /// Snapshot passed to the first `begin`.
    pub fn entering(&self) -> Option<S> {
        self.inner.lock_state().entering.clone()
    }

    /// Continuations waiting for the next pump.
    pub fn pending_continuations(&self) -> usize {
        self.inner.queue.pending_len()
    }
}

impl<S: Clone + Send + 'static> Default for Bridge<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for Bridge<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for Bridge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Bridge")
            .field("id", &self.inner.id)
            .field("watermark", &state.watermark)
            .field("status", &state.status)
            .finish()
    }
}

impl<S> Inner<S> {
    fn lock_state(&self) -> MutexGuard<'_, GateState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run queued continuations on the calling thread until the watermark
    /// reaches `demanded`.
    ///
    /// Returns as soon as the phase is reached, even with work still queued;
    /// a later pump drains it.
    fn pump_until(&self, demanded: Phase) {
        let mut state = self.lock_state();
        let mut rounds = 0usize;
        loop {
            if state.watermark >= demanded {
                plog_trace!(
                    "bridge {} reached {} (watermark {}, {} round(s))",
                    self.id,
                    demanded,
                    state.watermark,
                    rounds
                );
                return;
            }

            if let Some((continuation, len)) = self.queue.take_with_len() {
                drop(state);
                rounds += 1;
                plog_trace!(
                    "bridge {} running {} continuation(s) while waiting for {}",
                    self.id,
                    len,
                    demanded
                );
                continuation.run();
                state = self.lock_state();
                continue;
            }

            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn raise(&self, state: &mut GateState<S>, phase: Phase) {
        if phase > state.watermark {
            plog_trace!("bridge {} watermark {} -> {}", self.id, state.watermark, phase);
            state.watermark = phase;
            self.changed.notify_all();
        }
    }

    fn notify_enqueued(&self) {
        // Taking the lock orders this after any pump that just found the
        // queue empty and is about to wait.
        let _state = self.lock_state();
        self.changed.notify_all();
    }

    fn report(
        &self,
        boundary: Phase,
        snapshot: S,
        fault: Option<Fault>,
        demanded: Phase,
    ) -> Result<()> {
        let settler: Result<Settler<S>> = {
            let mut state = self.lock_state();
            if !state.started {
                Err(Error::NotStarted)
            } else {
                match state.promise_mut(boundary) {
                    Some(promise) => promise.take_settler(),
                    None => Err(Error::Validation(format!("{boundary} has no outcome"))),
                }
            }
        };
        let settler = settler.inspect_err(|err| {
            plog_warn!("bridge {} rejected report for {}: {}", self.id, boundary, err);
        })?;

        match &fault {
            Some(fault) if !fault.is_handled() => {
                plog_debug!("bridge {} failing {} outcome: {}", self.id, boundary, fault)
            }
            _ => plog_debug!("bridge {} settling {} outcome", self.id, boundary),
        }

        // Delivery wakes the workflow, which enqueues onto this bridge and
        // takes the state lock; it must happen unlocked.
        if !settler.deliver(snapshot, fault) {
            plog_trace!("bridge {} {} outcome has no listener", self.id, boundary);
        }

        self.pump_until(demanded);
        Ok(())
    }

    pub(crate) fn request(&self, phase: Phase) -> OutcomeFuture<S> {
        let mut state = self.lock_state();
        let last = state.last_requested;
        if phase <= last {
            let error = if phase == last {
                Error::AlreadyRequested { phase }
            } else {
                Error::OutOfOrder {
                    requested: phase,
                    last,
                }
            };
            plog_warn!("bridge {} rejected request: {}", self.id, error);
            return OutcomeFuture::failed(phase, error);
        }

        let future = match state.promise_mut(phase) {
            Some(promise) => promise.subscribe(),
            None => {
                return OutcomeFuture::failed(
                    phase,
                    Error::Validation(format!("{phase} has no outcome")),
                )
            }
        };
        state.last_requested = phase;
        self.raise(&mut state, phase);
        future
    }

    pub(crate) fn stage(&self) -> WorkflowStage {
        let state = self.lock_state();
        if !state.started {
            return WorkflowStage::NotStarted;
        }
        WorkflowStage::from_progress(state.last_requested, &state.status)
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        // A workflow still waiting on an outcome holds a waker that points
        // back at its own task; drop the future to break that cycle.
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.task.upgrade() {
            plog_debug!("bridge {} dropped with workflow {}", self.id, state.status);
            task.release();
        }
    }
}

impl<S: Send> Schedule for Inner<S> {
    fn schedule(&self, continuation: Continuation) {
        self.queue.enqueue(continuation);
    }

    fn workflow_exited(&self, status: WorkflowStatus) {
        let mut state = self.lock_state();
        match &status {
            WorkflowStatus::Completed => plog_debug!("bridge {} workflow completed", self.id),
            WorkflowStatus::Panicked(msg) => {
                plog_error!("bridge {} workflow panicked: {}", self.id, msg)
            }
            other => plog_warn!("bridge {} workflow exited: {}", self.id, other),
        }
        if !state.status.is_finished() {
            state.status = status;
        }
        self.raise(&mut state, Phase::EndRequest);
    }
}
