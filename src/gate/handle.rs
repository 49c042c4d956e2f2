//! The capability handed to an asynchronous workflow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};

use super::bridge::Inner;
use super::promise::OutcomeFuture;
use crate::error::Error;
use crate::phase::Phase;

/// Lifecycle of the workflow task owned by a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum WorkflowStatus {
    /// `begin` has not created the workflow yet
    #[default]
    Pending,
    /// Created and not yet finished
    Running,
    /// Returned `Ok`
    Completed,
    /// Returned an error
    Faulted(String),
    /// Panicked while being polled
    Panicked(String),
    /// Dropped while still pending, with nothing left to wake it
    Abandoned,
}

impl WorkflowStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Faulted(msg) => write!(f, "faulted: {msg}"),
            WorkflowStatus::Panicked(msg) => write!(f, "panicked: {msg}"),
            WorkflowStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Where the workflow stands from its own point of view.
///
/// Only the workflow moves this forward, by requesting the next boundary.
/// A caught failure does not end it; finishing or failing out of the body
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    NotStarted,
    AwaitingActionOutcome,
    AwaitingCompletionOutcome,
    AwaitingResultOutcome,
    Done,
}

impl WorkflowStage {
    pub(crate) fn from_progress(last_requested: Phase, status: &WorkflowStatus) -> Self {
        if status.is_finished() {
            return WorkflowStage::Done;
        }
        match last_requested {
            Phase::None => WorkflowStage::NotStarted,
            Phase::ExecuteAction => WorkflowStage::AwaitingActionOutcome,
            Phase::BeginResultComprehension => WorkflowStage::AwaitingCompletionOutcome,
            Phase::ExecuteResult => WorkflowStage::AwaitingResultOutcome,
            Phase::EndRequest => WorkflowStage::Done,
        }
    }
}

/// Passed to the workflow when its bridge creates it.
///
/// Each `request_*` call lets the Driver get past one more boundary and
/// returns a future for the outcome the Driver reports there. Requests must
/// move forward: asking for the same boundary twice, or for an earlier one,
/// yields a future that fails with a protocol-misuse error.
///
/// Skipping forward is part of the protocol. Requesting a later boundary
/// lets the Driver straight past every earlier one. The reports for the
/// skipped boundaries still succeed, but their outcomes are never
/// observed. Futures returned by earlier requests stay valid and resolve
/// when their own report arrives.
///
/// The handle holds the bridge weakly. Once the request is torn down every
/// request fails with [`Error::Abandoned`].
pub struct WorkflowHandle<S> {
    bridge: Weak<Inner<S>>,
    entering: S,
}

impl<S: Clone + Send + 'static> WorkflowHandle<S> {
    pub(crate) fn new(bridge: Weak<Inner<S>>, entering: S) -> Self {
        Self { bridge, entering }
    }

    /// Snapshot the Driver passed to `begin`.
    pub fn entering(&self) -> &S {
        &self.entering
    }

    /// Let the action run; resolves with the snapshot from `report_action_outcome`.
    pub fn request_action_execution(&self) -> OutcomeFuture<S> {
        self.request(Phase::ExecuteAction)
    }

    /// Let action processing finish; resolves with the snapshot from
    /// `report_completion_outcome`. This boundary never fails upstream.
    pub fn request_completion_of_action_processing(&self) -> OutcomeFuture<S> {
        self.request(Phase::BeginResultComprehension)
    }

    /// Let the result run; resolves with the snapshot from `report_result_outcome`.
    pub fn request_result_execution(&self) -> OutcomeFuture<S> {
        self.request(Phase::ExecuteResult)
    }

    /// Give up the pump once; the workflow resumes on the next pump iteration.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    pub fn stage(&self) -> WorkflowStage {
        match self.bridge.upgrade() {
            Some(inner) => inner.stage(),
            None => WorkflowStage::Done,
        }
    }

    fn request(&self, phase: Phase) -> OutcomeFuture<S> {
        match self.bridge.upgrade() {
            Some(inner) => inner.request(phase),
            None => OutcomeFuture::failed(phase, Error::Abandoned { phase }),
        }
    }
}

impl<S: Clone> Clone for WorkflowHandle<S> {
    fn clone(&self) -> Self {
        Self {
            bridge: Weak::clone(&self.bridge),
            entering: self.entering.clone(),
        }
    }
}

impl<S> std::fmt::Debug for WorkflowHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("attached", &(self.bridge.strong_count() > 0))
            .finish()
    }
}

/// Future returned by [`WorkflowHandle::yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
