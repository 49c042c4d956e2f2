//! One-shot outcome promises and Driver-reported faults.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{BoxError, Error, Result};
use crate::phase::Phase;

/// A failure reported by the Driver alongside a snapshot.
///
/// Faults that were already handled downstream do not fail the outcome; the
/// workflow sees the snapshot as if nothing went wrong.
#[derive(Debug, Clone)]
pub struct Fault {
    error: BoxError,
    handled: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Fault {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_shared(Arc::new(error))
    }

    pub fn from_shared(error: BoxError) -> Self {
        Self {
            error,
            handled: false,
        }
    }

    /// A fault carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub fn mark_handled(mut self) -> Self {
        self.handled = true;
        self
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn error(&self) -> &BoxError {
        &self.error
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.handled {
            write!(f, "{} (handled)", self.error)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

/// One-shot container for the outcome of a single phase boundary.
///
/// Settles once, with a snapshot or a failure. The settling half is handed
/// out by [`take_settler`](Self::take_settler) so the caller can deliver the
/// value after releasing whatever lock guards the promise: delivery wakes the
/// waiting workflow, and that wake schedules work on the bridge.
pub struct OutcomePromise<S> {
    phase: Phase,
    sender: Option<oneshot::Sender<Result<S>>>,
    receiver: Option<oneshot::Receiver<Result<S>>>,
}

impl<S> OutcomePromise<S> {
    pub fn new(phase: Phase) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            phase,
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_settled(&self) -> bool {
        self.sender.is_none()
    }

    pub fn is_subscribed(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn take_settler(&mut self) -> Result<Settler<S>> {
        match self.sender.take() {
            Some(sender) => Ok(Settler {
                phase: self.phase,
                sender,
            }),
            None => Err(Error::AlreadySettled { phase: self.phase }),
        }
    }

    /// The one future observing this promise.
    ///
    /// A second subscription gets a future that fails immediately.
    pub fn subscribe(&mut self) -> OutcomeFuture<S> {
        match self.receiver.take() {
            Some(receiver) => OutcomeFuture::waiting(self.phase, receiver),
            None => OutcomeFuture::failed(self.phase, Error::AlreadyRequested { phase: self.phase }),
        }
    }
}

impl<S> fmt::Debug for OutcomePromise<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomePromise")
            .field("phase", &self.phase)
            .field("settled", &self.is_settled())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// The settling half of an [`OutcomePromise`].
pub struct Settler<S> {
    phase: Phase,
    sender: oneshot::Sender<Result<S>>,
}

impl<S> Settler<S> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Settle from a Driver report: an unhandled fault fails the outcome,
    /// anything else resolves it with `snapshot`.
    ///
    /// Returns `false` when nobody is listening anymore.
    pub fn deliver(self, snapshot: S, fault: Option<Fault>) -> bool {
        match fault {
            Some(fault) if !fault.is_handled() => self.fail(fault.error),
            _ => self.succeed(snapshot),
        }
    }

    pub fn succeed(self, snapshot: S) -> bool {
        self.sender.send(Ok(snapshot)).is_ok()
    }

    pub fn fail(self, source: BoxError) -> bool {
        let phase = self.phase;
        self.sender.send(Err(Error::Upstream { phase, source })).is_ok()
    }
}

/// Resolves when the matching outcome settles.
pub struct OutcomeFuture<S> {
    phase: Phase,
    state: State<S>,
}

enum State<S> {
    Waiting(oneshot::Receiver<Result<S>>),
    Failed(Option<Error>),
}

impl<S> OutcomeFuture<S> {
    fn waiting(phase: Phase, receiver: oneshot::Receiver<Result<S>>) -> Self {
        Self {
            phase,
            state: State::Waiting(receiver),
        }
    }

    /// A future that resolves to `error` on first poll.
    pub(crate) fn failed(phase: Phase, error: Error) -> Self {
        Self {
            phase,
            state: State::Failed(Some(error)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl<S> Future for OutcomeFuture<S> {
    type Output = Result<S>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned { phase: this.phase })),
                Poll::Pending => Poll::Pending,
            },
            State::Failed(error) => match error.take() {
                Some(error) => Poll::Ready(Err(error)),
                None => panic!("OutcomeFuture polled after completion"),
            },
        }
    }
}

impl<S> fmt::Debug for OutcomeFuture<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Waiting(_) => "waiting",
            State::Failed(_) => "failed",
        };
        f.debug_struct("OutcomeFuture")
            .field("phase", &self.phase)
            .field("state", &state)
            .finish()
    }
}
