//! Driver side: a filter whose four protocol hooks feed a per-request bridge.
//!
//! The host calls the hooks in order, once per request, possibly from
//! different threads, passing the request's [`RequestScope`]. The first hook
//! to touch a request creates its [`Bridge`] under this filter's key.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::gate::{Bridge, Fault, WorkflowHandle};
use crate::scope::{FilterKey, RequestScope};
use crate::{plog_debug, Result};

/// The asynchronous logic run once per request.
///
/// Implemented for any `Fn(WorkflowHandle<S>) -> impl Future<Output = Result<()>>`.
pub trait Workflow<S>: Send + Sync + 'static {
    fn on_request(&self, handle: WorkflowHandle<S>) -> BoxFuture<'static, Result<()>>;
}

impl<S, F, Fut> Workflow<S> for F
where
    F: Fn(WorkflowHandle<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn on_request(&self, handle: WorkflowHandle<S>) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(handle))
    }
}

/// One filter instance with its own identity and workflow.
pub struct AsyncFilter<S, W> {
    key: FilterKey,
    workflow: Arc<W>,
    _snapshot: PhantomData<fn(S)>,
}

impl<S, W> AsyncFilter<S, W>
where
    S: Clone + Send + 'static,
    W: Workflow<S>,
{
    pub fn new(workflow: W) -> Self {
        let key = FilterKey::new();
        plog_debug!("filter {} created", key.short());
        Self {
            key,
            workflow: Arc::new(workflow),
            _snapshot: PhantomData,
        }
    }

    pub fn key(&self) -> FilterKey {
        self.key
    }

    /// This filter's bridge for the request, created on first contact.
    pub fn bridge(&self, scope: &RequestScope) -> Result<Bridge<S>> {
        scope.get_or_insert_with(self.key, Bridge::new)
    }

    /// Hook 1: start the workflow; returns once it lets the action run.
    pub fn begin(&self, scope: &RequestScope, snapshot: S) -> Result<()> {
        let workflow = Arc::clone(&self.workflow);
        self.bridge(scope)?
            .begin(snapshot, move |handle| workflow.on_request(handle))
    }

    /// Hook 2: the action ran; `fault` is its error, if any.
    pub fn report_action_outcome(
        &self,
        scope: &RequestScope,
        snapshot: S,
        fault: Option<Fault>,
    ) -> Result<()> {
        self.bridge(scope)?.report_action_outcome(snapshot, fault)
    }

    /// Hook 3: every action filter has finished.
    pub fn report_completion_outcome(&self, scope: &RequestScope, snapshot: S) -> Result<()> {
        self.bridge(scope)?.report_completion_outcome(snapshot)
    }

    /// Hook 4: the result ran; `fault` is its error, if any.
    pub fn report_result_outcome(
        &self,
        scope: &RequestScope,
        snapshot: S,
        fault: Option<Fault>,
    ) -> Result<()> {
        self.bridge(scope)?.report_result_outcome(snapshot, fault)
    }
}

impl<S, F, Fut> AsyncFilter<S, F>
where
    S: Clone + Send + 'static,
    F: Fn(WorkflowHandle<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Build a filter from a closure, letting the compiler see the
    /// workflow's output type while checking the closure body.
    pub fn from_fn(workflow: F) -> Self {
        Self::new(workflow)
    }
}

impl<S, W> std::fmt::Debug for AsyncFilter<S, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFilter").field("key", &self.key).finish()
    }
}
