//! Diagnostic request pipeline.
//!
//! Pushes simulated requests through an [`AsyncFilter`] the way a host
//! would: every hook call is handed to a pool of host threads, so the four
//! calls of one request may each run on a different thread. The workflow
//! loads "view data" on a helper thread while the action finishes and writes
//! it into the result snapshot, and the report records whether the Driver
//! saw that write.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::filter::{AsyncFilter, Workflow};
use crate::gate::{Fault, WorkflowHandle, WorkflowStatus};
use crate::phase::Phase;
use crate::scope::RequestScope;
use crate::snapshot::Shared;
use crate::{plog, plog_debug, plog_warn, Error, Result};

const DEFAULT_FETCH_DELAY_MS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationOptions {
    pub requests: usize,
    pub host_threads: usize,
    /// Report an action failure on every request.
    pub fail_action: bool,
    /// Report a result failure on every request.
    pub fail_result: bool,
    /// Mark reported failures as already handled.
    pub handled: bool,
    pub fetch_delay_ms: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl SimulationOptions {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            requests: config.requests,
            host_threads: config.host_threads,
            fail_action: false,
            fail_result: false,
            handled: false,
            fetch_delay_ms: DEFAULT_FETCH_DELAY_MS,
        }
    }

    fn fault(&self, enabled: bool, message: &str) -> Option<Fault> {
        if !enabled {
            return None;
        }
        let fault = Fault::msg(message);
        Some(if self.handled {
            fault.mark_handled()
        } else {
            fault
        })
    }
}

/// Snapshot handed between the simulated host and the workflow.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request: usize,
    pub stage: String,
    pub view_data: Option<String>,
    journal: Shared<Vec<String>>,
}

impl RequestContext {
    fn note(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }
}

pub type Snapshot = Shared<RequestContext>;

#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub request: usize,
    pub bridge: String,
    pub watermark: Phase,
    pub status: WorkflowStatus,
    /// Thread that ran each of the four hook calls, in order.
    pub hook_threads: Vec<String>,
    pub view_data_visible: bool,
    pub journal: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub options: SimulationOptions,
    pub requests: Vec<RequestReport>,
}

impl SimulationReport {
    pub fn all_completed(&self) -> bool {
        self.requests
            .iter()
            .all(|r| r.watermark == Phase::EndRequest && r.status == WorkflowStatus::Completed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Workflow that overlaps a slow lookup with the rest of action processing.
struct ViewDataWorkflow {
    fetch_delay: Duration,
}

impl Workflow<Snapshot> for ViewDataWorkflow {
    fn on_request(&self, handle: WorkflowHandle<Snapshot>) -> BoxFuture<'static, Result<()>> {
        let delay = self.fetch_delay;
        async move {
            let entering = handle.entering().get();
            entering.note("workflow: action has not run yet");

            match handle.request_action_execution().await {
                Ok(_) => entering.note("workflow: action completed"),
                Err(err) => entering.note(format!("workflow: action failed: {err}")),
            }

            let request = entering.request;
            let lookup = fetch_view_data(request, delay);

            let executing = handle.request_completion_of_action_processing().await?;
            entering.note("workflow: action filters done");

            match lookup.await {
                Ok(data) => executing.lock().view_data = Some(data),
                Err(_) => entering.note("workflow: view data lookup dropped"),
            }

            match handle.request_result_execution().await {
                Ok(_) => entering.note("workflow: result complete"),
                Err(err) => entering.note(format!("workflow: result failed: {err}")),
            }
            Ok(())
        }
        .boxed()
    }
}

fn fetch_view_data(request: usize, delay: Duration) -> oneshot::Receiver<String> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        thread::sleep(delay);
        if tx.send(format!("view data for request {request}")).is_err() {
            plog_debug!("request {} stopped waiting for its view data", request);
        }
    });
    rx
}

type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads that execute hook calls in arrival order.
struct HostPool {
    jobs: Sender<HostJob>,
    workers: Vec<JoinHandle<()>>,
}

impl HostPool {
    fn new(threads: usize) -> Result<Self> {
        let (jobs, queue) = unbounded::<HostJob>();
        let workers = (0..threads)
            .map(|i| {
                let queue = queue.clone();
                thread::Builder::new()
                    .name(format!("host-{i}"))
                    .spawn(move || {
                        while let Ok(job) = queue.recv() {
                            job();
                        }
                    })
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { jobs, workers })
    }

    /// Run `f` on some host thread and wait for its result.
    fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done, result) = bounded(1);
        self.jobs
            .send(Box::new(move || {
                if done.send(f()).is_err() {
                    plog_debug!("host call finished after its caller went away");
                }
            }))
            .map_err(|_| Error::HostClosed)?;
        result.recv().map_err(|_| Error::HostClosed)
    }

    /// Stop accepting jobs and join every worker. Returns how many of them
    /// died from a panicking job.
    fn shutdown(self) -> usize {
        drop(self.jobs);
        let mut panicked = 0;
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("unnamed").to_string();
            if worker.join().is_err() {
                plog_warn!("host thread {} exited by panic", name);
                panicked += 1;
            }
        }
        panicked
    }
}

type SimFilter = AsyncFilter<Snapshot, ViewDataWorkflow>;

fn dispatch<F>(
    pool: &HostPool,
    filter: &Arc<SimFilter>,
    scope: &Arc<RequestScope>,
    hook: F,
) -> Result<String>
where
    F: FnOnce(&SimFilter, &RequestScope) -> Result<()> + Send + 'static,
{
    let filter = Arc::clone(filter);
    let scope = Arc::clone(scope);
    pool.call(move || {
        hook(&filter, &scope)?;
        Ok(thread::current().name().unwrap_or("unnamed").to_string())
    })?
}

fn drive_request(
    pool: &HostPool,
    filter: &Arc<SimFilter>,
    request: usize,
    options: &SimulationOptions,
) -> Result<RequestReport> {
    let scope = Arc::new(RequestScope::new());
    let journal = Shared::new(Vec::new());
    let snapshot = |stage: &str| {
        Shared::new(RequestContext {
            request,
            stage: stage.to_string(),
            view_data: None,
            journal: journal.clone(),
        })
    };
    let mut hook_threads = Vec::with_capacity(4);

    let entering = snapshot("action_executing");
    hook_threads.push(dispatch(pool, filter, &scope, move |f, s| {
        f.begin(s, entering)
    })?);

    let executed = snapshot("action_executed");
    let fault = options.fault(options.fail_action, "action failed");
    hook_threads.push(dispatch(pool, filter, &scope, move |f, s| {
        f.report_action_outcome(s, executed, fault)
    })?);

    let executing = snapshot("result_executing");
    let observed = executing.clone();
    hook_threads.push(dispatch(pool, filter, &scope, move |f, s| {
        f.report_completion_outcome(s, executing)
    })?);
    let view_data_visible = observed.lock().view_data.is_some();

    let result = snapshot("result_executed");
    let fault = options.fault(options.fail_result, "result failed");
    hook_threads.push(dispatch(pool, filter, &scope, move |f, s| {
        f.report_result_outcome(s, result, fault)
    })?);

    let bridge = filter.bridge(&scope)?;
    plog_debug!(
        "request {} finished: bridge {} status {}",
        request,
        bridge.id(),
        bridge.status()
    );
    let journal = journal.get();
    Ok(RequestReport {
        request,
        bridge: bridge.id().short(),
        watermark: bridge.watermark(),
        status: bridge.status(),
        hook_threads,
        view_data_visible,
        journal,
    })
}

/// Drive `options.requests` requests concurrently and collect their reports.
pub fn run(options: &SimulationOptions) -> Result<SimulationReport> {
    if options.host_threads == 0 {
        return Err(Error::Validation(
            "at least one host thread is required".to_string(),
        ));
    }
    plog!(
        "simulating {} request(s) on {} host thread(s)",
        options.requests,
        options.host_threads
    );

    let pool = HostPool::new(options.host_threads)?;
    let filter = Arc::new(AsyncFilter::new(ViewDataWorkflow {
        fetch_delay: Duration::from_millis(options.fetch_delay_ms),
    }));

    let reports = thread::scope(|s| {
        let drivers: Vec<_> = (0..options.requests)
            .map(|request| {
                let (pool, filter) = (&pool, &filter);
                s.spawn(move || drive_request(pool, filter, request, options))
            })
            .collect();
        drivers
            .into_iter()
            .map(|driver| {
                driver
                    .join()
                    .map_err(|_| Error::Validation("request driver panicked".to_string()))?
            })
            .collect::<Result<Vec<_>>>()
    });
    let panicked = pool.shutdown();
    if panicked > 0 {
        plog_warn!("{} host thread(s) panicked during the simulation", panicked);
    }

    Ok(SimulationReport {
        options: *options,
        requests: reports?,
    })
}
