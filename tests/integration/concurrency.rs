//! Cross-thread and cross-runtime tests.
//!
//! These tests verify that a workflow awaiting work completed elsewhere is
//! woken through the bridge queue and resumed on the Driver thread, and
//! that many requests can be in flight at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use phasegate::simulate::{self, SimulationOptions};
use phasegate::{
    AsyncFilter, Bridge, Error, Phase, RequestScope, Workflow, WorkflowHandle, WorkflowStatus,
};

use crate::fixtures::{
    ctx, drive_all, on_thread, thread_name, with_timeout, Ctx, Journal, WATCHDOG,
};

/// Test: Auxiliary work on another thread
/// Given a workflow awaiting a value produced by a helper thread
/// When begin pumps while the helper is still sleeping
/// Then begin waits, and the workflow resumes on the Driver thread
#[test]
fn test_aux_completion_wakes_pump() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    on_thread("driver", move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            let (tx, rx) = futures::channel::oneshot::channel();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                let _ = tx.send("session loaded");
            });
            j.record("aux started");
            let loaded = rx
                .await
                .map_err(|_| Error::Workflow("helper vanished".to_string()))?;
            j.record(format!("{loaded} on {}", thread_name()));
            handle.request_action_execution().await?;
            Ok(())
        })
        .unwrap();
    });

    assert_eq!(
        journal.entries(),
        vec!["aux started", "session loaded on driver"]
    );
    assert_eq!(bridge.watermark(), Phase::ExecuteAction);
}

/// Test: Wake from a tokio runtime
/// Given a workflow awaiting a tokio oneshot fed by a runtime task
/// When the Driver call runs on a blocking thread
/// Then the runtime's wake resumes the workflow through the pump
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wake_from_tokio_runtime() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();
    let runtime = tokio::runtime::Handle::current();

    let j = journal.clone();
    let b = bridge.clone();
    let driver = tokio::task::spawn_blocking(move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            let (tx, rx) = tokio::sync::oneshot::channel();
            runtime.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = tx.send("fetched");
            });
            let value = rx
                .await
                .map_err(|e| Error::Workflow(e.to_string()))?;
            j.record(value);
            let executed = handle.request_action_execution().await?;
            j.record(executed.lock().label.clone());
            Ok(())
        })
        .unwrap();
        b.report_action_outcome(ctx("executed"), None).unwrap();
    });

    tokio::time::timeout(WATCHDOG, driver)
        .await
        .expect("Driver timed out")
        .expect("Driver panicked");

    assert_eq!(journal.entries(), vec!["fetched", "executed"]);
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
}

/// Test: Voluntary yields
/// Given a workflow that yields several times before its first request
/// When begin pumps
/// Then every yield resumes within the same pump and nothing is left queued
#[test]
fn test_yield_now_resumes_within_pump() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    with_timeout(move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            for i in 0..3 {
                j.record(format!("slice {i}"));
                handle.yield_now().await;
            }
            handle.request_action_execution().await?;
            Ok(())
        })
        .unwrap();
    });

    assert_eq!(journal.entries(), vec!["slice 0", "slice 1", "slice 2"]);
    assert_eq!(bridge.pending_continuations(), 0);
}

/// Test: Many requests in flight
/// Given sixteen bridges, each driven on its own set of threads
/// When all of them run at the same time
/// Then every request completes independently
#[test]
fn test_many_bridges_in_parallel() {
    let completed = with_timeout(|| {
        let bridges: Vec<Bridge<Ctx>> = (0..16).map(|_| Bridge::new()).collect();
        thread::scope(|s| {
            for (i, bridge) in bridges.iter().enumerate() {
                s.spawn(move || {
                    drive_all(bridge, move |handle: WorkflowHandle<Ctx>| async move {
                        handle.request_action_execution().await?;
                        if i % 2 == 0 {
                            handle.yield_now().await;
                        }
                        handle.request_completion_of_action_processing().await?;
                        handle.request_result_execution().await?;
                        Ok(())
                    });
                });
            }
        });
        bridges
            .iter()
            .filter(|b| b.status() == WorkflowStatus::Completed)
            .count()
    });

    assert_eq!(completed, 16);
}

/// Test: Repeated begin from another thread
/// Given a bridge whose workflow was already started
/// When a second begin arrives from a different thread
/// Then the factory is not invoked again and the second call returns
#[test]
fn test_begin_once_across_threads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bridge: Bridge<Ctx> = Bridge::new();

    for name in ["first-begin", "second-begin"] {
        let b = bridge.clone();
        let calls = Arc::clone(&calls);
        on_thread(name, move || {
            b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    handle.request_action_execution().await?;
                    Ok(())
                }
            })
            .unwrap();
        });
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.watermark(), Phase::ExecuteAction);
}

fn run_hook<W: Workflow<Ctx>>(
    filter: &AsyncFilter<Ctx, W>,
    scope: &RequestScope,
    step: &str,
) -> phasegate::Result<()> {
    match step {
        "begin" => filter.begin(scope, ctx("executing")),
        "action" => filter.report_action_outcome(scope, ctx("executed"), None),
        "completion" => filter.report_completion_outcome(scope, ctx("result-executing")),
        _ => filter.report_result_outcome(scope, ctx("result-executed"), None),
    }
}

/// Test: Filters share a request scope across host threads
/// Given two filters on the same request
/// When their hooks interleave on different threads
/// Then each filter drives its own bridge to completion
#[test]
fn test_filters_on_shared_scope() {
    let scope = Arc::new(RequestScope::new());
    let outer = Arc::new(AsyncFilter::from_fn(|handle: WorkflowHandle<Ctx>| async move {
        handle.request_action_execution().await?;
        handle.request_result_execution().await?;
        Ok(())
    }));
    let inner = Arc::new(AsyncFilter::from_fn(|handle: WorkflowHandle<Ctx>| async move {
        handle.request_completion_of_action_processing().await?;
        Ok(())
    }));

    let steps: Vec<(&str, usize)> = vec![
        ("begin", 0),
        ("begin", 1),
        ("action", 1),
        ("action", 0),
        ("completion", 0),
        ("completion", 1),
        ("result", 1),
        ("result", 0),
    ];
    for (n, (step, which)) in steps.into_iter().enumerate() {
        let (scope, outer, inner) = (Arc::clone(&scope), Arc::clone(&outer), Arc::clone(&inner));
        on_thread(&format!("host-{n}"), move || {
            let outcome = if which == 0 {
                run_hook(&outer, &scope, step)
            } else {
                run_hook(&inner, &scope, step)
            };
            outcome.unwrap();
        });
    }

    assert_eq!(scope.len(), 2);
    assert_eq!(outer.bridge(&scope).unwrap().status(), WorkflowStatus::Completed);
    assert_eq!(inner.bridge(&scope).unwrap().status(), WorkflowStatus::Completed);
}

/// Test: Simulated host pipeline
/// Given more requests than host threads
/// When the simulation runs
/// Then every workflow completes and its view data reaches the Driver
#[test]
fn test_simulated_pipeline() {
    let options = SimulationOptions {
        requests: 6,
        host_threads: 3,
        fetch_delay_ms: 2,
        ..SimulationOptions::default()
    };
    let report = with_timeout(move || simulate::run(&options).unwrap());

    assert!(report.all_completed());
    assert!(report.requests.iter().all(|r| r.view_data_visible));
    assert!(report
        .requests
        .iter()
        .all(|r| r.hook_threads.iter().all(|t| t.starts_with("host-"))));
}
