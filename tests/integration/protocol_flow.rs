//! In-order protocol tests.
//!
//! These tests verify that each Driver call returns only once the workflow
//! has reached its next boundary, that the workflow resumes on whichever
//! thread is pumping, and that snapshot mutations reach the Driver.

use phasegate::{Bridge, Phase, WorkflowHandle, WorkflowStage, WorkflowStatus};

use crate::fixtures::{ctx, drive_all, on_thread, thread_name, Ctx, Journal};

/// Test: Four segments interleave with the four Driver calls
/// Given a workflow recording A, B, C and D around its three requests
/// When the Driver makes its calls in order
/// Then each call observes exactly the segments that precede it
#[test]
fn test_segments_interleave_with_driver_calls() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    let seen = on_thread("driver", move || {
        let mut seen = Vec::new();
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            j.record("A");
            handle.request_action_execution().await?;
            j.record("B");
            handle.request_completion_of_action_processing().await?;
            j.record("C");
            handle.request_result_execution().await?;
            j.record("D");
            Ok(())
        })
        .unwrap();
        seen.push((b.watermark(), b.stage()));

        b.report_action_outcome(ctx("executed"), None).unwrap();
        seen.push((b.watermark(), b.stage()));
        b.report_completion_outcome(ctx("result-executing")).unwrap();
        seen.push((b.watermark(), b.stage()));
        b.report_result_outcome(ctx("result-executed"), None).unwrap();
        seen.push((b.watermark(), b.stage()));
        seen
    });

    assert_eq!(journal.entries(), vec!["A", "B", "C", "D"]);
    assert_eq!(
        seen,
        vec![
            (Phase::ExecuteAction, WorkflowStage::AwaitingActionOutcome),
            (
                Phase::BeginResultComprehension,
                WorkflowStage::AwaitingCompletionOutcome
            ),
            (Phase::ExecuteResult, WorkflowStage::AwaitingResultOutcome),
            (Phase::EndRequest, WorkflowStage::Done),
        ]
    );
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
}

/// Test: Driver events land between workflow segments
/// Given a journal shared by the Driver and the workflow
/// When the Driver records its own events between calls
/// Then the full ordering is deterministic
#[test]
fn test_driver_and_workflow_events_are_ordered() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    on_thread("driver", move || {
        let w = j.clone();
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            w.record("workflow: before action");
            handle.request_action_execution().await?;
            w.record("workflow: after action");
            handle.request_completion_of_action_processing().await?;
            w.record("workflow: after completion");
            handle.request_result_execution().await?;
            w.record("workflow: after result");
            Ok(())
        })
        .unwrap();
        j.record("driver: action runs");
        b.report_action_outcome(ctx("executed"), None).unwrap();
        j.record("driver: other filters finish");
        b.report_completion_outcome(ctx("result-executing")).unwrap();
        j.record("driver: result runs");
        b.report_result_outcome(ctx("result-executed"), None).unwrap();
        j.record("driver: request ends");
    });

    assert_eq!(
        journal.entries(),
        vec![
            "workflow: before action",
            "driver: action runs",
            "workflow: after action",
            "driver: other filters finish",
            "workflow: after completion",
            "driver: result runs",
            "workflow: after result",
            "driver: request ends",
        ]
    );
}

/// Test: Continuations run on the pumping thread
/// Given four Driver calls, each made from a different thread
/// When the workflow records its thread in every segment
/// Then each segment ran on the thread of the call that released it
#[test]
fn test_workflow_resumes_on_calling_thread() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let callers = drive_all(&bridge, move |handle: WorkflowHandle<Ctx>| async move {
        j.record(thread_name());
        handle.request_action_execution().await?;
        j.record(thread_name());
        handle.request_completion_of_action_processing().await?;
        j.record(thread_name());
        handle.request_result_execution().await?;
        j.record(thread_name());
        Ok(())
    });

    assert_eq!(
        callers,
        [
            "driver-begin",
            "driver-action",
            "driver-completion",
            "driver-result"
        ]
    );
    assert_eq!(journal.entries(), callers.to_vec());
    assert_eq!(bridge.watermark(), Phase::EndRequest);
}

/// Test: Outcome snapshots are the Driver's objects
/// Given a workflow that writes view data into the completion snapshot
/// When the Driver's completion call returns
/// Then the Driver sees the write on the object it passed in
#[test]
fn test_snapshot_mutation_visible_to_driver() {
    let bridge: Bridge<Ctx> = Bridge::new();
    let entering = ctx("executing");
    let executing = ctx("result-executing");

    let b = bridge.clone();
    let (e, x) = (entering.clone(), executing.clone());
    on_thread("driver", move || {
        b.begin(e, |handle: WorkflowHandle<Ctx>| async move {
            let executed = handle.request_action_execution().await?;
            let label = executed.lock().label.clone();
            let executing = handle.request_completion_of_action_processing().await?;
            executing.lock().view_data = Some(format!("loaded after {label}"));
            handle.request_result_execution().await?;
            Ok(())
        })
        .unwrap();
        b.report_action_outcome(ctx("executed"), None).unwrap();
        b.report_completion_outcome(x).unwrap();
    });

    assert_eq!(
        executing.lock().view_data.as_deref(),
        Some("loaded after executed")
    );
    assert!(bridge.entering().unwrap().ptr_eq(&entering));
    assert_eq!(bridge.watermark(), Phase::ExecuteResult);
}

/// Test: A workflow may skip boundaries
/// Given a workflow that only cares about the result
/// When the Driver makes all four calls
/// Then every call returns and the workflow sees the result snapshot
#[test]
fn test_skipping_to_result() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    drive_all(&bridge, move |handle: WorkflowHandle<Ctx>| async move {
        let result = handle.request_result_execution().await?;
        j.record(result.lock().label.clone());
        Ok(())
    });

    assert_eq!(journal.entries(), vec!["result-executed"]);
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
}

/// Test: Earlier requests survive a skip
/// Given a workflow holding the action future while it requests the result
/// When the Driver makes all four calls
/// Then the action future still resolves with its own outcome
#[test]
fn test_skip_keeps_earlier_request_valid() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    on_thread("driver", move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            let action = handle.request_action_execution();
            let result = handle.request_result_execution();
            let executed = action.await?;
            j.record(executed.lock().label.clone());
            let rendered = result.await?;
            j.record(rendered.lock().label.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(b.watermark(), Phase::ExecuteResult);
        b.report_action_outcome(ctx("executed"), None).unwrap();
        b.report_completion_outcome(ctx("result-executing")).unwrap();
        b.report_result_outcome(ctx("result-executed"), None).unwrap();
    });

    assert_eq!(journal.entries(), vec!["executed", "result-executed"]);
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
}

/// Test: Returning immediately releases the whole request
/// Given a workflow that never requests anything
/// When the Driver makes all four calls
/// Then each returns at once with the watermark at EndRequest
#[test]
fn test_immediate_return_releases_every_call() {
    let bridge: Bridge<Ctx> = Bridge::new();
    drive_all(&bridge, |_handle: WorkflowHandle<Ctx>| async move { Ok(()) });

    assert_eq!(bridge.watermark(), Phase::EndRequest);
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
    assert_eq!(bridge.stage(), WorkflowStage::Done);
}

/// Test: The first segment runs inside begin
/// Given a workflow that records before its first request
/// When begin returns
/// Then the record exists and no continuation is left queued
#[test]
fn test_first_segment_completes_before_begin_returns() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    on_thread("driver", move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            j.record("pre-action");
            handle.request_action_execution().await?;
            Ok(())
        })
        .unwrap();
    });

    assert_eq!(journal.entries(), vec!["pre-action"]);
    assert_eq!(bridge.pending_continuations(), 0);
    assert_eq!(bridge.stage(), WorkflowStage::AwaitingActionOutcome);
}

/// Test: A Driver call returns with work still queued
/// Given a workflow that requests the action, then yields before awaiting it
/// When begin returns as soon as the watermark allows
/// Then the yield stays queued until the action report pumps it
#[test]
fn test_queued_continuation_runs_on_next_call() {
    let journal = Journal::new();
    let bridge: Bridge<Ctx> = Bridge::new();

    let j = journal.clone();
    let b = bridge.clone();
    on_thread("driver-begin", move || {
        b.begin(ctx("executing"), move |handle: WorkflowHandle<Ctx>| async move {
            let action = handle.request_action_execution();
            handle.yield_now().await;
            j.record(format!("resumed on {}", thread_name()));
            let executed = action.await?;
            j.record(executed.lock().label.clone());
            Ok(())
        })
        .unwrap();
    });

    assert_eq!(bridge.watermark(), Phase::ExecuteAction);
    assert_eq!(bridge.pending_continuations(), 1);
    assert!(journal.entries().is_empty());

    let b = bridge.clone();
    on_thread("driver-action", move || {
        b.report_action_outcome(ctx("executed"), None).unwrap();
    });

    assert_eq!(
        journal.entries(),
        vec!["resumed on driver-action", "executed"]
    );
    assert_eq!(bridge.pending_continuations(), 0);
    assert_eq!(bridge.status(), WorkflowStatus::Completed);
    assert_eq!(bridge.watermark(), Phase::EndRequest);
}
