//! The phase gate: a per-request bridge between an asynchronous workflow and
//! four ordered, blocking Driver calls.
//!
//! - `bridge`: watermark, outcome promises and the pump loop
//! - `queue`: single-slot continuation queue drained by the pump
//! - `promise`: one-shot outcomes and Driver-reported faults
//! - `handle`: what the workflow sees
//! - `task`: the workflow future and its waker

mod bridge;
mod handle;
mod promise;
mod queue;
mod task;

pub use bridge::{Bridge, BridgeId};
pub use handle::{WorkflowHandle, WorkflowStage, WorkflowStatus, YieldNow};
pub use promise::{Fault, OutcomeFuture, OutcomePromise, Settler};
pub use queue::{Continuation, ContinuationQueue};
