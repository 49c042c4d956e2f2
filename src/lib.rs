//! Phase-gated bridge between an asynchronous workflow and a synchronous,
//! multi-stage request pipeline.
//!
//! A host (the Driver) makes four ordered, blocking calls per request. A
//! [`Bridge`] runs the author's workflow on the Driver's calling thread and
//! lets each call return only once the workflow has asked for the next phase
//! or finished.
//!
//! - `gate`: the bridge, its continuation queue, outcome promises and handle
//! - `filter`/`scope`: Driver-side entry points and per-request storage
//! - `simulate`: a diagnostic pipeline exercising the gate across host threads

pub mod config;
pub mod error;
pub mod filter;
pub mod gate;
pub mod log;
pub mod phase;
pub mod scope;
pub mod simulate;
pub mod snapshot;

pub use error::{BoxError, Error, Result};
pub use filter::{AsyncFilter, Workflow};
pub use gate::{
    Bridge, BridgeId, Fault, OutcomeFuture, WorkflowHandle, WorkflowStage, WorkflowStatus,
};
pub use phase::Phase;
pub use scope::{FilterKey, RequestScope};
pub use snapshot::Shared;
