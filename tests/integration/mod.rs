//! Integration test suite for phasegate.
//!
//! These tests drive a bridge the way a host pipeline does: four blocking
//! calls per request, each possibly on a different thread, with the workflow
//! suspended and resumed in between.
//!
//! # Test Categories
//!
//! - `protocol_flow`: in-order calls, interleaving and snapshot visibility
//! - `failure_propagation`: reported faults and workflows that exit early
//! - `misuse`: out-of-protocol calls from either side
//! - `concurrency`: wakes from other threads and runtimes, many requests
//!
//! Every test that crosses threads runs under a watchdog, so a lost wakeup
//! fails the test instead of hanging the suite.


mod concurrency;
mod protocol_flow;
