//! Agent Runtime - the composition root for ticket processing.
//!
//! This crate wires the pure pipeline from `supportflow-core` to the outside world:
//! - Builds the stage registry, provider clients, knowledge base and dispatch policy from
//!   [`AppConfig`](supportflow_core::config::AppConfig)
//! - Chooses the score source for DECIDE (seeded for reproducible runs, entropy otherwise)
//! - Forwards pipeline audit events to `tracing`
//! - Runs batches of tickets in parallel, one blocking task and one ticket state per ticket
//!
//! # Key Types
//!
//! - `AgentRuntime` - Main entry point (see `runtime` module)
//! - `TracingAuditSink` - Audit sink that logs structured events (see `observer` module)

pub mod observer;
pub mod runtime;

pub use observer::TracingAuditSink;
pub use runtime::AgentRuntime;
