//! gRPC service implementation and batch dispatch logic.
//!
//! This module contains the client-facing `ParallelHash` handler, which splits
//! a batch into one task per buffer, assigns each task a backend in
//! round-robin order, and runs the tasks in a bounded [`WorkGroup`].
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`ParHashService`).
//! - [`state`] - In-flight tracking and shutdown coordination.
//!
//! [`WorkGroup`]: crate::server::workgroup::WorkGroup

pub mod handler;
pub mod state;
