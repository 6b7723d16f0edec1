//! Server-side components of the parallel hash fanout service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`backend`] - Backend channels and round-robin selection.
//! - [`workgroup`] - Bounded, cancellable task groups.
//! - [`service`] - The `ParallelHash` gRPC handler.
//! - [`runner`] - Listener binding and graceful start/stop.
//! - [`telemetry`] - Logging, tracing and metrics setup.

pub mod backend;
pub mod config;
pub mod runner;
pub mod service;
pub mod telemetry;
pub mod workgroup;
