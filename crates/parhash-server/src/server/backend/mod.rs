//! Backend access for the fanout service.
//!
//! - [`selector`] - Shared round-robin cursor choosing a backend per buffer.
//! - [`pool`] - One cached channel per configured backend address.
//! - [`client`] - Per-call handle that issues `Hash` to a single backend.

pub mod client;
pub mod pool;
pub mod selector;
