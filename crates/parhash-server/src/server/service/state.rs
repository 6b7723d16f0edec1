//! Per-service lifecycle state.
//!
//! [`ServiceState`] tracks how many batches are in flight and whether the
//! service is draining. It belongs to one service instance, so independent
//! servers in the same process never observe each other's batches.

use core::time::Duration;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{sync::Semaphore, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::server::telemetry::{decrement_batches_inflight, increment_batches_inflight};

pub struct ServiceState {
    inflight: AtomicUsize,
    shutting_down: AtomicBool,
    drained: tokio::sync::Notify,
    /// Parent of every call's cancellation scope.
    shutdown_token: CancellationToken,
    /// Concurrency ceiling shared by every call.
    permits: Arc<Semaphore>,
}

impl ServiceState {
    pub fn new(concurrency: usize) -> Self {
        Self {
            inflight: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            drained: tokio::sync::Notify::new(),
            shutdown_token: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub const fn permits(&self) -> &Arc<Semaphore> {
        &self.permits
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Opens a cancellation scope for one call, child of the service token.
    pub fn call_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Registers an in-flight batch until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_batches_inflight();
        InflightGuard {
            state: Arc::clone(self),
        }
    }

    /// Stops admitting batches, waits up to `drain_timeout` for in-flight
    /// ones to finish, then cancels whatever is left.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight batches to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight batches ({} active)", self.inflight());
        let drain_result = timeout(drain_timeout, async {
            loop {
                let notified = self.drained.notified();
                if self.inflight() == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight batches drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} batches still active)",
                    self.inflight()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();
        self.permits.close();
    }
}

/// Decrements the in-flight count when a batch completes or is dropped.
pub struct InflightGuard {
    state: Arc<ServiceState>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        decrement_batches_inflight();
        if self.state.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.drained.notify_waiters();
        }
    }
}
