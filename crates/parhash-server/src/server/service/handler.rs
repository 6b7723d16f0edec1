//! gRPC service implementation for parallel buffer hashing.
//!
//! This module defines [`ParHashService`], the concrete implementation of the
//! [`ParallelHasher`] gRPC service. A `ParallelHash` request carries a batch of
//! buffers; the service never hashes them itself. Each buffer becomes one task
//! that is sent to a hashing backend chosen in round-robin order, and the
//! per-buffer hashes are returned in request order.
//!
//! ## Responsibilities
//!
//! - Validate incoming batches and enforce limits.
//! - Assign every buffer a backend through the shared [`RoundRobinSelector`].
//! - Run per-buffer backend calls through a [`WorkGroup`] bounded by the
//!   service-wide concurrency ceiling.
//! - Fail the whole batch on the first backend error, cancellation, or
//!   shutdown; never return a partial hash list.

use crate::server::{
    backend::{pool::BackendPool, selector::RoundRobinSelector},
    config::ServerConfig,
    service::state::ServiceState,
    telemetry::{
        increment_backend_calls, increment_batch_errors, increment_buffers_hashed,
        increment_requests, record_batch_duration, record_buffers_per_request,
    },
    workgroup::WorkGroup,
};
use bytes::Bytes;
use parhash_core::{
    Error,
    proto::parhash::{ParHashReq, ParHashResp, parallel_hasher_server::ParallelHasher},
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

struct Inner {
    config: ServerConfig,
    pool: BackendPool,
    selector: RoundRobinSelector,
    state: Arc<ServiceState>,
}

/// Fanout service that spreads each batch across the configured backends.
///
/// Cloning is cheap; every clone shares the same backend channels,
/// round-robin cursor, and concurrency ceiling.
#[derive(Clone)]
pub struct ParHashService {
    inner: Arc<Inner>,
}

impl ParHashService {
    /// Creates the service. Backends are dialled on first use.
    pub fn new(config: ServerConfig) -> Self {
        let pool = BackendPool::new(
            config.backend_addrs(),
            config.connect_timeout(),
            config.backend_timeout(),
        );
        let selector = RoundRobinSelector::new(pool.len());
        let state = Arc::new(ServiceState::new(config.concurrency()));

        Self {
            inner: Arc::new(Inner {
                config,
                pool,
                selector,
                state,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// The backend index the next buffer will be assigned to.
    pub fn cursor(&self) -> usize {
        self.inner.selector.current()
    }

    /// Whether [`shutdown`](Self::shutdown) has begun. Once set it stays set.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.is_shutting_down()
    }

    /// Number of batches currently being processed.
    pub fn inflight(&self) -> usize {
        self.inner.state.inflight()
    }

    /// Hashes `buffers` on the backends and returns one hash per buffer, in
    /// input order.
    ///
    /// An empty batch returns immediately without contacting any backend or
    /// advancing the cursor. Otherwise the cursor advances exactly once per
    /// buffer, even if the batch later fails.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the service is draining.
    /// - [`Error::InvalidRequest`] if the batch exceeds `max_buffers`.
    /// - [`Error::Connect`] if any backend cannot be reached.
    /// - The first [`Error::Backend`], [`Error::Cancelled`], or
    ///   [`Error::TaskFailed`] raised by a task.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dispatch", skip_all, fields(buffers = buffers.len())))]
    pub async fn dispatch(&self, buffers: Vec<Bytes>) -> Result<Vec<Bytes>, Error> {
        let inner = &self.inner;

        if inner.state.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }

        if buffers.len() > inner.config.max_buffers() {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "Batch of {} buffers exceeds maximum allowed ({})",
                    buffers.len(),
                    inner.config.max_buffers()
                ),
            });
        }

        if buffers.is_empty() {
            return Ok(Vec::new());
        }

        let _inflight = inner.state.track();

        // The scope is cancelled when this future is dropped (client gone or
        // deadline hit) or when the service shuts down.
        let token = inner.state.call_token();
        let _cancel_on_drop = token.clone().drop_guard();

        let clients = inner.pool.connect_all().await?;

        let total = buffers.len();
        let mut group = WorkGroup::new(Arc::clone(inner.state.permits()), token);
        for (slot, data) in buffers.into_iter().enumerate() {
            let backend = inner.selector.next();
            let mut client = clients[backend].clone();

            #[cfg(feature = "tracing")]
            tracing::trace!("Buffer {slot} -> backend {backend}");

            group.spawn(move |_| async move {
                increment_backend_calls(backend);
                let hash = client.hash(data).await?;
                Ok((slot, hash))
            });
        }

        let mut hashes = vec![Bytes::new(); total];
        for (slot, hash) in group.wait().await? {
            hashes[slot] = hash;
        }

        increment_buffers_hashed(total as u64);
        Ok(hashes)
    }

    /// Refuses new batches, drains in-flight ones for up to
    /// `shutdown_timeout`, then cancels the rest.
    pub async fn shutdown(&self) {
        self.inner
            .state
            .shutdown(self.inner.config.shutdown_timeout())
            .await;
    }
}

#[tonic::async_trait]
impl ParallelHasher for ParHashService {
    /// Handles a `ParallelHash` request.
    ///
    /// If `metrics` is enabled, emits telemetry for:
    /// - request rate
    /// - buffers per request / buffers hashed
    /// - concurrent batch count
    /// - batch duration
    /// - batch errors
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(buffers = req.get_ref().data.len())))]
    async fn parallel_hash(
        &self,
        req: Request<ParHashReq>,
    ) -> Result<Response<ParHashResp>, Status> {
        let start = std::time::Instant::now();
        let buffers = req.into_inner().data;

        increment_requests();
        record_buffers_per_request(buffers.len() as f64);

        match self.dispatch(buffers).await {
            Ok(hashes) => {
                record_batch_duration(start.elapsed().as_millis() as f64);
                Ok(Response::new(ParHashResp { hashes }))
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Error: {}", e);
                increment_batch_errors();
                Err(e.into())
            }
        }
    }
}
