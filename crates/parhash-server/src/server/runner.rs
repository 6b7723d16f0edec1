//! Server lifecycle: bind, serve in the background, stop gracefully.

use crate::server::{config::ServerConfig, service::handler::ParHashService};
use anyhow::{Context, bail};
use parhash_core::proto::{
    FILE_DESCRIPTOR_SET, parhash::parallel_hasher_server::ParallelHasherServer,
};
use std::net::SocketAddr;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server as TonicServer};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

struct Running {
    local_addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

/// A `ParallelHasher` server bound to a TCP listener.
///
/// [`start`](Self::start) returns as soon as the listener is bound and serving
/// continues on a background task; [`stop`](Self::stop) drains and waits for it.
pub struct Server {
    service: ParHashService,
    running: Option<Running>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            service: ParHashService::new(config),
            running: None,
        }
    }

    pub const fn service(&self) -> &ParHashService {
        &self.service
    }

    /// Binds the configured listen address and starts serving in the
    /// background.
    ///
    /// Cancelling `parent` has the same effect as calling [`stop`](Self::stop),
    /// except that nothing waits for the shutdown to complete.
    ///
    /// # Errors
    ///
    /// Fails if the server is already running or has been stopped, the
    /// address cannot be bound, or the reflection service cannot be built.
    pub async fn start(&mut self, parent: &CancellationToken) -> anyhow::Result<()> {
        if self.running.is_some() {
            bail!("server already started");
        }
        // Shutdown closes the service's permits for good.
        if self.service.is_shutting_down() {
            bail!("server has been stopped and cannot be restarted");
        }

        let listen_addr = self.service.config().listen_addr();
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind {listen_addr}"))?;
        let local_addr = listener.local_addr()?;

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ParallelHasherServer<ParHashService>>()
            .await;

        let reflection = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let stop = parent.child_token();
        let router = TonicServer::builder()
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_parhash_service(self.service.clone()));

        let task = tokio::spawn(router.serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown(stop.clone(), self.service.clone(), health_reporter),
        ));

        #[cfg(feature = "tracing")]
        tracing::info!("Listening on {local_addr}");

        self.running = Some(Running {
            local_addr,
            stop,
            task,
        });
        Ok(())
    }

    /// The bound address, once started. Reports the OS-assigned port when the
    /// configured address used port 0.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Triggers a graceful shutdown and waits until serving has stopped.
    /// Calling it on a server that is not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the transport error the server stopped with, if any.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.stop.cancel();
        running
            .task
            .await
            .context("server task panicked")?
            .context("server stopped with an error")?;

        #[cfg(feature = "tracing")]
        tracing::info!("Service shut down successfully");
        Ok(())
    }
}

fn build_parhash_service(service: ParHashService) -> ParallelHasherServer<ParHashService> {
    ParallelHasherServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown(stop: CancellationToken, service: ParHashService, health_reporter: HealthReporter) {
    stop.cancelled().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Stopping, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ParallelHasherServer<ParHashService>>()
        .await;

    // 2. Drain, then cancel whatever is left
    service.shutdown().await;
}
