//! # `parhash-server`
//!
//! Fans `ParallelHash` batches out to a fixed set of `Hasher` backends.
//!
//! ```bash
//! parhash-server --listen-addr 0.0.0.0:50051 \
//!     --backend-addr 10.0.0.1:7000 --backend-addr 10.0.0.2:7000 \
//!     --concurrency 64
//! ```

use clap::Parser;
use parhash_server::server::{
    config::{CliArgs, ServerConfig},
    runner::Server,
    telemetry::{TelemetryProviders, init_telemetry},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let root = CancellationToken::new();
    let mut server = Server::new(config.clone());
    server.start(&root).await?;
    log_startup_info(server.listen_addr(), &config);

    shutdown_signal().await;
    let res = server.stop().await;

    flush_telemetry(providers);
    res
}

fn log_startup_info(_addr: Option<std::net::SocketAddr>, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting parallel hash service on {:?} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting parallel hash service on {:?} with {} backends, concurrency {}",
            _addr,
            _config.backend_addrs().len(),
            _config.concurrency()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}

#[allow(unused_variables)]
fn flush_telemetry(providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = providers.tracer_provider.force_flush() {
            eprintln!("Error flushing traces: {:#?}", err);
        }
        if let Err(err) = providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {:#?}", err);
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = providers.meter_provider.force_flush() {
            eprintln!("Error flushing metrics: {:#?}", err);
        }
        if let Err(err) = providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {:#?}", err);
        }
    }
}
