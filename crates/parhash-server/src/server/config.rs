use anyhow::bail;
use clap::Parser;
use core::{num::NonZeroUsize, time::Duration};
use tokio::sync::Semaphore;

/// Runtime configuration for the `parhash-server` binary.
///
/// These settings control where the fanout service listens, which hashing
/// backends it spreads work across, and how many backend calls may be in
/// flight at once. All values are parsed from CLI arguments or environment
/// variables (a `.env` file is honored).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "parhash-server",
    version,
    about = "A gRPC service that fans batches of buffers out to hashing backends"
)]
pub struct CliArgs {
    /// Address to listen on. Use port 0 to let the OS pick one.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub listen_addr: String,

    /// Hashing backend addresses, in round-robin order.
    ///
    /// May be repeated or given as a comma separated list. Addresses without a
    /// scheme (`host:port`) are dialled over plaintext HTTP/2.
    ///
    /// Environment variable: `BACKEND_ADDRS`
    #[arg(
        long = "backend-addr",
        env = "BACKEND_ADDRS",
        value_delimiter = ',',
        required = true
    )]
    pub backend_addrs: Vec<String>,

    /// Maximum number of backend `Hash` calls in flight across all requests.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 64)]
    pub concurrency: usize,

    /// Maximum number of buffers accepted in a single `ParallelHash` request.
    ///
    /// Environment variable: `MAX_BUFFERS`
    #[arg(long, env = "MAX_BUFFERS", default_value_t = 1_000_000)]
    pub max_buffers: usize,

    /// Timeout for establishing a channel to a backend, in milliseconds.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_MS`
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Per-call timeout for backend `Hash` requests, in milliseconds. `0`
    /// disables it and relies on the caller's deadline alone.
    ///
    /// Environment variable: `BACKEND_TIMEOUT_MS`
    #[arg(long, env = "BACKEND_TIMEOUT_MS", default_value_t = 0)]
    pub backend_timeout_ms: u64,

    /// Seconds to wait for in-flight batches to drain before cancelling them
    /// during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

/// Validated, immutable server configuration.
///
/// Only obtainable through [`ServerConfig::new`] or [`TryFrom<CliArgs>`], so
/// there is always at least one backend and a non-zero concurrency ceiling.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    listen_addr: String,
    backend_addrs: Vec<String>,
    concurrency: usize,
    max_buffers: usize,
    connect_timeout: Duration,
    backend_timeout: Option<Duration>,
    shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Builds a config with default limits and timeouts.
    ///
    /// # Errors
    ///
    /// Fails under the same rules as [`TryFrom<CliArgs>`].
    pub fn new(
        listen_addr: impl Into<String>,
        backend_addrs: impl IntoIterator<Item = impl Into<String>>,
        concurrency: usize,
    ) -> anyhow::Result<Self> {
        Self::try_from(CliArgs {
            listen_addr: listen_addr.into(),
            backend_addrs: backend_addrs.into_iter().map(Into::into).collect(),
            concurrency,
            max_buffers: 1_000_000,
            connect_timeout_ms: 5_000,
            backend_timeout_ms: 0,
            shutdown_timeout: 3,
        })
    }

    #[must_use]
    pub const fn with_max_buffers(mut self, max_buffers: NonZeroUsize) -> Self {
        self.max_buffers = max_buffers.get();
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds every backend `Hash` call by `timeout`.
    #[must_use]
    pub const fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Backend addresses in round-robin order. Never empty.
    pub fn backend_addrs(&self) -> &[String] {
        &self.backend_addrs
    }

    /// Ceiling on backend calls in flight across all requests. Never zero.
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub const fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub const fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let backend_addrs: Vec<String> = args
            .backend_addrs
            .into_iter()
            .map(|addr| addr.trim().to_string())
            .collect();

        if backend_addrs.is_empty() {
            bail!("BACKEND_ADDRS must contain at least one address");
        }

        if let Some(pos) = backend_addrs.iter().position(String::is_empty) {
            bail!("BACKEND_ADDRS entry {pos} is empty");
        }

        if args.concurrency == 0 {
            bail!("CONCURRENCY must be greater than 0");
        }

        if args.concurrency > Semaphore::MAX_PERMITS {
            bail!(
                "CONCURRENCY ({}) exceeds the maximum permit count ({})",
                args.concurrency,
                Semaphore::MAX_PERMITS
            );
        }

        if args.max_buffers == 0 {
            bail!("MAX_BUFFERS must be greater than 0");
        }

        if args.connect_timeout_ms == 0 {
            bail!("CONNECT_TIMEOUT_MS must be greater than 0");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            backend_addrs,
            concurrency: args.concurrency,
            max_buffers: args.max_buffers,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            backend_timeout: (args.backend_timeout_ms > 0)
                .then(|| Duration::from_millis(args.backend_timeout_ms)),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
