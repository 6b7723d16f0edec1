//! Backend connection pool.
//!
//! [`BackendPool`] owns one [`Channel`] per configured backend address. A
//! channel is dialled the first time a call needs it and then reused by every
//! later call for the lifetime of the pool; a failed dial caches nothing, so the
//! next call tries again. Dropping the pool closes all channels.

use crate::server::backend::client::BackendClient;
use core::time::Duration;
use futures::future::try_join_all;
use parhash_core::Error;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};

struct BackendSlot {
    addr: Arc<str>,
    channel: OnceCell<Channel>,
}

/// Cached channels to every configured hashing backend.
pub struct BackendPool {
    backends: Vec<BackendSlot>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl BackendPool {
    /// Creates a pool over `addrs`. No connection is attempted yet.
    pub fn new(
        addrs: &[String],
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Self {
        let backends = addrs
            .iter()
            .map(|addr| BackendSlot {
                addr: Arc::from(normalize_uri(addr)),
                channel: OnceCell::new(),
            })
            .collect();

        Self {
            backends,
            connect_timeout,
            request_timeout,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns a client for backend `index`, dialling it if no channel is
    /// cached yet. Concurrent callers for the same backend share one dial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the address is not a valid URI or the
    /// backend cannot be reached within the connect timeout.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub async fn client(&self, index: usize) -> Result<BackendClient, Error> {
        let slot = &self.backends[index];
        let channel = slot
            .channel
            .get_or_try_init(|| self.dial(&slot.addr))
            .await?;
        Ok(BackendClient::new(index, Arc::clone(&slot.addr), channel.clone()))
    }

    /// Resolves a client for every backend, in configuration order.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Connect`] encountered.
    pub async fn connect_all(&self) -> Result<Vec<BackendClient>, Error> {
        try_join_all((0..self.backends.len()).map(|index| self.client(index))).await
    }

    async fn dial(&self, addr: &str) -> Result<Channel, Error> {
        let connect_err = |reason: String| Error::Connect {
            addr: addr.to_string(),
            reason,
        };

        let mut endpoint = Endpoint::from_shared(addr.to_string())
            .map_err(|e| connect_err(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(true);
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Dialling backend {addr}");

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        #[cfg(feature = "tracing")]
        tracing::info!("Connected to backend {addr}");

        Ok(channel)
    }
}

/// Prefixes scheme-less `host:port` addresses with `http://`.
fn normalize_uri(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
