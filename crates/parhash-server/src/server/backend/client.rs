use bytes::Bytes;
use parhash_core::{
    Error,
    proto::hashsvc::{HashReq, hasher_client::HasherClient},
};
use std::sync::Arc;
use tonic::transport::Channel;

/// A handle for issuing `Hash` to one backend.
///
/// Cheap to clone: the underlying [`Channel`] multiplexes every clone over the
/// same HTTP/2 connection, so each task gets its own handle.
#[derive(Clone, Debug)]
pub struct BackendClient {
    index: usize,
    addr: Arc<str>,
    inner: HasherClient<Channel>,
}

impl BackendClient {
    pub(crate) fn new(index: usize, addr: Arc<str>, channel: Channel) -> Self {
        Self {
            index,
            addr,
            inner: HasherClient::new(channel),
        }
    }

    /// Asks the backend for the hash of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] carrying the backend's status code when the
    /// call fails, whether in transport or on the remote side.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(backend = self.index, len = data.len())))]
    pub async fn hash(&mut self, data: Bytes) -> Result<Bytes, Error> {
        match self.inner.hash(HashReq { data }).await {
            Ok(resp) => Ok(resp.into_inner().hash),
            Err(status) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Backend {} ({}) failed: {}", self.index, self.addr, status);
                Err(Error::backend(self.index, &*self.addr, &status))
            }
        }
    }
}
