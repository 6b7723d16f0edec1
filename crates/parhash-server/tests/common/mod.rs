//! In-process hashing backends for exercising the dispatcher over real gRPC.
#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use core::time::Duration;
use parhash_core::proto::{
    hashsvc::{
        HashReq, HashResp,
        hasher_server::{Hasher, HasherServer},
    },
    parhash::{ParHashReq, parallel_hasher_client::ParallelHasherClient},
};
use parhash_server::{Server, ServerConfig};
use portable_atomic::{AtomicUsize, Ordering};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Response, Status, transport::Channel};

/// Counts backend calls across every backend of a test.
#[derive(Default)]
pub struct Gauge {
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
    pub completed: AtomicUsize,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

struct InflightCall<'a>(&'a Gauge);

impl<'a> InflightCall<'a> {
    fn enter(gauge: &'a Gauge) -> Self {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InflightCall<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fake backend whose "hash" is its own id followed by the input, so tests
/// can tell which backend served which buffer.
#[derive(Clone)]
pub struct TestBackend {
    pub id: u8,
    pub delay: Duration,
    pub failure: Option<(Code, &'static str)>,
    pub gauge: Arc<Gauge>,
    pub received: Arc<Mutex<Vec<Bytes>>>,
}

impl TestBackend {
    pub fn new(id: u8, gauge: Arc<Gauge>) -> Self {
        Self {
            id,
            delay: Duration::ZERO,
            failure: None,
            gauge,
            received: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, code: Code, message: &'static str) -> Self {
        self.failure = Some((code, message));
        self
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl Hasher for TestBackend {
    async fn hash(&self, req: Request<HashReq>) -> Result<Response<HashResp>, Status> {
        let data = req.into_inner().data;
        self.received.lock().unwrap().push(data.clone());

        let _call = InflightCall::enter(&self.gauge);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((code, message)) = self.failure {
            return Err(Status::new(code, message));
        }
        self.gauge.completed.fetch_add(1, Ordering::SeqCst);

        let mut hash = BytesMut::with_capacity(data.len() + 1);
        hash.put_u8(self.id);
        hash.put_slice(&data);
        Ok(Response::new(HashResp {
            hash: hash.freeze(),
        }))
    }
}

/// Expected response from [`TestBackend`] `id` for `data`.
pub fn expected_hash(id: u8, data: &[u8]) -> Bytes {
    let mut hash = Vec::with_capacity(data.len() + 1);
    hash.push(id);
    hash.extend_from_slice(data);
    Bytes::from(hash)
}

/// Serves `backend` on an ephemeral localhost port until `stop` fires.
pub async fn spawn_backend(backend: TestBackend, stop: &CancellationToken) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = stop.clone();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(HasherServer::new(backend))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                stop.cancelled().await;
            }),
    );
    addr
}

/// A running dispatcher wired to a set of test backends.
pub struct Harness {
    pub server: Server,
    pub backends: Vec<TestBackend>,
    pub gauge: Arc<Gauge>,
    pub stop: CancellationToken,
}

impl Harness {
    /// Starts `backends` plus a dispatcher with the given ceiling.
    pub async fn start(backends: Vec<TestBackend>, concurrency: usize) -> Self {
        Self::start_with(backends, concurrency, |config| config).await
    }

    /// Like [`start`](Self::start), letting the caller adjust the config.
    pub async fn start_with(
        backends: Vec<TestBackend>,
        concurrency: usize,
        tweak: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Self {
        let gauge = backends
            .first()
            .map(|b| Arc::clone(&b.gauge))
            .unwrap_or_default();
        let stop = CancellationToken::new();

        let mut addrs = Vec::with_capacity(backends.len());
        for backend in &backends {
            addrs.push(spawn_backend(backend.clone(), &stop).await.to_string());
        }

        let config = ServerConfig::new("127.0.0.1:0", addrs, concurrency).unwrap();
        Self::with_config(tweak(config), backends, gauge, stop).await
    }

    pub async fn with_config(
        config: ServerConfig,
        backends: Vec<TestBackend>,
        gauge: Arc<Gauge>,
        stop: CancellationToken,
    ) -> Self {
        let mut server = Server::new(config);
        server.start(&stop).await.unwrap();
        Self {
            server,
            backends,
            gauge,
            stop,
        }
    }

    /// `n` backends sharing one gauge.
    pub fn backends(n: u8) -> Vec<TestBackend> {
        let gauge = Arc::new(Gauge::default());
        (0..n).map(|id| TestBackend::new(id, Arc::clone(&gauge))).collect()
    }

    pub async fn client(&self) -> ParallelHasherClient<Channel> {
        let addr = self.server.listen_addr().unwrap();
        ParallelHasherClient::connect(format!("http://{addr}"))
            .await
            .unwrap()
    }

    pub async fn shutdown(mut self) {
        self.server.stop().await.unwrap();
        self.stop.cancel();
    }
}

/// `n` distinct buffers tagged with `tag` so concurrent batches stay apart.
pub fn buffers(tag: u8, n: usize) -> Vec<Bytes> {
    (0..n)
        .map(|i| Bytes::from(format!("{tag}-buffer-{i}").into_bytes()))
        .collect()
}

pub fn request(data: Vec<Bytes>) -> ParHashReq {
    ParHashReq { data }
}
