//! # Telemetry Features
//!
//! The fanout server supports optional telemetry using the `tracing` and
//! `metrics` features, exported via OpenTelemetry to either Honeycomb or
//! stdout. Console logging through `tracing-subscriber` is always installed.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables OpenTelemetry distributed tracing (via spans).
//! - `metrics`: Enables OpenTelemetry metrics (via counters, histograms, etc.).
//! - `honeycomb`: Enables the Honeycomb OTLP exporter.
//! - `stdout`: Enables the stdout OTLP exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `tracing` or `metrics`.
//! - Both `honeycomb` and `stdout` exporters can be enabled at the same time.
//!
//! ## Span behavior
//!
//! - Spans created via `tracing::info_span!` are exported to any enabled
//!   telemetry backend
//! - Events (`tracing::info!`, etc.) inside a span become span events in
//!   telemetry backends
//! - Events outside of a span are only shown in log output (via
//!   `fmt::layer()`), not exported
//!
//! ## Metrics behavior
//!
//! - Metrics (e.g. request count, batch duration, per-backend call counts) are
//!   exported if `metrics` is enabled
//! - Each exporter (Honeycomb, stdout) gets its own reader
//!
//! ## Example usage
//!
//! Enable tracing and export to Honeycomb:
//!
//! ```bash
//! cargo run --features tracing,honeycomb
//! ```
//!
//! Enable metrics and export to Honeycomb:
//!
//! ```bash
//! cargo run --features metrics,honeycomb
//! ```
//!
//! Enable tracing and metrics, exported to both Honeycomb and stdout:
//!
//! ```bash
//! cargo run --features tracing,metrics,honeycomb,stdout
//! ```
//!
//! Enable only local stdout export (no remote backend):
//!
//! ```bash
//! cargo run --features tracing,stdout
//! ```

// Disallow using `honeycomb` without `tracing` or `metrics`
#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Honeycomb-specific imports
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "honeycomb")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

/// Exporter providers that must be flushed and shut down on exit.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

/// Installs the global subscriber and, when enabled, the OpenTelemetry
/// tracer and meter providers.
///
/// # Errors
///
/// Fails if an exporter cannot be configured (e.g. missing Honeycomb
/// credentials).
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("parhash")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Always subscribe to standard tracing logs printed to the console via
    // `tracing_subscriber::fmt`. This is unrelated to the `opentelemetry_stdout`
    // exporter. `LOG_FORMAT=json` switches to one JSON object per line for log
    // shippers; anything else keeps the human-readable output.
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty()
        }));

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Connection settings for the Honeycomb OTLP endpoint, read from the
/// `HONEYCOMB_*` environment variables.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
struct HoneycombSettings {
    metadata: MetadataMap,
    endpoint: String,
    compression: Compression,
}

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
impl HoneycombSettings {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use std::str::FromStr;

        let var = |name: &str| std::env::var(name).with_context(|| format!("missing `{name}`"));

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            var("HONEYCOMB_API_KEY")?.parse().context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            var("HONEYCOMB_DATASET")?.parse().context("invalid dataset")?,
        );

        let compression =
            Compression::from_str(&var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase())?;

        Ok(Self {
            metadata,
            endpoint: var("HONEYCOMB_ENDPOINT")?,
            compression,
        })
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("parhash")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_processor(
        opentelemetry_stdout::SpanExporter::default(),
    ));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

/// Batches spans every 5s with a bounded queue, shared by every exporter.
#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCHES_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCH_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCH_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BUFFERS_HASHED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BUFFERS_PER_REQUEST: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BACKEND_CALLS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Total ParallelHash requests")
            .build(),
    );

    let _ = BATCHES_INFLIGHT.set(
        meter
            .i64_up_down_counter("batches_inflight")
            .with_description("Concurrent ParallelHash batches")
            .build(),
    );

    let _ = BATCH_ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Failed/cancelled/rejected batches")
            .build(),
    );

    let _ = BATCH_DURATION_MS.set(
        meter
            .f64_histogram("batch_duration")
            .with_unit("ms")
            .with_description("End-to-end batch duration")
            .build(),
    );

    let _ = BUFFERS_HASHED.set(
        meter
            .u64_counter("buffers_hashed")
            .with_description("Total buffers hashed by backends")
            .build(),
    );

    let _ = BUFFERS_PER_REQUEST.set(
        meter
            .f64_histogram("buffers_per_request")
            .with_description("Buffers submitted per request")
            .build(),
    );

    let _ = BACKEND_CALLS.set(
        meter
            .u64_counter("backend_calls")
            .with_description("Hash calls issued, by backend index")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests() {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_batches_inflight() {
    if let Some(counter) = BATCHES_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_batches_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_batches_inflight() {
    if let Some(counter) = BATCHES_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_batches_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_batch_errors() {
    if let Some(counter) = BATCH_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_batch_errors() {}

#[cfg(feature = "metrics")]
pub fn record_batch_duration(duration_ms: f64) {
    if let Some(histogram) = BATCH_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_batch_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_buffers_hashed(count: u64) {
    if let Some(counter) = BUFFERS_HASHED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_buffers_hashed(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn record_buffers_per_request(count: f64) {
    if let Some(histogram) = BUFFERS_PER_REQUEST.get() {
        histogram.record(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_buffers_per_request(_count: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_backend_calls(backend: usize) {
    if let Some(counter) = BACKEND_CALLS.get() {
        counter.add(1, &[KeyValue::new("backend", backend as i64)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_backend_calls(_backend: usize) {}
