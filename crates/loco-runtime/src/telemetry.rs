//! Process-wide log and span output for the controller.
//!
//! The control thread logs through `tracing` macros only.  [`init_tracing`]
//! decides where those events go, and is meant to run once from `main`
//! before any sampler or loop thread starts.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Event filter, `info` when unset. |
//! | `LOCO_LOG_FORMAT` | `json` for one JSON object per line, anything else for compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector URL. Spans are shipped over OTLP/HTTP when non-empty. |
//!
//! ```rust,no_run
//! let _guard = loco_runtime::telemetry::init_tracing("loco");
//! // ... run the controller; spans are flushed when `_guard` drops.
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Shape of the events written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Interpret a `LOCO_LOG_FORMAT` value.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber and, if a collector is configured, the
/// OTLP span exporter.
///
/// Events go to stderr so `loco inspect --dump` can keep stdout clean.
/// Keep the returned guard alive in `main`.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_setting(std::env::var("LOCO_LOG_FORMAT").ok().as_deref());

    let provider = collector_endpoint(std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok())
        .and_then(|endpoint| build_provider(service_name, endpoint));
    let spans = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("loco")));

    let registry = tracing_subscriber::registry().with(filter).with(spans);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }

    TracerProviderGuard(provider)
}

/// Owns the span exporter; shutting it down on drop flushes queued spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans leave the process.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[loco] span exporter shutdown failed: {e}");
            }
        }
    }
}

/// Blank endpoints count as unset.
fn collector_endpoint(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn build_provider(service_name: &str, endpoint: String) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[loco] span exporter unavailable, logging locally only: {e}"))
        .ok()?;

    // Spans are exported inline: the sampler and control loop are plain
    // threads and nothing drives a batch processor.
    Some(
        SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
            .with_simple_exporter(exporter)
            .build(),
    )
}
