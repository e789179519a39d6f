//! Tracing setup for tsuzuri.
//!
//! [`init_tracing`] installs the global subscriber every tsuzuri binary uses:
//! an `EnvFilter` (default `info`, override with `RUST_LOG`) and a fmt layer
//! on stderr. Built with the `telemetry` feature, it also attaches an
//! OpenTelemetry layer when the standard OTel environment asks for export:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!   cargo run -p tsuzuri-sim --features telemetry
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to disable export even when the endpoint is set.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors setting up trace export.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("OTLP export needs a running Tokio runtime")]
    NoRuntime,
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),
}

/// Check whether OTel export should be enabled.
///
/// Returns `true` when standard OTel env vars indicate export is desired:
/// - `OTEL_SDK_DISABLED` is NOT set to `"true"`
/// - AND at least one of:
///   - `OTEL_EXPORTER_OTLP_ENDPOINT` is set
///   - `OTEL_TRACES_EXPORTER` is set (and not `"none"`)
pub fn otel_enabled() -> bool {
    if std::env::var("OTEL_SDK_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return false;
    }

    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        return true;
    }

    if let Ok(exporter) = std::env::var("OTEL_TRACES_EXPORTER") {
        return !exporter.eq_ignore_ascii_case("none");
    }

    false
}

/// Keeps trace export alive. Hold it until the program exits.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "telemetry")]
    _otel: Option<OtelGuard>,
}

/// Install the global tracing subscriber.
///
/// A second call is a no-op: the first subscriber stays installed.
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    {
        if otel_enabled() {
            return match otel_layer(service_name) {
                Ok((layer, guard)) => {
                    let _ = registry.with(layer).try_init();
                    TelemetryGuard { _otel: Some(guard) }
                }
                Err(err) => {
                    let _ = registry.try_init();
                    tracing::warn!(%err, "OTel export disabled");
                    TelemetryGuard::default()
                }
            };
        }
    }

    let _ = registry.try_init();
    tracing::debug!(service = service_name, "tracing initialized");
    TelemetryGuard::default()
}
