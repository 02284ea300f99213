//! Structured logging setup.
//!
//! The upstream project wires `tracing` through an OpenTelemetry exporter;
//! this gateway keeps the same `tracing`/`tracing-subscriber` foundation but
//! drops the OTLP pipeline, since distributed tracing export is outside the
//! scope of the core (see DESIGN.md).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Install a global `tracing` subscriber reading its filter from `RUST_LOG`
/// (defaulting to `info`). `json` switches to newline-delimited JSON output,
/// which is what operators typically want once the gateway runs under a
/// process supervisor.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
