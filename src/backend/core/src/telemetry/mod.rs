//! Telemetry: structured logging and governance metrics.
//!
//! - **Logging**: JSON/pretty/compact `tracing-subscriber` output with an `EnvFilter`
//! - **Metrics**: counters recorded through the `metrics` facade; installing an
//!   exporter is left to the host process
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! warden_core::telemetry::metrics::describe_metrics();
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{describe_metrics, record_decision, record_error, record_mutation};
