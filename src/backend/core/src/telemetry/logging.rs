//! Subscriber setup for governance events.
//!
//! Decisions are logged at `debug`, committed mutations at `info` and
//! rejected operations at the severity of their error code. The host picks
//! the output shape: JSON lines for log shippers, pretty output for a
//! terminal, or one compact line per event.

use serde::Deserialize;
use std::collections::HashMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// The `[logging]` section of [`crate::config::Config`].
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Base filter directive, e.g. `info` or `warden_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra `target=level` directives layered over `level`.
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Source file and line on every event.
    #[serde(default = "enabled")]
    pub include_location: bool,

    #[serde(default)]
    pub include_thread: bool,

    #[serde(default = "enabled")]
    pub include_target: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: true,
            include_thread: false,
            include_target: true,
            span_events: SpanEventConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Whether the `#[instrument]` spans on manager operations log on entry
/// and exit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub on_new: bool,

    #[serde(default)]
    pub on_close: bool,
}

impl SpanEventConfig {
    fn fmt_span(&self) -> FmtSpan {
        match (self.on_new, self.on_close) {
            (true, true) => FmtSpan::NEW | FmtSpan::CLOSE,
            (true, false) => FmtSpan::NEW,
            (false, true) => FmtSpan::CLOSE,
            (false, false) => FmtSpan::NONE,
        }
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn enabled() -> bool {
    true
}

/// Parse `level` plus every module override into one filter.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }
    Ok(filter)
}

/// The formatting layer for a configuration, boxed so every format shares
/// one subscriber type.
fn fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_span_events(config.span_events.fmt_span())
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on a malformed filter directive, or when a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(config)?;

    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(filter)
        .try_init()?;

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_location);
        assert!(!config.span_events.on_new);
    }

    #[test]
    fn test_filter_accepts_module_levels() {
        let mut config = LoggingConfig {
            level: "warn".into(),
            ..LoggingConfig::default()
        };
        config
            .module_levels
            .insert("warden_core::membership".into(), "debug".into());
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_span_events() {
        let config = SpanEventConfig {
            on_new: true,
            on_close: true,
        };
        assert_eq!(config.fmt_span(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(SpanEventConfig::default().fmt_span(), FmtSpan::NONE);
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }

    // The only test in this crate that installs a global subscriber.
    #[test]
    fn test_init_logging_compact_installs_once() {
        let config = LoggingConfig {
            level: "warden_core=debug".into(),
            format: LogFormat::Compact,
            ..LoggingConfig::default()
        };

        init_logging(&config).unwrap();
        tracing::info!(scope = "acme", "compact subscriber installed");

        assert!(init_logging(&config).is_err());
    }
}
