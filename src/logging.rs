//! Logger setup for binaries built on the engine.
//!
//! The library itself only talks to the `log` facade; nothing is printed
//! unless the application installs a logger, for example with
//! [`init_logging`].

use std::sync::Once;

/// Filter used when neither [`LoggingConfig::filter`] nor `RUST_LOG` is set.
/// wgpu's own crates are chatty at `info`.
pub const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

/// How [`init_logging`] configures `env_logger`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `env_logger` filter directives, e.g. `"phalanx=debug,wgpu_core=warn"`.
    /// Takes precedence over `RUST_LOG`.
    pub filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Prefix lines with a millisecond timestamp.
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            write_style: env_logger::WriteStyle::Auto,
            timestamps: true,
        }
    }
}

impl LoggingConfig {
    /// Same as [`LoggingConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter directives, overriding `RUST_LOG`.
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    /// When to color output.
    pub fn write_style(mut self, style: env_logger::WriteStyle) -> Self {
        self.write_style = style;
        self
    }

    /// Prefix records with a millisecond timestamp.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Directives that will actually be applied.
    fn directives(&self) -> String {
        self.filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string())
    }
}

static INIT: Once = Once::new();

/// Installs `env_logger` as the global logger.
///
/// Only the first call has any effect. If another logger was installed
/// already, this one is silently skipped.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let directives = config.directives();
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&directives);
        builder.write_style(config.write_style);
        if config.timestamps {
            builder.format_timestamp_millis();
        } else {
            builder.format_timestamp(None);
        }

        if builder.try_init().is_ok() {
            log::debug!("logging initialized with '{directives}'");
        }
    });
}
