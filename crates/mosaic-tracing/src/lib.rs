//! Shared tracing configuration utilities for the mosaic workspace.
//!
//! The helpers in this crate centralise how executables, integration tests,
//! and supporting tools install `tracing` subscribers. By routing setup
//! through a single crate we avoid copy-pasting builder logic and keep the
//! logging surface consistent across binaries.

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional tracing directives (e.g. `mosaic_core=debug,info`). When
    /// absent the crate will fall back to `RUST_LOG` and finally to
    /// [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive used when neither [`TracingConfig::directives`] nor
    /// `RUST_LOG` resolve to a valid filter.
    pub default_directive: String,
    /// Controls whether event targets (module paths) appear in output.
    pub include_targets: bool,
    /// Controls ANSI formatting. Disable for CI logs that strip colour codes.
    pub ansi: bool,
    /// Span lifecycle events to emit. Defaults to [`FmtSpan::NONE`].
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Returns a configuration tuned for local development (pretty, ANSI-enabled output).
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// Returns a configuration tuned for CI or log collection environments (compact, no ANSI).
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Compact,
        }
    }

    /// Build a configuration using environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `MOSAIC_TRACING_PROFILE` - Profile preset: `local` (default) or `ci`
    /// - `MOSAIC_TRACING_DIRECTIVES` - Overrides tracing directives
    /// - `MOSAIC_TRACING_FORMAT` - Output format: `pretty`, `compact`, or `json`
    pub fn from_env() -> Self {
        let profile = env::var("MOSAIC_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("MOSAIC_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("MOSAIC_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        config
    }

    /// Resolve the `EnvFilter` to use for the subscriber.
    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => Ok(filter),
                Err(_) => Ok(EnvFilter::new(self.default_directive.clone())),
            }
        }
    }
}

/// Formatter layer output style.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output suitable for terminals and CI logs.
    Compact,
    /// Machine-readable JSON lines.
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors surfaced when configuring the shared tracing subscriber fails.
#[derive(Debug)]
pub enum TracingSetupError {
    /// The supplied directives did not parse into an `EnvFilter`.
    InvalidFilter(String),
    /// A global subscriber was already installed.
    AlreadyInitialized,
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFilter(err) => write!(f, "invalid tracing directives: {err}"),
            Self::AlreadyInitialized => write!(f, "a global tracing subscriber is already installed"),
        }
    }
}

impl Error for TracingSetupError {}

/// Install the global subscriber described by `config`.
///
/// Returns [`TracingSetupError::AlreadyInitialized`] when another subscriber
/// owns the global default, which is common in test binaries where several
/// tests race to initialise logging. Callers that do not care should use
/// [`try_init`].
pub fn init(config: &TracingConfig) -> Result<(), TracingSetupError> {
    let filter = config.resolve_filter()?;

    let base = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_ansi(config.ansi)
        .with_span_events(config.span_events.clone());

    let result = match config.output {
        TracingOutput::Pretty => Registry::default().with(filter).with(base.pretty()).try_init(),
        TracingOutput::Compact => Registry::default().with(filter).with(base.compact()).try_init(),
        TracingOutput::Json => Registry::default().with(filter).with(base.json()).try_init(),
    };

    result.map_err(|_| TracingSetupError::AlreadyInitialized)
}

/// Install the environment-driven subscriber, ignoring double-install races.
///
/// This is the entry point used by tests and benches.
pub fn try_init() {
    let _ = init(&TracingConfig::from_env());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_parses_known_values() {
        assert_eq!(TracingOutput::from_env_value("pretty"), Some(TracingOutput::Pretty));
        assert_eq!(TracingOutput::from_env_value("COMPACT"), Some(TracingOutput::Compact));
        assert_eq!(TracingOutput::from_env_value("json"), Some(TracingOutput::Json));
        assert_eq!(TracingOutput::from_env_value("yaml"), None);
    }

    #[test]
    fn test_directives_override_resolves() {
        let config = TracingConfig {
            directives: Some("mosaic_core=debug".to_string()),
            ..TracingConfig::for_ci()
        };
        assert!(config.resolve_filter().is_ok());
    }

    #[test]
    fn test_invalid_directives_report_error() {
        let config = TracingConfig {
            directives: Some("][not-a-filter".to_string()),
            ..TracingConfig::for_local()
        };
        assert!(matches!(config.resolve_filter(), Err(TracingSetupError::InvalidFilter(_))));
    }
}
