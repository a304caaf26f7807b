//! Watcher settings.
//!
//! [`WatchConfig`] collects the tunables of a watcher so they can live in an
//! application's configuration file. With the `toml` feature it can be read
//! directly:
//!
//! ```toml
//! debounce_ms = 150
//! source = "polling"
//! poll_interval_ms = 500
//! ```

use std::time::Duration;

#[cfg(feature = "toml")]
use std::path::Path;

#[cfg(feature = "toml")]
use miette::{Diagnostic, NamedSource, SourceSpan};
#[cfg(feature = "toml")]
use thiserror::Error;

/// Which change source a watcher uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "toml", derive(serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum SourceSetting {
    /// Native notifications, polling if they are unavailable.
    #[default]
    Auto,
    /// Native notifications only.
    Native,
    /// Periodic scanning only.
    Polling,
}

/// Tunables for a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "toml",
    derive(serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct WatchConfig {
    /// Quiet period before a changed file is reloaded, in milliseconds.
    pub debounce_ms: u64,

    /// Change source selection.
    pub source: SourceSetting,

    /// Scan interval of the polling source, in milliseconds.
    pub poll_interval_ms: u64,
}

impl WatchConfig {
    /// Default debounce interval.
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

    /// Default polling interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// The debounce interval.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// The polling interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            source: SourceSetting::Auto,
            poll_interval_ms: 2000,
        }
    }
}

/// Errors from reading a [`WatchConfig`].
#[cfg(feature = "toml")]
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read watch config {path}")]
    #[diagnostic(code(hotreload::config::io))]
    Io {
        /// Path to the file.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error with a location.
    #[error("TOML parse error in {path}")]
    #[diagnostic(
        code(hotreload::config::parse_error),
        help("known keys are debounce_ms, source and poll_interval_ms")
    )]
    Parse {
        /// Path to the file.
        path: String,

        /// The file content.
        #[source_code]
        src: NamedSource<String>,

        /// Where the problem is.
        #[label("{message}")]
        span: SourceSpan,

        /// What went wrong.
        message: String,
    },

    /// TOML error without a location.
    #[error("TOML parse error: {message}")]
    #[diagnostic(code(hotreload::config::parse_error))]
    ParseNoSpan {
        /// What went wrong.
        message: String,
    },
}

#[cfg(feature = "toml")]
impl WatchConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| parse_error(&e, content, Path::new("<inline>")))
    }

    /// Reads a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| parse_error(&e, &content, path))
    }
}

#[cfg(feature = "toml")]
fn parse_error(e: &toml::de::Error, content: &str, path: &Path) -> ConfigError {
    match e.span() {
        Some(span) => ConfigError::Parse {
            path: path.display().to_string(),
            src: NamedSource::new(path.display().to_string(), content.to_string()),
            span: SourceSpan::new(span.start.into(), span.end - span.start),
            message: e.message().to_string(),
        },
        None => ConfigError::ParseNoSpan {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce(), WatchConfig::DEFAULT_DEBOUNCE);
        assert_eq!(config.poll_interval(), WatchConfig::DEFAULT_POLL_INTERVAL);
        assert_eq!(config.source, SourceSetting::Auto);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_from_toml_partial() {
        let config = WatchConfig::from_toml_str("source = \"polling\"\npoll_interval_ms = 50\n").unwrap();
        assert_eq!(config.source, SourceSetting::Polling);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.debounce_ms, 200);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_from_toml_unknown_key() {
        let err = WatchConfig::from_toml_str("debounce = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. } | ConfigError::ParseNoSpan { .. }));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(&path, "debounce_ms = 10\nsource = \"native\"\n").unwrap();

        let config = WatchConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(10));
        assert_eq!(config.source, SourceSetting::Native);

        let missing = WatchConfig::from_toml_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
