//! Configuration loading for Handoff.
//!
//! Settings live in the `[dispatch]` section of `~/.handoff/config.toml`:
//!
//! ```toml
//! [dispatch]
//! poll_interval_ms = 20
//! realize_timeout_ms = 5000
//! poller_thread_name = "handoff-readiness"
//! capture_backtraces = true
//! ```
//!
//! Every key is optional. A missing file means defaults. Two environment
//! variables override the file: `HANDOFF_POLL_INTERVAL_MS` and
//! `HANDOFF_REALIZE_TIMEOUT_MS`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;

/// How often an unrealized surface is re-checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_POLLER_THREAD_NAME: &str = "handoff-readiness";

pub const POLL_INTERVAL_ENV: &str = "HANDOFF_POLL_INTERVAL_MS";
pub const REALIZE_TIMEOUT_ENV: &str = "HANDOFF_REALIZE_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    dispatch: Option<DispatchSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchSection {
    poll_interval_ms: Option<u64>,
    realize_timeout_ms: Option<u64>,
    poller_thread_name: Option<String>,
    capture_backtraces: Option<bool>,
}

/// Runtime settings for a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    poll_interval: Duration,
    realize_timeout: Option<Duration>,
    poller_thread_name: String,
    capture_backtraces: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            realize_timeout: None,
            poller_thread_name: DEFAULT_POLLER_THREAD_NAME.to_string(),
            capture_backtraces: true,
        }
    }
}

impl DispatchConfig {
    /// Load from the default path, then apply environment overrides.
    ///
    /// Never fails: a missing file yields defaults, and a broken one is
    /// logged and ignored.
    #[must_use]
    pub fn load() -> Self {
        let from_file = match config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!("{err}; using default dispatch settings");
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        from_file.with_env_overrides()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse TOML content. `path` is only used for error messages.
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_section(file.dispatch.unwrap_or_default())
    }

    fn from_section(section: DispatchSection) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = match section.poll_interval_ms {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    field: "poll_interval_ms",
                    reason: "must be greater than zero".to_string(),
                });
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.poll_interval,
        };

        let poller_thread_name = match section.poller_thread_name {
            Some(name) if name.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    field: "poller_thread_name",
                    reason: "must not be empty".to_string(),
                });
            }
            Some(name) => name,
            None => defaults.poller_thread_name,
        };

        Ok(Self {
            poll_interval,
            realize_timeout: section.realize_timeout_ms.map(Duration::from_millis),
            poller_thread_name,
            capture_backtraces: section
                .capture_backtraces
                .unwrap_or(defaults.capture_backtraces),
        })
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// logged and skipped.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            match parse_millis(&raw) {
                Some(ms) if ms > 0 => self.poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(
                    env_var = POLL_INTERVAL_ENV,
                    value = %raw,
                    "Ignoring invalid poll interval override"
                ),
            }
        }
        if let Some(raw) = lookup(REALIZE_TIMEOUT_ENV) {
            match parse_millis(&raw) {
                Some(ms) => self.realize_timeout = Some(Duration::from_millis(ms)),
                None => tracing::warn!(
                    env_var = REALIZE_TIMEOUT_ENV,
                    value = %raw,
                    "Ignoring invalid realize timeout override"
                ),
            }
        }
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_realize_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.realize_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_capture_backtraces(mut self, capture: bool) -> Self {
        self.capture_backtraces = capture;
        self
    }

    #[must_use]
    pub fn with_poller_thread_name(mut self, name: impl Into<String>) -> Self {
        self.poller_thread_name = name.into();
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// `None` means wait forever for a surface to be realized.
    #[must_use]
    pub fn realize_timeout(&self) -> Option<Duration> {
        self.realize_timeout
    }

    #[must_use]
    pub fn poller_thread_name(&self) -> &str {
        &self.poller_thread_name
    }

    #[must_use]
    pub fn capture_backtraces(&self) -> bool {
        self.capture_backtraces
    }
}

fn parse_millis(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".handoff").join("config.toml"))
}
