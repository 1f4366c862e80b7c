#![forbid(unsafe_code)]

//! Runtime knobs for the watch engine.
//!
//! | Knob | Default | Env |
//! |------|---------|-----|
//! | `check_positional` | on in debug builds | `FWATCH_CHECK_POSITIONAL` |
//! | `strict_pass_length` | off | `FWATCH_STRICT_PASS_LENGTH` |
//! | `trace_rebuilds` | off | `FWATCH_TRACE_REBUILDS` |
//!
//! Env values accept `1/true/yes/on` and `0/false/no/off` (case-insensitive).
//! Anything else leaves the default in place and logs a warning.
//!
//! With the `policy-config` feature the same struct loads from TOML or JSON.

#[cfg(feature = "policy-config")]
use std::path::{Path, PathBuf};

pub const ENV_CHECK_POSITIONAL: &str = "FWATCH_CHECK_POSITIONAL";
pub const ENV_STRICT_PASS_LENGTH: &str = "FWATCH_STRICT_PASS_LENGTH";
pub const ENV_TRACE_REBUILDS: &str = "FWATCH_TRACE_REBUILDS";

/// Watch engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct WatchConfig {
    /// A kind or type mismatch at the cursor is an error. When off, the
    /// stale entry is torn down and replaced.
    pub check_positional: bool,
    /// A pass that visits fewer entries than the list holds is an error
    /// instead of a warning.
    pub strict_pass_length: bool,
    /// Log every rebuild request at debug level.
    pub trace_rebuilds: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            check_positional: cfg!(debug_assertions),
            strict_pass_length: false,
            trace_rebuilds: false,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn with_check_positional(mut self, on: bool) -> Self {
        self.check_positional = on;
        self
    }

    #[must_use]
    pub fn with_strict_pass_length(mut self, on: bool) -> Self {
        self.strict_pass_length = on;
        self
    }

    #[must_use]
    pub fn with_trace_rebuilds(mut self, on: bool) -> Self {
        self.trace_rebuilds = on;
        self
    }

    /// Defaults overridden by the `FWATCH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `FWATCH_*`
    /// keys.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let apply = |key: &str, field: &mut bool| {
            let Some(raw) = lookup(key) else { return };
            match parse_flag(&raw) {
                Some(value) => *field = value,
                None => tracing::warn!(key, value = %raw, "ignoring unrecognised flag value"),
            }
        };
        apply(ENV_CHECK_POSITIONAL, &mut config.check_positional);
        apply(ENV_STRICT_PASS_LENGTH, &mut config.strict_pass_length);
        apply(ENV_TRACE_REBUILDS, &mut config.trace_rebuilds);
        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let value = raw.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
    {
        Some(true)
    } else if ["0", "false", "no", "off"]
        .iter()
        .any(|f| value.eq_ignore_ascii_case(f))
    {
        Some(false)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

/// Failure to load a [`WatchConfig`] from text or a file.
#[cfg(feature = "policy-config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML watch config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON watch config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config extension for {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),
}

#[cfg(feature = "policy-config")]
impl WatchConfig {
    /// Parse TOML. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Toml`] on malformed input or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Parse JSON. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] on malformed input or unknown keys.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// I/O failures, parse failures, or an unknown extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        tracing::debug!(path = %path.display(), ?config, "watch config loaded");
        Ok(config)
    }
}
