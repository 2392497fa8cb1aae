//! Configuration for procpipe.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! [pipes]
//! strategy = "auto"        # auto | pipes | temp-files
//! pty = false
//! chunk_size = 16384
//! poll_interval_ms = 200
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use crate::engine::CHUNK_SIZE;
use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default readiness wait while blocking.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

// =============================================================================
// Top-level config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipes: PipesConfig,
    pub logging: LogConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(ConfigError::ParseFailed)?;
        config.pipes.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// =============================================================================
// Pipe set config
// =============================================================================

/// Which pipe set implementation to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Native pipes on Unix, temp files on Windows.
    #[default]
    Auto,
    /// Anonymous pipes, tty or pty with readiness polling. Unix only.
    Pipes,
    /// Output redirected to temporary files read back by offset.
    TempFiles,
}

impl StrategyKind {
    /// Resolve `Auto` for the current platform.
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(windows) => Self::TempFiles,
            Self::Auto => Self::Pipes,
            other => other,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pipes => "pipes",
            Self::TempFiles => "temp-files",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pipes" => Ok(Self::Pipes),
            "temp-files" | "temp_files" | "tempfiles" => Ok(Self::TempFiles),
            _ => Err(format!(
                "unknown strategy: {s}. Expected one of: auto, pipes, temp-files"
            )),
        }
    }
}

/// Settings consumed when a pipe set is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipesConfig {
    /// Bind all three channels to the controlling terminal.
    pub tty: bool,
    /// Bind all three channels to a freshly allocated pseudo-terminal.
    pub pty: bool,
    /// Send stdout and stderr to the null device.
    pub output_disabled: bool,
    pub strategy: StrategyKind,
    /// Bytes per read and per write attempt.
    pub chunk_size: usize,
    /// Upper bound on a blocking readiness wait, in milliseconds.
    pub poll_interval_ms: u64,
    /// Where the temp-file strategy creates its files. Defaults to the
    /// system temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for PipesConfig {
    fn default() -> Self {
        Self {
            tty: false,
            pty: false,
            output_disabled: false,
            strategy: StrategyKind::Auto,
            chunk_size: CHUNK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            temp_dir: None,
        }
    }
}

impl PipesConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn effective_strategy(&self) -> StrategyKind {
        self.strategy.resolve()
    }

    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError("chunk_size must be at least 1".into()).into());
        }
        if self.poll_interval_ms == 0 {
            return Err(
                ConfigError::ValidationError("poll_interval_ms must be at least 1".into()).into(),
            );
        }
        if cfg!(windows) {
            if self.tty {
                return Err(ConfigError::Unsupported("tty mode".into()).into());
            }
            if self.strategy == StrategyKind::Pipes {
                return Err(ConfigError::Unsupported("the pipes strategy".into()).into());
            }
        }
        if self.effective_strategy() == StrategyKind::TempFiles && (self.tty || self.pty) {
            return Err(ConfigError::ValidationError(
                "tty and pty modes require the pipes strategy".into(),
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// Log format
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_config_values() {
        let config = PipesConfig::default();
        assert!(!config.tty);
        assert!(!config.pty);
        assert!(!config.output_disabled);
        assert_eq!(config.strategy, StrategyKind::Auto);
        assert_eq!(config.chunk_size, 16384);
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.pipes, PipesConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_pipes_section() {
        let config = Config::from_toml_str(
            r#"
            [pipes]
            strategy = "temp-files"
            output_disabled = true
            chunk_size = 4096
            poll_interval_ms = 50
            temp_dir = "/var/tmp"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipes.strategy, StrategyKind::TempFiles);
        assert!(config.pipes.output_disabled);
        assert_eq!(config.pipes.chunk_size, 4096);
        assert_eq!(config.pipes.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.pipes.temp_dir(), PathBuf::from("/var/tmp"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = Config::from_toml_str("[pipes]\nstrategy = \"sockets\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = PipesConfig {
            chunk_size: 0,
            ..PipesConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = Config::from_toml_str("[pipes]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn rejects_pty_with_temp_files() {
        let config = PipesConfig {
            pty: true,
            strategy: StrategyKind::TempFiles,
            ..PipesConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ReadFailed { .. })));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procpipe.toml");
        std::fs::write(&path, "[pipes]\npty = true\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert!(config.pipes.pty);
    }

    #[test]
    fn strategy_resolution() {
        assert_eq!(StrategyKind::TempFiles.resolve(), StrategyKind::TempFiles);
        #[cfg(unix)]
        assert_eq!(StrategyKind::Auto.resolve(), StrategyKind::Pipes);
        #[cfg(windows)]
        assert_eq!(StrategyKind::Auto.resolve(), StrategyKind::TempFiles);
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!("auto".parse::<StrategyKind>().unwrap(), StrategyKind::Auto);
        assert_eq!("Temp-Files".parse::<StrategyKind>().unwrap(), StrategyKind::TempFiles);
        assert!("fifo".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::TempFiles.to_string(), "temp-files");
    }

    #[test]
    fn log_format_round_trip() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
