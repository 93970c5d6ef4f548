//! Logging setup
//!
//! Structured logging via `tracing`. Level, format, and destination come from
//! [`LoggingConfig`] with environment overrides (`LOOM_LOG`,
//! `LOOM_LOG_FORMAT`, `LOOM_LOG_OUTPUT`, `LOOM_LOG_FILE`,
//! `LOOM_LOG_MODULES`).

use crate::error::OverlayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether logging is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file, file+stderr
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output includes file; None means the platform
    /// state directory default.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Colored output (text format, terminal destinations only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Resolve the log file path: `LOOM_LOG_FILE`, then the config file entry,
/// then the platform state directory.
pub fn resolve_log_file_path(config_file: Option<PathBuf>) -> Result<PathBuf, OverlayError> {
    if let Ok(env_path) = std::env::var("LOOM_LOG_FILE") {
        if !env_path.is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    if let Some(path) = config_file {
        if !path.as_os_str().is_empty() {
            return Ok(path);
        }
    }
    let dirs = directories::ProjectDirs::from("", "loomfs", "loomfs").ok_or_else(|| {
        OverlayError::Config("could not determine platform state directory for log file".into())
    })?;
    let state_dir = dirs
        .state_dir()
        .unwrap_or_else(|| dirs.data_local_dir())
        .to_path_buf();
    Ok(state_dir.join("loomfs.log"))
}

/// Initialize the global subscriber from config + environment overrides.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), OverlayError> {
    if config.map(|c| !c.enabled).unwrap_or(false) {
        Registry::default().with(EnvFilter::new("off")).init();
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let (writer, ansi) = determine_writer(config)?;

    let base = Registry::default().with(filter);
    if format == "json" {
        base.with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(writer),
        )
        .init();
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .init();
    }
    Ok(())
}

/// Build the env filter: `LOOM_LOG` wins, then config level plus per-module
/// directives from config and `LOOM_LOG_MODULES`.
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, OverlayError> {
    if let Ok(filter) = EnvFilter::try_from_env("LOOM_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let mut filter = EnvFilter::new(level);

    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                OverlayError::Config(format!("invalid log directive {}: {}", directive, e))
            })?);
        }
    }

    if let Ok(modules) = std::env::var("LOOM_LOG_MODULES") {
        for spec in modules.split(',') {
            let directive = spec.trim();
            if directive.is_empty() {
                continue;
            }
            filter = filter.add_directive(directive.parse().map_err(|e| {
                OverlayError::Config(format!("invalid log directive {}: {}", directive, e))
            })?);
        }
    }

    Ok(filter)
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<String, OverlayError> {
    let format = std::env::var("LOOM_LOG_FORMAT")
        .ok()
        .unwrap_or_else(|| config.map(|c| c.format.clone()).unwrap_or_else(default_format));
    if format != "json" && format != "text" {
        return Err(OverlayError::Config(format!(
            "invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }
    Ok(format)
}

/// Resolve the destination into one boxed writer plus the ansi flag.
fn determine_writer(config: Option<&LoggingConfig>) -> Result<(BoxMakeWriter, bool), OverlayError> {
    let output = std::env::var("LOOM_LOG_OUTPUT")
        .ok()
        .unwrap_or_else(|| config.map(|c| c.output.clone()).unwrap_or_else(default_output));
    let color = config.map(|c| c.color).unwrap_or(true);

    let open_file = || -> Result<std::fs::File, OverlayError> {
        let path = resolve_log_file_path(config.and_then(|c| c.file.clone()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OverlayError::Config(format!("failed to create log directory: {}", e))
            })?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| OverlayError::Config(format!("failed to open log file {:?}: {}", path, e)))
    };

    match output.as_str() {
        "stdout" => Ok((BoxMakeWriter::new(std::io::stdout), color)),
        "stderr" => Ok((BoxMakeWriter::new(std::io::stderr), color)),
        "file" => Ok((BoxMakeWriter::new(open_file()?), false)),
        "file+stderr" => Ok((
            BoxMakeWriter::new(open_file()?.and(std::io::stderr)),
            false,
        )),
        other => Err(OverlayError::Config(format!(
            "invalid log output: {} (must be 'stdout', 'stderr', 'file', or 'file+stderr')",
            other
        ))),
    }
}
