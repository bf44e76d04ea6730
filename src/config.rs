//! Configuration module.
//!
//! Handles loading, validating, and merging `improc.toml`. A config file is
//! sparse: stock defaults are serialized to a TOML table, the user file is
//! merged over it key by key, and the result is deserialized and validated.
//!
//! ## Config File Location
//!
//! `improc --config <file>` reads that file. Without the flag, `improc.toml`
//! in the working directory is used when present, stock defaults otherwise.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [pool]
//! capacity = 4              # Processing handles (omit for auto = CPU cores)
//!
//! [processing]
//! max_workers = 4           # Parallel batch workers (omit for auto = CPU cores)
//!
//! [output]
//! quality = 85              # Default lossy quality (1-100)
//! filter = "lanczos"        # lanczos | triangle | nearest
//!
//! [text]
//! on_failure = "skip"       # skip | abort
//!
//! [logging]
//! level = "warn"            # RUST_LOG-style filter
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{ConvertOptions, Filter, Quality, TextFailurePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "improc.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `improc.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImprocConfig {
    /// Handle pool sizing.
    pub pool: PoolConfig,
    /// Parallel batch settings.
    pub processing: ProcessingConfig,
    /// Encoding defaults.
    pub output: OutputConfig,
    /// Text block behaviour.
    pub text: TextConfig,
    pub logging: LoggingConfig,
}

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

impl ImprocConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if self.pool.capacity == Some(0) {
            return Err(ConfigError::Validation(
                "pool.capacity must be at least 1".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            filter: self.output.filter,
            on_text_failure: self.text.on_failure,
        }
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Handle pool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of processing handles. When absent, one per CPU core.
    pub capacity: Option<usize>,
}

/// Resolve the effective pool capacity from config.
pub fn effective_capacity(config: &PoolConfig) -> usize {
    config.capacity.unwrap_or_else(available_cores)
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel batch workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = available_cores();
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Encoding defaults applied when a request does not say otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub quality: u32,
    pub filter: Filter,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
            filter: Filter::default(),
        }
    }
}

impl OutputConfig {
    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextConfig {
    pub on_failure: TextFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default log filter when neither `RUST_LOG` nor `--verbose` is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Stock defaults as a TOML table, the base every user file is merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ImprocConfig::default())?)
}

/// Recursively merge `overlay` into `base`. Tables merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ImprocConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ImprocConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used if present.
pub fn load_config(path: Option<&Path>) -> Result<ImprocConfig, ConfigError> {
    let overlay = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Some(toml::from_str(&content)?)
        }
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `improc.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# improc Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Pass a file with `improc --config <file>`, or name it improc.toml in the
# working directory. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Handle pool
# ---------------------------------------------------------------------------
[pool]
# Number of processing handles shared by all requests. Requests beyond this
# wait for a handle to be returned.
# Omit or comment out to auto-detect (= number of CPU cores).
# capacity = 4

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `improc batch`.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Lossy encoding quality used when a request gives none (1 = worst, 100 = best).
quality = 85

# Resampling filter: "lanczos", "triangle" or "nearest".
filter = "lanczos"

# ---------------------------------------------------------------------------
# Text block
# ---------------------------------------------------------------------------
[text]
# What to do when text cannot be rendered (missing font, nothing drawn):
# "skip" logs a warning and returns the image without text,
# "abort" fails the request.
on_failure = "skip"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# Log filter used when RUST_LOG is unset and --verbose is not given.
# One of: off, error, warn, info, debug, trace.
level = "warn"
"##
}
