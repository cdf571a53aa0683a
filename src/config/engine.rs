use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::collisions::AllowCollision;
use crate::lands::index::{DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_storage_directory")]
    pub storage_directory: String,
    #[serde(default = "default_snapshot_directory")]
    pub snapshot_directory: String,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: u32,
    #[serde(default)]
    pub allow_collision: AllowCollision,
    #[serde(default)]
    pub use_economy: bool,
    #[serde(default = "default_price_per_block")]
    pub price_per_block: f64,
    #[serde(default = "default_priority")]
    pub default_priority: i16,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Optional TOML file with outside, world and land-type default settings.
    #[serde(default)]
    pub defaults_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_storage_directory() -> String {
    "./lands".to_string()
}
fn default_snapshot_directory() -> String {
    "./snapshots".to_string()
}
fn default_max_snapshots() -> u32 {
    10
}
fn default_price_per_block() -> f64 {
    0.0
}
fn default_priority() -> i16 {
    DEFAULT_PRIORITY
}
fn default_progress_interval_ms() -> u64 {
    250
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            log_level: default_log_level(),
            log_format: default_log_format(),
            storage_directory: default_storage_directory(),
            snapshot_directory: default_snapshot_directory(),
            max_snapshots: default_max_snapshots(),
            allow_collision: AllowCollision::default(),
            use_economy: false,
            price_per_block: default_price_per_block(),
            default_priority: default_priority(),
            progress_interval_ms: default_progress_interval_ms(),
            defaults_file: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// The defaults file path, relative paths taken from `base`.
    pub fn defaults_path(&self, base: &Path) -> Option<PathBuf> {
        self.defaults_file.as_ref().map(|file| base.join(file))
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.max_snapshots == 0 {
            errors.push(format!(
                "max_snapshots must be > 0, got {}. Example: max_snapshots = 10",
                self.max_snapshots
            ));
        }

        if !self.price_per_block.is_finite() || self.price_per_block < 0.0 {
            errors.push(format!(
                "price_per_block must be >= 0.0, got {}. Example: price_per_block = 0.5",
                self.price_per_block
            ));
        }

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.default_priority) {
            errors.push(format!(
                "default_priority must be {}-{}, got {}. Example: default_priority = 10",
                MIN_PRIORITY, MAX_PRIORITY, self.default_priority
            ));
        }

        if self.progress_interval_ms == 0 {
            errors.push(format!(
                "progress_interval_ms must be > 0, got {}. Example: progress_interval_ms = 250",
                self.progress_interval_ms
            ));
        }

        if self.storage_directory.trim().is_empty() {
            errors.push("storage_directory must not be empty. Example: storage_directory = \"./lands\"".to_string());
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            errors.push(format!(
                "log_format must be one of {:?}, got '{}'. Example: log_format = \"json\"",
                valid_formats, self.log_format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}
