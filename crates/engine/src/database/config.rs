//! Engine configuration via `vellum.toml`
//!
//! On first open of a data directory, a default `vellum.toml` is created next
//! to the data. To change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vellum_core::{Error, Result};

/// Config file name placed in the engine data directory.
pub const CONFIG_FILE_NAME: &str = "vellum.toml";

/// Default capacity: 5 MiB, the usual quota of a browser-style local store
pub const DEFAULT_CAPACITY_BYTES: u64 = 5 * 1024 * 1024;

fn default_capacity_bytes() -> u64 {
    DEFAULT_CAPACITY_BYTES
}

fn default_draft_retention_days() -> u32 {
    30
}

fn default_warning_percent() -> u8 {
    80
}

fn default_critical_percent() -> u8 {
    90
}

fn default_true() -> bool {
    true
}

/// Engine configuration loaded from `vellum.toml`.
///
/// # Example
///
/// ```toml
/// capacity_bytes = 5242880
/// draft_retention_days = 30
/// warning_percent = 80
/// critical_percent = 90
/// migrate_on_open = true
/// scan_on_open = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity bound of the store in bytes.
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,
    /// Drafts older than this many days are purged by the scanner.
    #[serde(default = "default_draft_retention_days")]
    pub draft_retention_days: u32,
    /// Usage above this percentage reports `warning`.
    #[serde(default = "default_warning_percent")]
    pub warning_percent: u8,
    /// Usage above this percentage reports `critical`.
    #[serde(default = "default_critical_percent")]
    pub critical_percent: u8,
    /// Convert legacy monolithic blobs when the engine opens.
    #[serde(default = "default_true")]
    pub migrate_on_open: bool,
    /// Run an integrity scan when the engine opens.
    #[serde(default)]
    pub scan_on_open: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            draft_retention_days: default_draft_retention_days(),
            warning_percent: default_warning_percent(),
            critical_percent: default_critical_percent(),
            migrate_on_open: true,
            scan_on_open: false,
        }
    }
}

impl EngineConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a zero capacity or retention, thresholds
    /// above 100, or a warning threshold not below the critical one.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes == 0 {
            return Err(Error::invalid("capacity_bytes must be greater than zero"));
        }
        if self.draft_retention_days == 0 {
            return Err(Error::invalid("draft_retention_days must be greater than zero"));
        }
        if self.warning_percent > 100 || self.critical_percent > 100 {
            return Err(Error::invalid("usage thresholds must be between 0 and 100"));
        }
        if self.warning_percent >= self.critical_percent {
            return Err(Error::invalid(format!(
                "warning_percent ({}) must be below critical_percent ({})",
                self.warning_percent, self.critical_percent
            )));
        }
        Ok(())
    }

    /// Draft retention window
    pub fn draft_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.draft_retention_days) * 24 * 60 * 60)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Vellum engine configuration
#
# Capacity bound of the store in bytes (default: 5 MiB).
# Writes that would exceed it fail and are rolled back.
capacity_bytes = 5242880

# Autosave drafts older than this many days are purged by the
# integrity scanner (default: 30).
draft_retention_days = 30

# Usage report thresholds in percent of capacity.
#   above warning_percent  -> "warning"
#   above critical_percent -> "critical"
warning_percent = 80
critical_percent = 90

# Convert legacy monolithic blobs to the tiered layout on open.
migrate_on_open = true

# Run an integrity scan on open.
scan_on_open = false
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
