//! Engine configuration
//!
//! Stores settings in ~/.config/redline/config.json. Every field is optional
//! in the file; missing fields fall back to the documented defaults. A config
//! that parses but carries nonsense values (empty override keyword, retry
//! floor above the ceiling) is rejected at construction rather than at
//! review time.

use crate::review::Severity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Size and token ceilings for a single review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    #[serde(default = "default_max_files_per_review")]
    pub max_files_per_review: usize,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_total_size_bytes")]
    pub max_total_size_bytes: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_files_per_review: default_max_files_per_review(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_total_size_bytes: default_max_total_size_bytes(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_files_per_review() -> usize {
    50
}
fn default_max_file_size_bytes() -> u64 {
    1024 * 1024
}
fn default_max_total_size_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_max_tokens() -> u64 {
    4000
}

/// Retry budget and backoff bounds for review-service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_max_retry_delay_ms() -> u64 {
    10_000
}

/// Quality gate policy for production changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: Severity,
    #[serde(default = "default_true")]
    pub block_production: bool,
    #[serde(default = "default_true")]
    pub allow_urgent_override: bool,
    #[serde(default = "default_urgent_keyword")]
    pub urgent_keyword: String,
    #[serde(default = "default_max_overrides_per_day")]
    pub max_overrides_per_day: u32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            severity_threshold: default_severity_threshold(),
            block_production: true,
            allow_urgent_override: true,
            urgent_keyword: default_urgent_keyword(),
            max_overrides_per_day: default_max_overrides_per_day(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_severity_threshold() -> Severity {
    Severity::High
}
fn default_urgent_keyword() -> String {
    "URGENT".to_string()
}
fn default_max_overrides_per_day() -> u32 {
    3
}

/// Availability monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

fn default_check_interval_ms() -> u64 {
    30_000
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: SizeLimits,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub gate: GatePolicy,
    #[serde(default)]
    pub health: HealthConfig,
}

impl EngineConfig {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("redline"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location, or return defaults.
    ///
    /// A corrupt file is preserved with a `.corrupt` suffix so the settings
    /// are recoverable, and defaults are used for the session.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            error = %err,
                            "config file was corrupted; backup saved, defaults loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Missing fields use defaults;
    /// invalid values are rejected by [`EngineConfig::validate`].
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(&path, &content)
    }

    /// Validate construction-time invariants. These indicate a programming
    /// or config error at startup, so they are the one place the engine
    /// returns an error instead of degrading.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_retries == 0 {
            anyhow::bail!("retry.max_retries must be at least 1");
        }
        if self.retry.retry_delay_ms == 0 {
            anyhow::bail!("retry.retry_delay_ms must be positive");
        }
        if self.retry.retry_delay_ms > self.retry.max_retry_delay_ms {
            anyhow::bail!(
                "retry.retry_delay_ms ({}) exceeds retry.max_retry_delay_ms ({})",
                self.retry.retry_delay_ms,
                self.retry.max_retry_delay_ms
            );
        }
        if self.limits.max_files_per_review == 0 {
            anyhow::bail!("limits.max_files_per_review must be at least 1");
        }
        if self.limits.max_file_size_bytes == 0 || self.limits.max_total_size_bytes == 0 {
            anyhow::bail!("limits: file and total size ceilings must be positive");
        }
        if self.limits.max_file_size_bytes > self.limits.max_total_size_bytes {
            anyhow::bail!(
                "limits.max_file_size_bytes ({}) exceeds limits.max_total_size_bytes ({})",
                self.limits.max_file_size_bytes,
                self.limits.max_total_size_bytes
            );
        }
        if self.limits.max_tokens == 0 {
            anyhow::bail!("limits.max_tokens must be positive");
        }
        if self.gate.urgent_keyword.trim().is_empty() {
            anyhow::bail!("gate.urgent_keyword must not be empty");
        }
        Ok(())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_surface() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.max_files_per_review, 50);
        assert_eq!(config.limits.max_file_size_bytes, 1024 * 1024);
        assert_eq!(config.limits.max_total_size_bytes, 5 * 1024 * 1024);
        assert_eq!(config.limits.max_tokens, 4000);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay_ms, 1000);
        assert_eq!(config.retry.max_retry_delay_ms, 10_000);
        assert_eq!(config.gate.severity_threshold, Severity::High);
        assert!(config.gate.allow_urgent_override);
        assert_eq!(config.gate.urgent_keyword, "URGENT");
        assert_eq!(config.gate.max_overrides_per_day, 3);
        assert_eq!(config.health.check_interval_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: EngineConfig =
            serde_json::from_str(r#"{"retry": {"max_retries": 5}}"#).unwrap();
        assert_eq!(parsed.retry.max_retries, 5);
        assert_eq!(parsed.retry.retry_delay_ms, 1000);
        assert_eq!(parsed.limits.max_files_per_review, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.gate.urgent_keyword = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.retry_delay_ms = 20_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig::default();
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"gate": {"urgent_keyword": ""}}"#).unwrap();
        assert!(EngineConfig::load_from(&path).is_err());
    }
}
