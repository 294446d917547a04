//! Configuration for dxsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DX_API_TOKEN, DX_API_URL, PULSAR_API_URL, PULSAR_API_KEY)
//! 2. Config file (.dxsync/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - An explicit path (`--config` / DXSYNC_CONFIG) wins
//! - Otherwise searches current directory and parents for .dxsync/config.yaml
//! - Falls back to ~/.dxsync/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{DnanexusConfig, PulsarConfig, RetryPolicy};
use crate::core::{PassLimits, SyncOptions};
use crate::domain::FilterCriteria;

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".dxsync";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub lims: LimsSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSection {
    pub api_url: Option<String>,
    pub token: Option<String>,
    /// Projects to scan (empty = all visible)
    #[serde(default)]
    pub projects: Vec<String>,
    /// File name globs
    #[serde(default)]
    pub file_patterns: Vec<String>,
    pub include_analyses: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimsSection {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncSection {
    pub concurrency: Option<usize>,
    pub pass_timeout_seconds: Option<u64>,
    pub call_timeout_seconds: Option<u64>,
    pub max_objects: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub dnanexus: DnanexusConfig,
    pub pulsar: PulsarConfig,
    /// Default filter, before CLI flags are applied
    pub filter: FilterCriteria,
    pub sync: SyncOptions,
    pub retry: RetryPolicy,
    /// Timeout of a single adapter call
    pub call_timeout: Duration,
}

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

impl ResolvedConfig {
    /// Load configuration from the file system and the process environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let cwd = std::env::current_dir().context("Failed to determine current directory")?;
                find_config_file(&cwd).or_else(home_config_file)
            }
        };

        let file = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file, config_file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed file with environment overrides
    pub fn resolve(
        file: ConfigFile,
        config_file: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let defaults = DnanexusConfig::default();
        let dnanexus = DnanexusConfig {
            api_url: env("DX_API_URL")
                .or(file.source.api_url)
                .unwrap_or(defaults.api_url),
            token: env("DX_API_TOKEN").or(file.source.token).unwrap_or_default(),
        };

        let pulsar = PulsarConfig {
            api_url: env("PULSAR_API_URL").or(file.lims.api_url).unwrap_or_default(),
            api_key: env("PULSAR_API_KEY").or(file.lims.api_key).unwrap_or_default(),
        };

        let filter = FilterCriteria {
            projects: file.source.projects,
            file_patterns: file.source.file_patterns,
            include_analyses: file.source.include_analyses.unwrap_or(true),
            ..Default::default()
        };

        let default_limits = PassLimits::default();
        let sync = SyncOptions {
            concurrency: file.sync.concurrency.unwrap_or(SyncOptions::default().concurrency),
            limits: PassLimits {
                max_objects: file.sync.max_objects,
                pass_timeout_seconds: file
                    .sync
                    .pass_timeout_seconds
                    .unwrap_or(default_limits.pass_timeout_seconds),
            },
        };

        Self {
            config_file,
            dnanexus,
            pulsar,
            filter,
            sync,
            retry: file.sync.retry.unwrap_or_default(),
            call_timeout: Duration::from_secs(
                file.sync
                    .call_timeout_seconds
                    .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
            ),
        }
    }

    /// DNAnexus settings, if usable
    pub fn require_source(&self) -> Result<&DnanexusConfig> {
        if self.dnanexus.token.is_empty() {
            anyhow::bail!("No DNAnexus token configured. Set DX_API_TOKEN or source.token");
        }
        Ok(&self.dnanexus)
    }

    /// Pulsar settings, if usable
    pub fn require_lims(&self) -> Result<&PulsarConfig> {
        if self.pulsar.api_url.is_empty() {
            anyhow::bail!("No Pulsar URL configured. Set PULSAR_API_URL or lims.api_url");
        }
        if self.pulsar.api_key.is_empty() {
            anyhow::bail!("No Pulsar API key configured. Set PULSAR_API_KEY or lims.api_key");
        }
        Ok(&self.pulsar)
    }

    /// Human-readable dump with secrets redacted
    pub fn render(&self) -> String {
        let config_file = self
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string());
        let pulsar_url = if self.pulsar.api_url.is_empty() {
            "(not set)"
        } else {
            self.pulsar.api_url.as_str()
        };
        let max_objects = self
            .sync
            .limits
            .max_objects
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(unlimited)".to_string());

        let lines = [
            format!("Config file: {}", config_file),
            String::new(),
            "Source (DNAnexus):".to_string(),
            format!("  API URL:          {}", self.dnanexus.api_url),
            format!("  Token:            {}", redact(&self.dnanexus.token)),
            format!("  Projects:         {}", list_or(&self.filter.projects, "(all visible)")),
            format!("  File patterns:    {}", list_or(&self.filter.file_patterns, "(all files)")),
            format!("  Include analyses: {}", self.filter.include_analyses),
            String::new(),
            "LIMS (Pulsar):".to_string(),
            format!("  API URL:          {}", pulsar_url),
            format!("  API key:          {}", redact(&self.pulsar.api_key)),
            String::new(),
            "Sync:".to_string(),
            format!("  Concurrency:      {}", self.sync.concurrency),
            format!("  Pass timeout:     {}s", self.sync.limits.pass_timeout_seconds),
            format!("  Call timeout:     {}s", self.call_timeout.as_secs()),
            format!("  Max objects:      {}", max_objects),
            format!(
                "  Retry:            {} attempts, {}ms initial, {}ms max, x{}",
                self.retry.max_attempts,
                self.retry.initial_delay_ms,
                self.retry.max_delay_ms,
                self.retry.backoff_multiplier
            ),
        ];

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "********"
    }
}

fn list_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    path.exists().then_some(path)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
