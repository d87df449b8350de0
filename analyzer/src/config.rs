//! Configuration loading for testrun-analyzer
//!
//! Configuration is loaded from:
//! 1. Environment variables AZURE_DEVOPS_ORG_URL / AZURE_DEVOPS_PROJECT / AZURE_DEVOPS_PAT
//! 2. Environment variable TESTRUN_ANALYZER_CONFIG (path to a TOML file)
//! 3. ~/.binks/testrun-analyzer.toml
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Report cache used by long-running surfaces
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Azure DevOps connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    /// e.g. https://dev.azure.com/contoso
    #[serde(default)]
    pub organization_url: String,
    #[serde(default)]
    pub project: String,
    /// Personal access token (basic auth)
    #[serde(default, skip_serializing)]
    pub pat: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Page size for `$top`-paged endpoints
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// How far back run history is collected
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    /// Width of each run-listing time window
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Concurrent result fetches per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Change points closer than this to a group's first date join the group
    #[serde(default = "default_cluster_window_days")]
    pub cluster_window_days: u32,
    /// Largest ± window searched around an event date
    #[serde(default = "default_max_buffer_days")]
    pub max_buffer_days: u32,
    /// Minimum day-over-day increase for a change point
    #[serde(default)]
    pub min_roc: i64,
    /// Runs whose name contains any of these (case-insensitive) are ignored
    #[serde(default = "default_denylist")]
    pub run_name_denylist: Vec<String>,
}

/// Result Fetcher retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Report cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

// Default value functions
fn default_api_version() -> String {
    "7.1".to_string()
}

fn default_page_size() -> usize {
    200
}

fn default_user_agent() -> String {
    "testrun-analyzer/0.1".to_string()
}

fn default_history_days() -> u32 {
    365
}

fn default_window_days() -> u32 {
    7 // upstream rejects wider run queries
}

fn default_batch_size() -> usize {
    100
}

fn default_cluster_window_days() -> u32 {
    14
}

fn default_max_buffer_days() -> u32 {
    5
}

fn default_denylist() -> Vec<String> {
    vec!["development".into(), "dev".into(), "cloned".into()]
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    900 // 15 minutes
}

fn default_cache_capacity() -> usize {
    32
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            organization_url: String::new(),
            project: String::new(),
            pat: None,
            api_version: default_api_version(),
            page_size: default_page_size(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            window_days: default_window_days(),
            batch_size: default_batch_size(),
            cluster_window_days: default_cluster_window_days(),
            max_buffer_days: default_max_buffer_days(),
            min_roc: 0,
            run_name_denylist: default_denylist(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_seconds: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

impl FetchConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            Some(_) => {
                tracing::info!("Config file not found, using defaults");
                Self::default()
            }
            None => {
                tracing::info!("No config path specified, using defaults");
                Self::default()
            }
        };

        config.apply_env();
        Ok(config)
    }

    /// Load from a specific path (no environment overrides)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Environment variables take precedence over file values
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("AZURE_DEVOPS_ORG_URL") {
            self.azure.organization_url = url;
        }
        if let Ok(project) = std::env::var("AZURE_DEVOPS_PROJECT") {
            self.azure.project = project;
        }
        if let Ok(pat) = std::env::var("AZURE_DEVOPS_PAT") {
            self.azure.pat = Some(pat);
        }
    }

    /// Find the configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TESTRUN_ANALYZER_CONFIG") {
            return Some(PathBuf::from(path));
        }

        if let Ok(home) = std::env::var("HOME") {
            return Some(
                PathBuf::from(home)
                    .join(".binks")
                    .join("testrun-analyzer.toml"),
            );
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis.window_days, 7);
        assert_eq!(config.analysis.batch_size, 100);
        assert_eq!(config.analysis.cluster_window_days, 14);
        assert_eq!(config.analysis.max_buffer_days, 5);
        assert_eq!(config.analysis.min_roc, 0);
        assert_eq!(
            config.analysis.run_name_denylist,
            vec!["development", "dev", "cloned"]
        );
        assert_eq!(config.azure.api_version, "7.1");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[azure]
organization_url = "https://dev.azure.com/contoso"
project = "Shop"

[analysis]
min_roc = 25
max_buffer_days = 3
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.azure.project, "Shop");
        assert_eq!(config.azure.page_size, 200);
        assert_eq!(config.analysis.min_roc, 25);
        assert_eq!(config.analysis.max_buffer_days, 3);
        assert_eq!(config.analysis.history_days, 365);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_pat_is_not_serialized() {
        let mut config = Config::default();
        config.azure.pat = Some("secret".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
