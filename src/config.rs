use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Number of shards the merged rule list is split into.
    #[serde(default = "default_parts")]
    pub parts: usize,

    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    /// Optional plain-text list of source URLs, one per line.
    #[serde(default = "default_urls_file")]
    pub urls_file: String,

    #[serde(default)]
    pub sources: HashMap<String, String>,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub partition: PartitionConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub updates: UpdateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    #[serde(default = "default_dns_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_dns_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default)]
    pub upstream_servers: Vec<String>,
    #[serde(default = "default_resolution_policy")]
    pub resolution_policy: String,
    #[serde(default = "default_bootstrap_dns")]
    pub bootstrap_dns: Vec<String>,
    /// Well-known names probed before a shard run; if none resolves the run
    /// is aborted. Empty disables the probe.
    #[serde(default = "default_canary_domains")]
    pub canary_domains: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    #[serde(default = "default_balance_threshold")]
    pub balance_threshold: usize,
    #[serde(default = "default_balance_move_limit")]
    pub balance_move_limit: usize,
}

/// Thresholds driving the rule lifecycle. Every value is a tunable; the
/// defaults are the reference policy.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    #[serde(default = "default_discard_threshold")]
    pub discard_threshold: u32,
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: u32,
    #[serde(default = "default_write_counter_max")]
    pub write_counter_max: u32,
    #[serde(default = "default_gc_reset_threshold")]
    pub gc_reset_threshold: u32,
    #[serde(default = "default_gc_reset_value")]
    pub gc_reset_value: u32,
    #[serde(default = "default_gc_purge_ceiling")]
    pub gc_purge_ceiling: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdateConfig {
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Status event sinks. "console" logs each event; "memory" keeps the
    /// most recent ones, replayed when a run fails.
    #[serde(default = "default_event_sinks")]
    pub events: Vec<String>,
}

// Defaults
fn default_parts() -> usize {
    16
}
fn default_tmp_dir() -> String {
    "tmp".to_string()
}
fn default_dist_dir() -> String {
    "dist".to_string()
}
fn default_urls_file() -> String {
    "urls.txt".to_string()
}
fn default_dns_timeout_ms() -> u64 {
    2000
}
fn default_dns_concurrency() -> usize {
    80
}
fn default_progress_every() -> usize {
    540
}
fn default_resolution_policy() -> String {
    "round-robin".to_string()
}
fn default_bootstrap_dns() -> Vec<String> {
    vec!["8.8.8.8:53".to_string()]
}
fn default_canary_domains() -> Vec<String> {
    vec!["example.com".to_string(), "google.com".to_string()]
}
fn default_balance_threshold() -> usize {
    1
}
fn default_balance_move_limit() -> usize {
    50
}
fn default_discard_threshold() -> u32 {
    4
}
fn default_skip_threshold() -> u32 {
    7
}
fn default_write_counter_max() -> u32 {
    6
}
fn default_gc_reset_threshold() -> u32 {
    24
}
fn default_gc_reset_value() -> u32 {
    6
}
fn default_gc_purge_ceiling() -> u32 {
    28
}
fn default_concurrent_downloads() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_event_sinks() -> Vec<String> {
    vec!["console".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parts: default_parts(),
            tmp_dir: default_tmp_dir(),
            dist_dir: default_dist_dir(),
            urls_file: default_urls_file(),
            sources: HashMap::new(),
            dns: DnsConfig::default(),
            partition: PartitionConfig::default(),
            lifecycle: LifecycleConfig::default(),
            updates: UpdateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dns_timeout_ms(),
            concurrency: default_dns_concurrency(),
            progress_every: default_progress_every(),
            upstream_servers: vec![],
            resolution_policy: default_resolution_policy(),
            bootstrap_dns: default_bootstrap_dns(),
            canary_domains: default_canary_domains(),
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            balance_threshold: default_balance_threshold(),
            balance_move_limit: default_balance_move_limit(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            discard_threshold: default_discard_threshold(),
            skip_threshold: default_skip_threshold(),
            write_counter_max: default_write_counter_max(),
            gc_reset_threshold: default_gc_reset_threshold(),
            gc_reset_value: default_gc_reset_value(),
            gc_purge_ceiling: default_gc_purge_ceiling(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: default_concurrent_downloads(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            events: default_event_sinks(),
        }
    }
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.parts > 0, "parts must be at least 1");
        anyhow::ensure!(self.dns.concurrency > 0, "dns.concurrency must be at least 1");
        anyhow::ensure!(
            self.lifecycle.write_counter_max > 0,
            "lifecycle.write_counter_max must be at least 1"
        );
        Ok(())
    }

    /// Configured sources sorted by name so fetch order is deterministic.
    pub fn get_sources_sorted(&self) -> Vec<(String, String)> {
        let mut list: Vec<_> = self
            .sources
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}
