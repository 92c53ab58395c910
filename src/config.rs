//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::registry::NetworkSelection;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    pub sweep: SweepConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl StorageConfig {
    pub fn health_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("health.json")
    }

    pub fn accounts_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("accounts.json")
    }

    pub fn transfers_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("transfers.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Single sweep target for every account on every backend
    pub destination: String,
    /// Backend class enabled for newly imported accounts
    #[serde(default)]
    pub network: NetworkSelection,
    /// Compute sweeps but never sign or submit
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_probe_jitter_ms")]
    pub probe_jitter_ms: u64,
    /// Number of top-priority backends connected eagerly at startup
    #[serde(default = "default_warmup_backends")]
    pub warmup_backends: usize,
}

impl ScanConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn probe_jitter(&self) -> Duration {
        Duration::from_millis(self.probe_jitter_ms)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            batch_delay_ms: default_batch_delay_ms(),
            probe_jitter_ms: default_probe_jitter_ms(),
            warmup_backends: default_warmup_backends(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    #[serde(default = "default_balance_attempts")]
    pub balance_attempts: u32,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_retry_step_ms")]
    pub retry_step_ms: u64,
}

impl RpcConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_attempts: default_probe_attempts(),
            balance_attempts: default_balance_attempts(),
            send_timeout_ms: default_send_timeout_ms(),
            retry_step_ms: default_retry_step_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Consecutive errors after which a backend is suspended
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Every Nth attempt on a suspended backend is let through as a recovery probe
    #[serde(default = "default_recovery_every")]
    pub recovery_every: u64,
    /// Consecutive transient errors logged at warn before dropping to debug
    #[serde(default = "default_log_repeat_limit")]
    pub log_repeat_limit: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            recovery_every: default_recovery_every(),
            log_repeat_limit: default_log_repeat_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendsConfig {
    /// Backend id -> replacement endpoint URL
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    /// Backend ids removed from the registry entirely
    #[serde(default)]
    pub disabled: Vec<String>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    2
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_probe_jitter_ms() -> u64 {
    200
}

fn default_warmup_backends() -> usize {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_liveness_timeout_ms() -> u64 {
    6000
}

fn default_probe_timeout_ms() -> u64 {
    8000
}

fn default_probe_attempts() -> u32 {
    3
}

fn default_balance_attempts() -> u32 {
    2
}

fn default_send_timeout_ms() -> u64 {
    15_000
}

fn default_retry_step_ms() -> u64 {
    500
}

fn default_error_threshold() -> u32 {
    5
}

fn default_recovery_every() -> u64 {
    10
}

fn default_log_repeat_limit() -> u32 {
    3
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("storage.data_dir", default_data_dir())?
            .set_default("monitor.interval_secs", default_interval_secs() as i64)?
            .set_default("scan.batch_size", default_batch_size() as i64)?
            .set_default("scan.max_concurrent", default_max_concurrent() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables, e.g. SWEEPER_SWEEP__DESTINATION
            .add_source(
                config::Environment::with_prefix("SWEEPER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.destination_address()?;

        if self.scan.batch_size == 0 {
            anyhow::bail!("scan.batch_size must be at least 1");
        }

        if self.scan.max_concurrent == 0 {
            anyhow::bail!("scan.max_concurrent must be at least 1");
        }

        if self.rpc.probe_attempts == 0 || self.rpc.balance_attempts == 0 {
            anyhow::bail!("rpc.probe_attempts and rpc.balance_attempts must be at least 1");
        }

        if self.monitor.interval_secs == 0 {
            anyhow::bail!("monitor.interval_secs must be at least 1");
        }

        if self.health.error_threshold == 0 {
            anyhow::bail!("health.error_threshold must be at least 1");
        }

        if self.health.recovery_every == 0 {
            anyhow::bail!("health.recovery_every must be at least 1");
        }

        for (id, endpoint) in &self.backends.overrides {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid override URL for backend {}: {}", id, endpoint))?;
        }

        if self.sweep.dry_run {
            tracing::warn!("sweep.dry_run is enabled - balances are reported but never swept");
        }

        Ok(())
    }

    /// Parsed sweep destination
    pub fn destination_address(&self) -> Result<alloy::primitives::Address> {
        self.sweep
            .destination
            .trim()
            .parse()
            .with_context(|| format!("Invalid sweep.destination: {}", self.sweep.destination))
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let overrides: Vec<String> = self
            .backends
            .overrides
            .iter()
            .map(|(id, endpoint)| format!("{}={}", id, mask_url(endpoint)))
            .collect();

        format!(
            r#"Configuration:
  Storage:
    data_dir: {}
  Sweep:
    destination: {}
    network: {}
    dry_run: {}
  Scan:
    batch_size: {}
    max_concurrent: {}
    batch_delay: {}ms
    probe_jitter: {}ms
    warmup_backends: {}
  Monitor:
    interval: {:?}
  RPC:
    connect/read timeout: {}ms/{}ms
    probe timeout: {}ms x{}
    send timeout: {}ms
  Health:
    error_threshold: {}
    recovery_every: {}
  Backends:
    overrides: {:?}
    disabled: {:?}
"#,
            self.storage.data_dir,
            self.sweep.destination,
            self.sweep.network,
            self.sweep.dry_run,
            self.scan.batch_size,
            self.scan.max_concurrent,
            self.scan.batch_delay_ms,
            self.scan.probe_jitter_ms,
            self.scan.warmup_backends,
            self.monitor.interval(),
            self.rpc.connect_timeout_ms,
            self.rpc.read_timeout_ms,
            self.rpc.probe_timeout_ms,
            self.rpc.probe_attempts,
            self.rpc.send_timeout_ms,
            self.health.error_threshold,
            self.health.recovery_every,
            overrides,
            self.backends.disabled,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            sweep: SweepConfig {
                destination: String::new(),
                network: NetworkSelection::default(),
                dry_run: false,
            },
            scan: ScanConfig::default(),
            monitor: MonitorConfig::default(),
            rpc: RpcConfig::default(),
            health: HealthConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}
