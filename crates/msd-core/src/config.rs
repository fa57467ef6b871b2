use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of consecutive failed attempts per worker (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Range-fetch transport knobs (optional `[transport]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connect timeout in seconds for probes and range fetches.
    pub connect_timeout_secs: u64,
    /// Hard timeout in seconds for a probe.
    pub probe_timeout_secs: u64,
    /// Abort a range fetch when throughput stays below this many bytes/s...
    pub low_speed_limit: u32,
    /// ...for this many seconds.
    pub low_speed_time_secs: u64,
    /// Per-connection receive cap in bytes per second (None = no cap).
    #[serde(default)]
    pub max_recv_speed: Option<u64>,
    /// Receive buffer size hint in bytes (None = libcurl default).
    #[serde(default)]
    pub buffer_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            probe_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            max_recv_speed: None,
            buffer_size: None,
        }
    }
}

/// Global configuration loaded from `~/.config/msd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsdConfig {
    /// Ceiling on concurrently registered workers for one download.
    pub max_total_connections: usize,
    /// Workers per host for plain (unauthenticated HTTP) sources.
    pub max_connections_per_host: usize,
    /// Absolute cap on probes issued for one download.
    pub max_probes: usize,
    /// Bounded wait for stream writers to drain before the final rename.
    pub drain_timeout_secs: u64,
    /// Length of one bounded wait slice in the dispatch loop and readers.
    pub wait_slice_millis: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional transport settings; if missing, built-in defaults are used.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

impl Default for MsdConfig {
    fn default() -> Self {
        Self {
            max_total_connections: 16,
            max_connections_per_host: 4,
            max_probes: 64,
            drain_timeout_secs: 30,
            wait_slice_millis: 500,
            retry: None,
            transport: None,
        }
    }
}

impl MsdConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_millis.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("msd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MsdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MsdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: MsdConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = MsdConfig::default();
        assert_eq!(cfg.max_total_connections, 16);
        assert_eq!(cfg.max_connections_per_host, 4);
        assert_eq!(cfg.max_probes, 64);
        assert_eq!(cfg.drain_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.wait_slice(), Duration::from_millis(500));
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MsdConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MsdConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_total_connections, cfg.max_total_connections);
        assert_eq!(parsed.max_connections_per_host, cfg.max_connections_per_host);
        assert_eq!(parsed.max_probes, cfg.max_probes);
        assert!(parsed.retry.is_none());
        assert!(parsed.transport.is_none());
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            max_total_connections = 32
            max_connections_per_host = 2
            max_probes = 10
            drain_timeout_secs = 5
            wait_slice_millis = 0

            [retry]
            max_attempts = 3
            base_delay_secs = 0.5
            max_delay_secs = 15

            [transport]
            connect_timeout_secs = 5
            probe_timeout_secs = 10
            low_speed_limit = 512
            low_speed_time_secs = 30
            max_recv_speed = 1_000_000
        "#;
        let cfg: MsdConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_total_connections, 32);
        assert_eq!(cfg.wait_slice(), Duration::from_millis(1));
        let retry = cfg.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert!((retry.base_delay_secs - 0.5).abs() < 1e-9);
        let transport = cfg.transport.as_ref().unwrap();
        assert_eq!(transport.max_recv_speed, Some(1_000_000));
        assert!(transport.buffer_size.is_none());
    }
}
