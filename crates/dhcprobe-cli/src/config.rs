//! Configuration loading and validation

use anyhow::{Context, Result};
use dhcprobe_core::frame::{ETHERNET_HEADER_LEN, IPV4_HEADER_LEN, UDP_HEADER_LEN};
use dhcprobe_core::message::BOOTP_MIN_LEN;
use dhcprobe_discovery::correlator::DEFAULT_RECEIVE_BUFFER;
use dhcprobe_discovery::link::DEFAULT_POLL_INTERVAL;
use dhcprobe_discovery::ProbeOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Args;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Interface to probe on (overridden by the command line)
    #[serde(default)]
    pub interface: Option<String>,
    /// Seconds to wait for a reply
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Datalink read poll slice in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Receive buffer size, one link frame
    #[serde(default = "default_receive_buffer")]
    pub receive_buffer: usize,
    /// Ask servers to broadcast their reply
    #[serde(default)]
    pub broadcast_flag: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interface: None,
            timeout_secs: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            receive_buffer: default_receive_buffer(),
            broadcast_flag: false,
        }
    }
}

impl ProbeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            receive_buffer: self.receive_buffer,
            broadcast_flag: self.broadcast_flag,
        }
    }
}

/// One day
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn default_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_receive_buffer() -> usize {
    DEFAULT_RECEIVE_BUFFER
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Command-line values take precedence over the file
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(interface) = &args.interface {
            self.probe.interface = Some(interface.clone());
        }
        if let Some(timeout) = args.timeout {
            self.probe.timeout_secs = timeout;
        }
        if args.broadcast {
            self.probe.broadcast_flag = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Reject values the probe cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe.timeout_secs == 0 {
            anyhow::bail!("probe.timeout_secs must be at least 1");
        }
        if self.probe.timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "probe.timeout_secs of {} exceeds the {} second limit",
                self.probe.timeout_secs,
                MAX_TIMEOUT_SECS
            );
        }
        if self.probe.poll_interval_ms == 0 {
            anyhow::bail!("probe.poll_interval_ms must be at least 1");
        }
        let smallest_frame = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN + BOOTP_MIN_LEN;
        if self.probe.receive_buffer < smallest_frame {
            anyhow::bail!(
                "probe.receive_buffer of {} bytes cannot hold a DHCP frame",
                self.probe.receive_buffer
            );
        }
        Ok(())
    }
}

/// Load configuration from file.
///
/// Returns `None` when the file does not exist so the caller can fall back
/// to defaults once logging is up.
pub fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(config))
}
