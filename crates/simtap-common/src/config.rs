//! ---
//! simtap_section: "03-logging-configuration"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Configuration model and loader for the telemetry client."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_application_name() -> String {
    "Managed Data Request".to_owned()
}

fn default_user_message_id() -> u32 {
    0x0402
}

fn default_fault_backoff() -> Duration {
    Duration::from_millis(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_host_seed() -> u64 {
    0x51A7u64
}

fn default_noise_sigma() -> f64 {
    0.2
}

/// Primary configuration object for the simtap daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub host: HostConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "SIMTAP_CONFIG";

    /// Load configuration from disk, respecting the `SIMTAP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    ///
    /// Unit tokens are not checked here; the field catalog drops
    /// unknown units on its own so a partially matching list still polls.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(anyhow!("configuration must declare at least one field"));
        }
        for (index, field) in self.fields.iter().enumerate() {
            field.validate(index)?;
        }
        self.client.validate()?;
        self.host.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection and polling parameters for the telemetry client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name the client announces to the host when opening a session.
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Window-message id the host posts to signal pending data.
    #[serde(default = "default_user_message_id")]
    pub user_message_id: u32,
    /// Pause applied after a host exception or a rejected host call.
    #[serde(default = "default_fault_backoff")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fault_backoff: Duration,
    /// Cadence of the owning process' request timer.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Delay before the owning process reconnects after the host went away.
    #[serde(default = "default_reconnect_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_interval: Duration,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.user_message_id == 0 {
            return Err(anyhow!("client.user_message_id must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("client.poll_interval must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            user_message_id: default_user_message_id(),
            fault_backoff: default_fault_backoff(),
            poll_interval: default_poll_interval(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

/// One requested instrument value, in the order it should appear in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub unit: String,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("field #{} has an empty name", index));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Knobs for the in-process loopback host used in demo mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_seed")]
    pub seed: u64,
    #[serde(default = "default_noise_sigma")]
    pub noise_sigma: f64,
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.noise_sigma.is_finite() || self.noise_sigma < 0.0 {
            return Err(anyhow!(
                "host.noise_sigma must be a finite, non-negative number (got {})",
                self.noise_sigma
            ));
        }
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            seed: default_host_seed(),
            noise_sigma: default_noise_sigma(),
        }
    }
}
