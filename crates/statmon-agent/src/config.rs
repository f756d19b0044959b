use crate::supervisor::RestartPolicy;
use serde::Deserialize;
use statmon_common::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";

/// Wire protocol used to deliver batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON over `POST /updates/`.
    #[default]
    Http,
    /// Unary `BulkSaveMetrics` calls.
    Grpc,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(TransportKind::Http)
        } else if s.eq_ignore_ascii_case("grpc") {
            Ok(TransportKind::Grpc)
        } else {
            Err(format!("unknown transport {s:?}"))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Server address, `host:port` or a full URL.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Shared signing secret. Empty disables signing.
    #[serde(default)]
    pub key: String,
    /// Path to the server's RSA public key (PEM). Enables payload encryption.
    pub crypto_key: Option<String>,
    /// Address advertised in `X-Real-IP`; detected when unset.
    pub agent_ip: Option<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub restart: RestartPolicy,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            transport: TransportKind::default(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            key: String::new(),
            crypto_key: None,
            agent_ip: None,
            channel_capacity: default_channel_capacity(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            restart: RestartPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Loads `path`, or `config/agent.toml` if present, or the defaults;
    /// then applies environment overrides and validates.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// `ADDRESS`, `TRANSPORT`, `POLL_INTERVAL`, `REPORT_INTERVAL`, `KEY`,
    /// `CRYPTO_KEY`, `AGENT_IP`. Environment wins over the file.
    pub fn apply_env(&mut self) -> Result<(), env::EnvError> {
        env::override_string(&mut self.address, "ADDRESS");
        if let Some(v) = env::parse::<TransportKind>("TRANSPORT")? {
            self.transport = v;
        }
        if let Some(v) = env::seconds("POLL_INTERVAL")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env::seconds("REPORT_INTERVAL")? {
            self.report_interval_secs = v;
        }
        env::override_string(&mut self.key, "KEY");
        env::override_optional(&mut self.crypto_key, "CRYPTO_KEY");
        env::override_optional(&mut self.agent_ip, "AGENT_IP");
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            anyhow::bail!("poll and report intervals must be at least one second");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be positive");
        }
        if self.transport == TransportKind::Grpc && self.crypto_key.is_some() {
            anyhow::bail!("payload encryption is only available over the http transport");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}
