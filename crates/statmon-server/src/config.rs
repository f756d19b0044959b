use crate::access::AccessGuard;
use serde::Deserialize;
use statmon_common::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Address for the gRPC bulk endpoint. Unset serves HTTP only.
    pub grpc_address: Option<String>,
    /// Seconds between snapshot writes. `0` writes only at shutdown.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file. Empty disables the snapshot.
    #[serde(default = "default_store_file")]
    pub store_file: String,
    /// Replay the snapshot at startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// Shared signing secret. Empty disables signature checks.
    #[serde(default)]
    pub key: String,
    /// SQLite DSN. When set, the database replaces the snapshot file.
    pub database_dsn: Option<String>,
    /// Path to the RSA private key (PKCS#8 PEM) for encrypted payloads.
    pub crypto_key: Option<String>,
    /// CIDR allowed to ingest, e.g. `10.0.0.0/24`.
    pub trusted_subnet: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_store_file() -> String {
    "/tmp/statmon-metrics.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            store_interval_secs: default_store_interval(),
            store_file: default_store_file(),
            restore: default_restore(),
            key: String::new(),
            database_dsn: None,
            crypto_key: None,
            trusted_subnet: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Loads `path`, or `config/server.toml` if present, or the defaults;
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

    /// `ADDRESS`, `GRPC_ADDRESS`, `STORE_INTERVAL`, `STORE_FILE`,
    /// `RESTORE`, `KEY`, `DATABASE_DSN`, `CRYPTO_KEY`, `TRUSTED_SUBNET`.
    pub fn apply_env(&mut self) -> Result<(), env::EnvError> {
        env::override_string(&mut self.address, "ADDRESS");
        env::override_optional(&mut self.grpc_address, "GRPC_ADDRESS");
        if let Some(v) = env::seconds("STORE_INTERVAL")? {
            self.store_interval_secs = v;
        }
        // Set-but-empty is meaningful here: it disables the snapshot.
        if let Ok(v) = std::env::var("STORE_FILE") {
            self.store_file = v;
        }
        if let Some(v) = env::parse::<bool>("RESTORE")? {
            self.restore = v;
        }
        env::override_string(&mut self.key, "KEY");
        env::override_optional(&mut self.database_dsn, "DATABASE_DSN");
        env::override_optional(&mut self.crypto_key, "CRYPTO_KEY");
        env::override_optional(&mut self.trusted_subnet, "TRUSTED_SUBNET");
        Ok(())
    }

    /// Rejects a malformed trusted subnet at startup rather than per request.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.access_guard()?;
        Ok(())
    }

    pub fn access_guard(&self) -> anyhow::Result<AccessGuard> {
        Ok(AccessGuard::new(self.trusted_subnet.as_deref())?)
    }

    pub fn store_file(&self) -> Option<PathBuf> {
        let file = self.store_file.trim();
        (!file.is_empty()).then(|| PathBuf::from(file))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
