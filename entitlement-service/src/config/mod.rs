//! Configuration module for entitlement-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub reconcile: ReconcileConfig,
}

/// Which store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown STORE_BACKEND '{}', expected postgres or memory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Background roll-over of lapsed subscriptions.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Seconds between runs. `0` disables the job.
    pub interval_secs: u64,
    pub batch_size: i64,
}

impl EntitlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StoreBackend::Postgres,
        };

        let database_url = match (store, env::var("DATABASE_URL")) {
            (_, Ok(url)) => url,
            (StoreBackend::Memory, Err(_)) => String::new(),
            (StoreBackend::Postgres, Err(_)) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required"
                )))
            }
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "entitlement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database: DatabaseConfig {
                url: database_url,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            reconcile: ReconcileConfig {
                interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
                batch_size: env::var("RECONCILE_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            },
        })
    }

    /// In-memory configuration on the given port, used by tests.
    pub fn in_memory(port: u16) -> Self {
        Self {
            common: core_config::Config {
                port,
                ..Default::default()
            },
            service_name: "entitlement-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreBackend::Memory,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
            },
            reconcile: ReconcileConfig {
                interval_secs: 0,
                batch_size: 100,
            },
        }
    }
}
