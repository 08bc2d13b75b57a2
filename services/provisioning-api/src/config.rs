//! Service configuration from environment variables

use crate::error::ServiceError;
use site_allocator::{AllocatorConfig, SubstringClassifier};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Everything the service reads at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub listen_addr: SocketAddr,
    /// YAML range file; the database range tables are used when unset
    pub ranges_file: Option<PathBuf>,
    pub allocator: AllocatorConfig,
    pub vendor_rules: Option<SubstringClassifier>,
}

impl ServiceConfig {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset and empty variables take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL").ok_or_else(|| {
            ServiceError::InvalidConfig("DATABASE_URL environment variable is required".to_string())
        })?;

        let database_max_connections: u32 = parse(&var, "DATABASE_MAX_CONNECTIONS", 10)?;
        let listen_addr: SocketAddr = parse(&var, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let lock_timeout_ms: u64 = parse(&var, "ALLOCATION_LOCK_TIMEOUT_MS", 5000)?;
        let max_attempts: u32 = parse(&var, "ALLOCATION_MAX_ATTEMPTS", 3)?;
        let backoff_min_ms: u64 = parse(&var, "ALLOCATION_BACKOFF_MIN_MS", 50)?;
        let backoff_max_ms: u64 = parse(&var, "ALLOCATION_BACKOFF_MAX_MS", 500)?;

        if database_max_connections == 0 {
            return Err(ServiceError::InvalidConfig("DATABASE_MAX_CONNECTIONS must be at least 1".to_string()));
        }
        if lock_timeout_ms == 0 {
            return Err(ServiceError::InvalidConfig("ALLOCATION_LOCK_TIMEOUT_MS must be positive".to_string()));
        }
        if max_attempts == 0 {
            return Err(ServiceError::InvalidConfig("ALLOCATION_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if backoff_min_ms > backoff_max_ms {
            return Err(ServiceError::InvalidConfig(format!(
                "ALLOCATION_BACKOFF_MIN_MS ({}) exceeds ALLOCATION_BACKOFF_MAX_MS ({})",
                backoff_min_ms, backoff_max_ms
            )));
        }

        let vendor_rules = var("SITE_VENDOR_RULES")
            .map(|rules| SubstringClassifier::parse(&rules))
            .transpose()
            .map_err(|e| ServiceError::InvalidConfig(format!("SITE_VENDOR_RULES: {}", e)))?;

        Ok(Self {
            database_url,
            database_max_connections,
            listen_addr,
            ranges_file: var("RANGES_FILE").map(PathBuf::from),
            allocator: AllocatorConfig {
                lock_timeout: Duration::from_millis(lock_timeout_ms),
                max_attempts,
                backoff_min: Duration::from_millis(backoff_min_ms),
                backoff_max: Duration::from_millis(backoff_max_ms),
                ..AllocatorConfig::default()
            },
            vendor_rules,
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ServiceError>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ServiceError::InvalidConfig(format!("{}='{}': {}", name, raw, e))),
        None => Ok(default),
    }
}
