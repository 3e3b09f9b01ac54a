//! Server configuration loaded from the environment.
//!
//! ## Environment variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `3000` |
//! | `STORE_BACKEND` | `postgres` (`memory` for a throwaway store) |
//! | `DATABASE_URL` | required for `postgres` |
//! | `CACHE_BACKEND` | `memory` (`redis`, `off`) |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `TASK_LIST_CACHE_TTL_SECS` | `60` |
//! | `EVENT_RELAY` | `none` (`redis`) |
//! | `EVENT_BUS_CAPACITY` | `256` |
//! | `JOB_MAX_RETRIES` | `3` |
//! | `ALLOWED_ORIGINS` | `http://localhost:3000` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use taskpulse_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_MAX_RETRIES, REDIS_URL, SERVER_PORT, TASK_LIST_CACHE_TTL_SECS,
};
use taskpulse_core::{Error, Result};

/// Where tasks, users and jobs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(Error::Config(format!("Unknown STORE_BACKEND: {}", other))),
        }
    }
}

/// Task list cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
    Off,
}

impl FromStr for CacheBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "off" | "none" | "false" | "0" => Ok(Self::Off),
            other => Err(Error::Config(format!("Unknown CACHE_BACKEND: {}", other))),
        }
    }
}

/// Cross-process event relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayBackend {
    None,
    Redis,
}

impl FromStr for RelayBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::None),
            "redis" => Ok(Self::Redis),
            other => Err(Error::Config(format!("Unknown EVENT_RELAY: {}", other))),
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub cache: CacheBackend,
    pub redis_url: String,
    pub cache_ttl: Duration,
    pub event_relay: RelayBackend,
    pub event_bus_capacity: usize,
    pub job_max_retries: i32,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: SERVER_PORT,
            store: StoreBackend::Postgres,
            database_url: None,
            cache: CacheBackend::Memory,
            redis_url: REDIS_URL.to_string(),
            cache_ttl: Duration::from_secs(TASK_LIST_CACHE_TTL_SECS),
            event_relay: RelayBackend::None,
            event_bus_capacity: EVENT_BUS_CAPACITY,
            job_max_retries: JOB_MAX_RETRIES,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ApiConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = var("STORE_BACKEND")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(defaults.store);
        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(Error::Config(
                "DATABASE_URL is required when STORE_BACKEND=postgres".to_string(),
            ));
        }

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.allowed_origins);

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_number(&var, "PORT")?.unwrap_or(defaults.port),
            store,
            database_url,
            cache: var("CACHE_BACKEND")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(defaults.cache),
            redis_url: var("REDIS_URL").unwrap_or(defaults.redis_url),
            cache_ttl: parse_number(&var, "TASK_LIST_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            event_relay: var("EVENT_RELAY")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(defaults.event_relay),
            event_bus_capacity: parse_number(&var, "EVENT_BUS_CAPACITY")?
                .unwrap_or(defaults.event_bus_capacity),
            job_max_retries: parse_number::<i32, _>(&var, "JOB_MAX_RETRIES")?
                .map(|n| n.max(0))
                .unwrap_or(defaults.job_max_retries),
            allowed_origins,
        })
    }

    /// Socket address the server listens on.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid HOST/PORT: {}", e)))
    }
}

fn parse_number<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ApiConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_memory_store_needs_no_database_url() {
        let config = load(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache, CacheBackend::Memory);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.event_relay, RelayBackend::None);
        assert_eq!(config.job_max_retries, 3);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = load(&[("DATABASE_URL", "postgres://localhost/taskpulse")]).unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("PORT", "8080"),
            ("CACHE_BACKEND", "REDIS"),
            ("TASK_LIST_CACHE_TTL_SECS", "5"),
            ("EVENT_RELAY", "redis"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache, CacheBackend::Redis);
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.event_relay, RelayBackend::Redis);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(load(&[("STORE_BACKEND", "memory"), ("PORT", "http")]).is_err());
        assert!(load(&[("STORE_BACKEND", "sqlite")]).is_err());
        assert!(load(&[("STORE_BACKEND", "memory"), ("CACHE_BACKEND", "disk")]).is_err());
    }
}
