use crate::collector::{CircuitBreakerConfig, CollectorConfig};
use crate::error::{Error, Result};
use crate::github::fetcher::Checkpoints;
use crate::github::ErrorClass;
use crate::storage::{LocalBackend, ObjectBackend, StorageBackend};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SNAPSHOTS_PATH: &str = "./datalake/snapshots";

/// Where snapshots live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Local { path: PathBuf },
    ObjectStore { url: Url },
}

impl StorageConfig {
    pub fn build(&self) -> Result<Arc<dyn StorageBackend>> {
        Ok(match self {
            StorageConfig::Local { path } => Arc::new(LocalBackend::new(path)?),
            StorageConfig::ObjectStore { url } => Arc::new(ObjectBackend::with_url(url)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: Option<String>,
    pub repositories: Vec<String>,
    pub storage: StorageConfig,
    pub rate_limit_threshold: u32,
    pub rate_limit_max_wait: Duration,
    pub circuit_trip_on: Vec<ErrorClass>,
    pub circuit_sustained_on: Vec<ErrorClass>,
    pub circuit_sustained_threshold: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_token = var("GITHUB_TOKEN").filter(|t| !t.trim().is_empty());

        let mut repositories = split_list(var("INTERNAL_REPOSITORIES"));
        repositories.extend(split_list(var("PUBLIC_REPOSITORIES")));

        let storage = match var("STORAGE_BACKEND")
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("local") => StorageConfig::Local {
                path: var("SNAPSHOTS_PATH")
                    .unwrap_or_else(|| DEFAULT_SNAPSHOTS_PATH.to_string())
                    .into(),
            },
            Some("object_store") => {
                let raw = var("SNAPSHOTS_URL").ok_or_else(|| {
                    Error::Config(
                        "SNAPSHOTS_URL must be set when STORAGE_BACKEND=object_store".to_string(),
                    )
                })?;
                StorageConfig::ObjectStore {
                    url: Url::parse(raw.trim())?,
                }
            }
            Some(other) => {
                return Err(Error::Config(format!(
                    "Unknown STORAGE_BACKEND {:?} (expected local or object_store)",
                    other
                )))
            }
        };

        let rate_limit_threshold = parse_or(&var, "RATE_LIMIT_THRESHOLD", 10)?;
        let rate_limit_max_wait =
            Duration::from_secs(parse_or(&var, "RATE_LIMIT_MAX_WAIT_SECS", 3600)?);

        let breaker = CircuitBreakerConfig::default();
        let circuit_trip_on = classes_or(&var, "CIRCUIT_TRIP_ON", breaker.trip_on)?;
        let circuit_sustained_on =
            classes_or(&var, "CIRCUIT_SUSTAINED_ON", breaker.sustained_on)?;
        let circuit_sustained_threshold = parse_or(
            &var,
            "CIRCUIT_SUSTAINED_THRESHOLD",
            breaker.sustained_threshold,
        )?;

        Ok(Self {
            github_token,
            repositories,
            storage,
            rate_limit_threshold,
            rate_limit_max_wait,
            circuit_trip_on,
            circuit_sustained_on,
            circuit_sustained_threshold,
        })
    }

    pub fn require_github_token(&self) -> Result<&str> {
        self.github_token
            .as_deref()
            .ok_or_else(|| Error::Config("GITHUB_TOKEN environment variable not set".to_string()))
    }
}

impl From<&Config> for CollectorConfig {
    fn from(config: &Config) -> Self {
        Self {
            repositories: config.repositories.clone(),
            rate_limit_threshold: config.rate_limit_threshold,
            rate_limit_max_wait: config.rate_limit_max_wait,
            checkpoints: Checkpoints::default(),
            circuit_breaker: CircuitBreakerConfig {
                trip_on: config.circuit_trip_on.clone(),
                sustained_on: config.circuit_sustained_on.clone(),
                sustained_threshold: config.circuit_sustained_threshold,
            },
        }
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, raw))),
        _ => Ok(default),
    }
}

fn classes_or<F>(var: &F, key: &str, default: Vec<ErrorClass>) -> Result<Vec<ErrorClass>>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => split_list(Some(raw))
            .iter()
            .map(|name| {
                name.parse::<ErrorClass>()
                    .map_err(|_| Error::Config(format!("{}: unknown error class {:?}", key, name)))
            })
            .collect(),
        None => Ok(default),
    }
}
