//! Store configuration

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use coil_common::{Error, Result, DEFAULT_KEY_PREFIX};
use serde::{Deserialize, Serialize};

use crate::etcd::EtcdStore;
use crate::memory::MemoryStore;
use crate::txn::KvStore;

/// Default etcd endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Which store implementation to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// etcd cluster
    #[default]
    Etcd,
    /// In-process store; state is lost on exit
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "etcd" => Ok(Self::Etcd),
            "memory" => Ok(Self::Memory),
            other => Err(Error::validation_for_field(
                other,
                "backend",
                "store backend must be \"etcd\" or \"memory\"",
            )),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Etcd => write!(f, "etcd"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Connection settings for the backing store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Backend implementation
    pub backend: StoreBackend,

    /// etcd client URLs
    pub endpoints: Vec<String>,

    /// Prefix prepended to every key
    pub key_prefix: String,

    /// Connection establishment timeout
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,

    /// Deadline for each individual request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// etcd user name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// etcd password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Etcd,
            endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            dial_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            username: None,
            password: None,
        }
    }
}

impl StoreConfig {
    /// Configuration for the in-process backend
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Default::default()
        }
    }

    /// Check the configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Etcd && self.endpoints.is_empty() {
            return Err(Error::validation_for_field(
                "store",
                "endpoints",
                "at least one etcd endpoint is required",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::validation_for_field(
                "store",
                "request_timeout",
                "request timeout must be positive",
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::validation_for_field(
                "store",
                "username",
                "username and password must be set together",
            ));
        }
        Ok(())
    }
}

/// Open the store described by `config`
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    config.validate()?;
    match config.backend {
        StoreBackend::Etcd => Ok(Arc::new(EtcdStore::connect(config).await?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreBackend::Etcd);
        assert_eq!(config.endpoints, vec!["http://127.0.0.1:2379"]);
        assert_eq!(config.key_prefix, "/coil/");
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"endpoints": ["http://etcd-0:2379", "http://etcd-1:2379"], "requestTimeout": 2.5}"#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.key_prefix, "/coil/");
    }

    #[test]
    fn test_validation() {
        let config = StoreConfig {
            endpoints: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            endpoints: vec![],
            ..StoreConfig::memory()
        };
        assert!(config.validate().is_ok());

        let config = StoreConfig {
            username: Some("root".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parses() {
        assert_eq!("etcd".parse::<StoreBackend>().unwrap(), StoreBackend::Etcd);
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
        assert_eq!(StoreBackend::Memory.to_string(), "memory");
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let store = connect(&StoreConfig::memory()).await.unwrap();
        assert!(store.get("pool/default").await.unwrap().is_none());
    }
}
