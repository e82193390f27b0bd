use crate::core::{DbError, Result};
use crate::facade::SearchType;
use crate::transaction::TransactionMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store configuration.
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a record lock lives without being released
    #[serde(with = "millis", rename = "lock_ttl_ms")]
    pub lock_ttl: Duration,

    /// How long to wait for a lock held by another transaction
    #[serde(with = "millis", rename = "lock_wait_timeout_ms")]
    pub lock_wait_timeout: Duration,

    /// Record cache entry lifetime; `None` keeps entries until evicted
    #[serde(with = "opt_millis", rename = "cache_ttl_ms")]
    pub cache_ttl: Option<Duration>,

    /// Record cache capacity (entries)
    pub cache_capacity: usize,

    /// Page size when a search does not give one
    pub default_limit: usize,

    /// Upper bound for a requested page size
    pub max_limit: usize,

    /// Roll back the relational transaction when a statement fails
    pub rollback_on_error: bool,

    pub default_search_type: SearchType,

    pub transaction_mode: TransactionMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_wait_timeout: Duration::from_secs(10),
            cache_ttl: Some(Duration::from_secs(3600)),
            cache_capacity: 10_000,
            default_limit: 50,
            max_limit: 1000,
            rollback_on_error: true,
            default_search_type: SearchType::Auto,
            transaction_mode: TransactionMode::Buffered,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    pub fn rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = rollback;
        self
    }

    pub fn default_search_type(mut self, search_type: SearchType) -> Self {
        self.default_search_type = search_type;
        self
    }

    pub fn transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// Parse from a connection-style string
    ///
    /// Format: `"polystore://?lock_ttl_ms=5000&default_limit=20&transaction_mode=real_time"`
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("polystore://").ok_or_else(|| {
            DbError::Configuration("URL must start with 'polystore://'".to_string())
        })?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or_default();

        let mut config = Self::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                DbError::Configuration(format!("expected name=value, got '{}'", pair))
            })?;
            config.apply(name, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, name: &str, value: &str) -> Result<()> {
        let invalid = || DbError::Configuration(format!("invalid value '{}' for '{}'", value, name));
        let number = || value.parse::<u64>().map_err(|_| invalid());
        let flag = || value.parse::<bool>().map_err(|_| invalid());

        match name {
            "lock_ttl_ms" => self.lock_ttl = Duration::from_millis(number()?),
            "lock_wait_timeout_ms" => self.lock_wait_timeout = Duration::from_millis(number()?),
            "cache_ttl_ms" => {
                self.cache_ttl = match number()? {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                }
            }
            "cache_capacity" => self.cache_capacity = number()? as usize,
            "default_limit" => self.default_limit = number()? as usize,
            "max_limit" => self.max_limit = number()? as usize,
            "rollback_on_error" => self.rollback_on_error = flag()?,
            "default_search_type" => {
                self.default_search_type = SearchType::parse(value).ok_or_else(invalid)?
            }
            "transaction_mode" => {
                self.transaction_mode = TransactionMode::parse(value).ok_or_else(invalid)?
            }
            other => {
                return Err(DbError::Configuration(format!("unknown option '{}'", other)));
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl.is_zero() {
            return Err(DbError::Configuration("lock_ttl must be > 0".to_string()));
        }
        if self.default_limit == 0 {
            return Err(DbError::Configuration("default_limit must be > 0".to_string()));
        }
        if self.default_limit > self.max_limit {
            return Err(DbError::Configuration(
                "default_limit cannot exceed max_limit".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
