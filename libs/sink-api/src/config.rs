use std::sync::Arc;
use std::time::Duration;

use crate::error::SinkError;

/// Typed config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
}

/// Backend connection parameters, passed to a connector at `open` time.
///
/// Immutable: there is no in-place setter. Overrides go through
/// [`BackendConfig::with`], which derives a new value and leaves the
/// receiver (and every other holder of it) untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendConfig {
    entries: Arc<Vec<(String, ParamValue)>>,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a copy with `name` set to `value`.
    pub fn with(&self, name: impl Into<String>, value: ParamValue) -> Self {
        let name = name.into();
        let mut entries: Vec<(String, ParamValue)> = self.entries.as_ref().clone();
        if let Some(entry) = entries.iter_mut().find(|(k, _)| k == &name) {
            entry.1 = value;
        } else {
            entries.push((name, value));
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(ParamValue::U64(v)) => Some(*v),
            // Most config formats lack unsigned integers; accept non-negative i64.
            Some(ParamValue::I64(v)) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Milliseconds parameter as a `Duration`.
    ///
    /// Accepts non-negative integers and numeric strings (`"3000"`).
    /// Absent → `Ok(None)`; present but unusable → `Config` error.
    pub fn get_millis(&self, name: &str) -> Result<Option<Duration>, SinkError> {
        let millis = match self.get(name) {
            None => return Ok(None),
            Some(ParamValue::U64(v)) => *v,
            Some(ParamValue::I64(v)) if *v >= 0 => *v as u64,
            Some(ParamValue::Str(s)) => s.trim().parse::<u64>().map_err(|e| {
                SinkError::config(format!("'{name}': expected milliseconds, got '{s}': {e}"))
            })?,
            Some(other) => {
                return Err(SinkError::config(format!(
                    "'{name}': expected milliseconds, got {other:?}"
                )));
            }
        };
        Ok(Some(Duration::from_millis(millis)))
    }
}

impl FromIterator<(String, ParamValue)> for BackendConfig {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        let mut entries: Vec<(String, ParamValue)> = Vec::new();
        for (name, value) in iter {
            if let Some(entry) = entries.iter_mut().find(|(k, _)| k == &name) {
                entry.1 = value;
            } else {
                entries.push((name, value));
            }
        }
        Self {
            entries: Arc::new(entries),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Connection pool override
// ════════════════════════════════════════════════════════════════

/// Caller-declared connection timeout (milliseconds). When present, a
/// tuned connection pool configuration is derived from it.
pub const CONNECTION_TIMEOUT_KEY: &str = "connection.timeout";

/// Keys written into the derived config when a pool is tuned.
pub const POOL_CONNECT_TIMEOUT_KEY: &str = "pool.connect_timeout_ms";
pub const POOL_EXHAUSTED_TIMEOUT_KEY: &str = "pool.max_timeout_when_exhausted_ms";

const TUNED_POOL_NAME: &str = "sink-connection-pool";

/// Connection pool tuning handed to the backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPoolConfig {
    pub name: String,
    /// Max time to establish a connection.
    pub connect_timeout: Duration,
    /// Max time to wait for a free connection when the pool is exhausted.
    pub max_timeout_when_exhausted: Duration,
}

impl ConnectionPoolConfig {
    /// Pool where both timeouts equal `timeout`.
    pub fn tuned(timeout: Duration) -> Self {
        Self {
            name: TUNED_POOL_NAME.to_string(),
            connect_timeout: timeout,
            max_timeout_when_exhausted: timeout,
        }
    }
}

/// Client parameters after the override path has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Effective config: the base config itself, or a derived copy
    /// carrying the pool entries.
    pub config: BackendConfig,
    /// `Some` only when `connection.timeout` was declared.
    pub pool: Option<ConnectionPoolConfig>,
}

impl ClientSettings {
    /// Build client settings from a base config. The base is never modified.
    pub fn resolve(base: &BackendConfig) -> Result<Self, SinkError> {
        let Some(timeout) = base.get_millis(CONNECTION_TIMEOUT_KEY)? else {
            return Ok(Self {
                config: base.clone(),
                pool: None,
            });
        };

        let pool = ConnectionPoolConfig::tuned(timeout);
        let millis = timeout.as_millis() as u64;
        let config = base
            .with(POOL_CONNECT_TIMEOUT_KEY, ParamValue::U64(millis))
            .with(POOL_EXHAUSTED_TIMEOUT_KEY, ParamValue::U64(millis));
        Ok(Self {
            config,
            pool: Some(pool),
        })
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.pool.as_ref().map(|p| p.connect_timeout)
    }
}
