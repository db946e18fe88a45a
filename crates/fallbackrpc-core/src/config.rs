//! Client configuration: defaults, validation and environment loading.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::{CircuitBreakerConfig, RetryConfig};

pub const ENV_URLS: &str = "FALLBACKRPC_URLS";
pub const ENV_TIMEOUT_MS: &str = "FALLBACKRPC_TIMEOUT_MS";
pub const ENV_RETRIES: &str = "FALLBACKRPC_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "FALLBACKRPC_RETRY_DELAY_MS";
pub const ENV_CB_THRESHOLD: &str = "FALLBACKRPC_CB_THRESHOLD";
pub const ENV_CB_TIMEOUT_MS: &str = "FALLBACKRPC_CB_TIMEOUT_MS";
pub const ENV_HEADERS: &str = "FALLBACKRPC_HEADERS";

/// Immutable settings for a [`FallbackClient`](crate::FallbackClient).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Endpoint base URLs in priority order. The first is the primary.
    pub urls: Vec<String>,
    /// Deadline applied to every single attempt.
    pub timeout: Duration,
    /// Local attempts per endpoint, including the first.
    pub retries: u32,
    /// Base backoff delay between local attempts.
    pub retry_delay: Duration,
    /// Consecutive failures that open an endpoint's circuit.
    pub circuit_breaker_threshold: u32,
    /// How long an open circuit stays open after its last failure.
    pub circuit_breaker_timeout: Duration,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Defaults with the given endpoint URLs.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check that URLs are present and every count/duration is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if let Some(index) = self.urls.iter().position(|u| u.trim().is_empty()) {
            return Err(ConfigError::EmptyUrl { index });
        }
        let positive = [
            ("timeout", !self.timeout.is_zero()),
            ("retries", self.retries > 0),
            ("retry_delay", !self.retry_delay.is_zero()),
            ("circuit_breaker_threshold", self.circuit_breaker_threshold > 0),
            ("circuit_breaker_timeout", !self.circuit_breaker_timeout.is_zero()),
        ];
        match positive.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(ConfigError::NotPositive { field: *field }),
            None => Ok(()),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retries,
            base_delay: self.retry_delay,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            cooldown: self.circuit_breaker_timeout,
        }
    }

    /// Load from `FALLBACKRPC_*` environment variables on top of the
    /// defaults. Unset variables keep their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_URLS) {
            config.urls = split_list(&raw).map(str::to_string).collect();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse_value(ENV_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RETRIES) {
            config.retries = parse_value(ENV_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_DELAY_MS) {
            config.retry_delay = Duration::from_millis(parse_value(ENV_RETRY_DELAY_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_CB_THRESHOLD) {
            config.circuit_breaker_threshold = parse_value(ENV_CB_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CB_TIMEOUT_MS) {
            config.circuit_breaker_timeout =
                Duration::from_millis(parse_value(ENV_CB_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_HEADERS) {
            for pair in split_list(&raw) {
                let (name, value) = parse_header(pair).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_HEADERS.into(),
                    value: pair.into(),
                })?;
                config.headers.insert(name, value);
            }
        }

        Ok(config)
    }
}

/// Parse a `name=value` (or `name:value`) header pair.
pub fn parse_header(pair: &str) -> Option<(String, String)> {
    let (name, value) = pair.split_once('=').or_else(|| pair.split_once(':'))?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
