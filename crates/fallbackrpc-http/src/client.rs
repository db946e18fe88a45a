//! HTTP transport backed by `reqwest`.
//!
//! One call is one HTTP exchange. Retries, deadlines and failover live in
//! [`FallbackClient`]; this module only turns reqwest outcomes into the
//! normalized [`TransportError`] shape the classifier understands:
//!
//! - no response: [`TransportError::Connection`] with the most specific
//!   [`FaultCode`] found in the error's source chain
//! - non-2xx status: [`TransportError::Status`] with the body text
//! - unparsable body: [`TransportError::Deserialization`]

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use thiserror::Error;

use fallbackrpc_core::error::{ConfigError, FaultCode, TransportError};
use fallbackrpc_core::transport::HttpTransport;
use fallbackrpc_core::{ClientConfig, FallbackClient};

/// Errors raised while assembling a client.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// `reqwest`-backed [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an already configured reqwest client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build a client that sends `headers` with every request.
    pub fn new(headers: &BTreeMap<String, String>) -> Result<Self, BuildError> {
        let http = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .build()?;
        Ok(Self { http })
    }

    /// Build from the default headers in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BuildError> {
        Self::new(&config.headers)
    }
}

/// Build a [`FallbackClient`] over a [`ReqwestTransport`], validating the
/// configuration and every endpoint URL up front.
pub fn connect(config: ClientConfig) -> Result<FallbackClient, BuildError> {
    config.validate()?;
    for url in &config.urls {
        reqwest::Url::parse(url).map_err(|e| BuildError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    }
    let transport = ReqwestTransport::from_config(&config)?;
    tracing::debug!(endpoints = config.urls.len(), "building fallback client");
    Ok(FallbackClient::new(config, Arc::new(transport))?)
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, BuildError> {
    let mut map = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        let invalid = |reason: String| BuildError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(header_name, header_value);
    }
    if !map.contains_key(USER_AGENT) {
        map.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("fallbackrpc/", env!("CARGO_PKG_VERSION"))),
        );
    }
    Ok(map)
}

/// Normalize a reqwest failure. Only called when no usable response exists.
fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        return TransportError::Other(err.to_string());
    }
    let code = fault_code(&err);
    TransportError::Connection {
        code,
        message: error_chain(&err),
    }
}

fn fault_code(err: &reqwest::Error) -> FaultCode {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err as &(dyn StdError + 'static));
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return FaultCode::ConnectionRefused,
                io::ErrorKind::ConnectionReset => return FaultCode::ConnectionReset,
                io::ErrorKind::ConnectionAborted => return FaultCode::ConnectionAborted,
                io::ErrorKind::TimedOut => return FaultCode::TimedOut,
                _ => {}
            }
        }
        if current.to_string().contains("dns error") {
            return FaultCode::NameNotFound;
        }
        source = current.source();
    }
    if err.is_timeout() {
        FaultCode::TimedOut
    } else {
        FaultCode::Network
    }
}

/// `outer: inner: innermost`, so the root cause survives into logs.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get(&self, url: &str) -> Result<(), TransportError> {
        let resp = self.http.get(url).send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
