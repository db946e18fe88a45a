//! Failover dispatcher: the client callers talk to.
//!
//! A request walks the endpoint list at most once. Each selected endpoint
//! gets the full local retry budget; a retryable failure moves on to the next
//! endpoint, a terminal one aborts the whole call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};
use crate::policy::RetryPolicy;
use crate::registry::{EndpointHealth, EndpointRegistry};
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{join_url, HealthStatus, HttpTransport};

/// Path probed by [`FallbackClient::perform_health_checks`].
pub const HEALTH_CHECK_PATH: &str = "/health";

/// Deadline for a single liveness probe, independent of the request timeout.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Multi-endpoint client with per-endpoint retry, circuit breaking and
/// ordered failover.
///
/// The client is `Send + Sync`; share it behind an `Arc` to issue requests
/// from several tasks.
pub struct FallbackClient {
    registry: EndpointRegistry,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    timeout: Duration,
    next_id: AtomicU64,
}

impl FallbackClient {
    /// Build a client over `transport`. Fails if `config` is invalid.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: EndpointRegistry::new(
                config.urls.iter().cloned(),
                config.circuit_breaker_config(),
            ),
            transport,
            retry: RetryPolicy::new(config.retry_config()),
            timeout: config.timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Number of configured endpoints.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// The endpoint registry backing this client.
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// POST `payload` to `path` on the first endpoint that answers, failing
    /// over across endpoints on transient errors.
    pub async fn request(&self, path: &str, payload: &Value) -> Result<Value, TransportError> {
        let endpoints = self.registry.len();
        let mut last_error: Option<TransportError> = None;

        for _ in 0..endpoints {
            let Some(selection) = self.registry.select_next() else {
                tracing::error!(path, "no endpoint available, every circuit is open");
                return Err(TransportError::AllEndpointsUnavailable {
                    last: last_error.map(|e| e.to_string()),
                });
            };

            self.registry.record_attempt(selection.index);
            let started = Instant::now();

            match self.execute_with_retry(&selection.address, path, payload).await {
                Ok(body) => {
                    let elapsed = started.elapsed();
                    self.registry.record_success(selection.index, elapsed);
                    self.registry.reset_cursor();
                    tracing::debug!(
                        endpoint = %selection.address,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(body);
                }
                Err(err) => {
                    self.registry
                        .record_failure(selection.index, started.elapsed(), Instant::now());
                    if !err.is_retryable() {
                        tracing::warn!(
                            endpoint = %selection.address,
                            error = %err,
                            "terminal error, not failing over"
                        );
                        return Err(err);
                    }
                    tracing::warn!(
                        endpoint = %selection.address,
                        error = %err,
                        "endpoint failed, trying next"
                    );
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| TransportError::Other("no endpoint was attempted".into()));
        tracing::error!(attempts = endpoints, error = %last, "all endpoints failed");
        Err(TransportError::Exhausted {
            attempts: endpoints,
            last: Box::new(last),
        })
    }

    /// Send a JSON-RPC 2.0 call to the endpoints' base URLs and deserialize
    /// its `result`. An `error` member is returned as [`TransportError::Rpc`]
    /// once the response has been received; it does not trigger failover.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        let body = self.request("", &payload).await?;
        let response: JsonRpcResponse = serde_json::from_value(body)?;
        let result = response.into_result().map_err(TransportError::Rpc)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Up to `retries` attempts against one endpoint, each bounded by the
    /// request timeout.
    async fn execute_with_retry(
        &self,
        address: &str,
        path: &str,
        payload: &Value,
    ) -> Result<Value, TransportError> {
        let url = join_url(address, path);
        let url = url.as_str();
        let transport = &self.transport;
        let timeout = self.timeout;

        self.retry
            .run(url, move |_| async move {
                match tokio::time::timeout(timeout, transport.post_json(url, payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout {
                        ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await
    }

    /// Per-endpoint health snapshot. No side effects.
    pub fn health_status(&self) -> Vec<EndpointHealth> {
        self.registry.snapshot()
    }

    /// Aggregate health derived from circuit states. No side effects.
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.registry.snapshot();
        let open = snapshot.iter().filter(|e| e.circuit_open).count();
        match open {
            0 => HealthStatus::Healthy,
            n if n == snapshot.len() => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }

    /// Probe every endpoint concurrently with a GET to [`HEALTH_CHECK_PATH`]
    /// and record each outcome like a real request. Waits for all probes and
    /// never fails; probe errors only change recorded health.
    ///
    /// Probes share the traffic counters (`total_requests`, success/failure
    /// totals and the average duration) with real requests.
    pub async fn perform_health_checks(&self) {
        let probes = self
            .registry
            .addresses()
            .into_iter()
            .enumerate()
            .map(|(index, address)| self.probe(index, address));
        futures::future::join_all(probes).await;
    }

    async fn probe(&self, index: usize, address: String) {
        let url = join_url(&address, HEALTH_CHECK_PATH);
        self.registry.record_attempt(index);
        let started = Instant::now();

        let probe = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.transport.get(&url));
        let outcome = match probe.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                ms: HEALTH_CHECK_TIMEOUT.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) => {
                self.registry.record_success(index, started.elapsed());
                tracing::debug!(endpoint = %address, "health check passed");
            }
            Err(err) => {
                self.registry.record_failure(index, started.elapsed(), Instant::now());
                tracing::warn!(endpoint = %address, error = %err, "health check failed");
            }
        }
    }
}

impl std::fmt::Debug for FallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackClient")
            .field("endpoints", &self.registry.addresses())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    const A: &str = "mock://alpha";
    const B: &str = "mock://beta";
    const C: &str = "mock://gamma";

    #[derive(Clone)]
    enum Reply {
        Ok(Value),
        Status(u16),
        Rejected(u16, &'static str),
        Refused,
        Hang,
    }

    /// Scripted transport keyed by endpoint base URL. Queued replies are
    /// consumed first, then the endpoint's standing reply applies.
    #[derive(Default)]
    struct MockTransport {
        queued: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
        standing: HashMap<&'static str, Reply>,
        calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn always(mut self, base: &'static str, reply: Reply) -> Self {
            self.standing.insert(base, reply);
            self
        }

        fn then(self, base: &'static str, reply: Reply) -> Self {
            self.queued
                .lock()
                .unwrap()
                .entry(base)
                .or_default()
                .push_back(reply);
            self
        }

        fn calls_to(&self, base: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|url| url.starts_with(base))
                .count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        async fn reply(&self, url: &str) -> Result<Value, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let base = [A, B, C]
                .into_iter()
                .find(|b| url.starts_with(b))
                .expect("unknown mock endpoint");
            let queued = self
                .queued
                .lock()
                .unwrap()
                .get_mut(base)
                .and_then(VecDeque::pop_front);
            let reply = queued
                .or_else(|| self.standing.get(base).cloned())
                .unwrap_or(Reply::Refused);

            match reply {
                Reply::Ok(body) => Ok(body),
                Reply::Status(status) => Err(TransportError::Status {
                    status,
                    body: format!("mock status {status}"),
                }),
                Reply::Rejected(status, body) => Err(TransportError::Status {
                    status,
                    body: body.into(),
                }),
                Reply::Refused => Err(TransportError::Connection {
                    code: crate::error::FaultCode::ConnectionRefused,
                    message: "mock refused".into(),
                }),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn post_json(&self, url: &str, _body: &Value) -> Result<Value, TransportError> {
            self.reply(url).await
        }

        async fn get(&self, url: &str) -> Result<(), TransportError> {
            self.reply(url).await.map(|_| ())
        }
    }

    fn config(urls: &[&str]) -> ClientConfig {
        ClientConfig::new(urls.iter().copied())
            .with_retries(1)
            .with_retry_delay(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(1))
            .with_circuit_breaker(5, Duration::from_secs(30))
    }

    fn client(config: ClientConfig, mock: MockTransport) -> (FallbackClient, Arc<MockTransport>) {
        let mock = Arc::new(mock);
        let client = FallbackClient::new(config, mock.clone()).unwrap();
        (client, mock)
    }

    fn ok() -> Reply {
        Reply::Ok(json!({"ok": true}))
    }

    #[test]
    fn rejects_invalid_config() {
        let err = FallbackClient::new(ClientConfig::default(), Arc::new(MockTransport::default()))
            .unwrap_err();
        assert_eq!(err, ConfigError::NoEndpoints);
    }

    #[tokio::test]
    async fn success_on_primary_touches_only_primary() {
        let (client, mock) = client(
            config(&[A, B]),
            MockTransport::default().always(A, ok()).always(B, ok()),
        );

        let body = client.request("/rpc", &json!({"q": 1})).await.unwrap();
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(mock.calls.lock().unwrap().as_slice(), ["mock://alpha/rpc"]);

        let status = client.health_status();
        assert_eq!(status[0].metrics.total_requests, 1);
        assert_eq!(status[0].metrics.total_success, 1);
        assert_eq!(status[1].metrics, Default::default());
    }

    #[tokio::test]
    async fn fails_over_on_transient_error() {
        let (client, mock) = client(
            config(&[A, B]),
            MockTransport::default().always(A, Reply::Status(502)).always(B, ok()),
        );

        client.request("", &Value::Null).await.unwrap();
        assert_eq!(mock.calls_to(A), 1);
        assert_eq!(mock.calls_to(B), 1);

        let status = client.health_status();
        assert!(!status[0].healthy);
        assert_eq!(status[0].failure_count, 1);
        assert_eq!(status[0].metrics.total_failure, 1);
        assert!(status[1].healthy);
        assert_eq!(status[1].metrics.total_success, 1);
    }

    #[tokio::test]
    async fn success_resets_cursor_to_primary() {
        let (client, _mock) = client(
            config(&[A, B, C]),
            MockTransport::default()
                .then(A, Reply::Refused)
                .always(A, ok())
                .always(B, ok()),
        );

        client.request("", &Value::Null).await.unwrap();
        assert_eq!(client.registry().cursor(), 0);

        client.request("", &Value::Null).await.unwrap();
        let status = client.health_status();
        assert_eq!(status[0].metrics.total_success, 1);
        assert_eq!(status[1].metrics.total_success, 1);
    }

    #[tokio::test]
    async fn open_circuit_is_skipped_on_next_request() {
        let cfg = config(&[A, B, C]).with_circuit_breaker(2, Duration::from_secs(30));
        let (client, mock) = client(
            cfg,
            MockTransport::default()
                .always(A, Reply::Status(503))
                .always(B, ok())
                .always(C, ok()),
        );

        client.request("", &Value::Null).await.unwrap();
        client.request("", &Value::Null).await.unwrap();
        assert_eq!(mock.calls_to(A), 2);
        assert!(client.health_status()[0].circuit_open);

        client.request("", &Value::Null).await.unwrap();
        assert_eq!(mock.calls_to(A), 2);
        assert_eq!(mock.calls_to(B), 3);
        assert_eq!(mock.calls_to(C), 0);
        assert_eq!(client.health(), HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn local_retries_count_as_one_failure() {
        let cfg = config(&[A])
            .with_retries(3)
            .with_retry_delay(Duration::from_millis(100));
        let (client, mock) = client(cfg, MockTransport::default().always(A, Reply::Status(500)));

        let started = Instant::now();
        let err = client.request("", &Value::Null).await.unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(mock.calls_to(A), 3);
        match err {
            TransportError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, TransportError::Status { status: 500, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        let metrics = client.health_status()[0].metrics;
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.total_failure, 1);
        // Duration spans the whole retry sequence, backoff included.
        assert!(metrics.average_duration_ms >= 300.0);
    }

    #[tokio::test]
    async fn terminal_error_never_reaches_second_endpoint() {
        let (client, mock) = client(
            config(&[A, B]).with_retries(3),
            MockTransport::default().always(A, Reply::Status(404)).always(B, ok()),
        );

        let err = client.request("/missing", &Value::Null).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
        assert_eq!(mock.calls_to(A), 1);
        assert_eq!(mock.calls_to(B), 0);
        assert_eq!(client.health_status()[1].metrics.total_requests, 0);
    }

    #[tokio::test]
    async fn client_error_body_mentioning_timeout_stays_terminal() {
        let (client, mock) = client(
            config(&[A, B]).with_retries(3),
            MockTransport::default()
                .always(A, Reply::Rejected(400, "invalid param: timeout must be positive"))
                .always(B, ok()),
        );

        let err = client.request("/submit", &Value::Null).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, .. }));
        assert_eq!(mock.calls_to(A), 1);
        assert_eq!(mock.calls_to(B), 0);
    }

    #[tokio::test]
    async fn all_circuits_open_fails_without_io() {
        let cfg = config(&[A, B]).with_circuit_breaker(1, Duration::from_secs(30));
        let (client, mock) = client(
            cfg,
            MockTransport::default()
                .always(A, Reply::Status(503))
                .always(B, Reply::Refused),
        );

        let err = client.request("", &Value::Null).await.unwrap_err();
        assert!(matches!(err, TransportError::Exhausted { attempts: 2, .. }));
        assert_eq!(client.health(), HealthStatus::Unhealthy);
        assert!(client.registry().select_next().is_none());

        let calls_before = mock.total_calls();
        let err = client.request("", &Value::Null).await.unwrap_err();
        assert!(matches!(err, TransportError::AllEndpointsUnavailable { last: None }));
        assert_eq!(mock.total_calls(), calls_before);
    }

    #[tokio::test]
    async fn circuit_opening_mid_request_reports_unavailable() {
        let cfg = config(&[A]).with_circuit_breaker(1, Duration::from_secs(30));
        let (client, _mock) = client(cfg, MockTransport::default().always(A, Reply::Status(503)));

        // Single endpoint: the loop ends after one pass, so the result is an
        // exhaustion error wrapping the 503.
        let err = client.request("", &Value::Null).await.unwrap_err();
        assert!(err.is_exhaustion());
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_closes_after_cooldown() {
        let cfg = config(&[A, B]).with_circuit_breaker(1, Duration::from_secs(10));
        let (client, mock) = client(
            cfg,
            MockTransport::default()
                .then(A, Reply::Status(503))
                .always(A, ok())
                .always(B, ok()),
        );

        client.request("", &Value::Null).await.unwrap();
        assert!(client.health_status()[0].circuit_open);

        tokio::time::advance(Duration::from_secs(11)).await;
        // Still open in storage until a selection observes the cool-down.
        assert!(client.health_status()[0].circuit_open);

        client.request("", &Value::Null).await.unwrap();
        let status = client.health_status();
        assert!(!status[0].circuit_open);
        assert_eq!(status[0].failure_count, 0);
        assert_eq!(mock.calls_to(A), 2);
        assert_eq!(mock.calls_to(B), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_endpoint_times_out_and_fails_over() {
        let (client, mock) = client(
            config(&[A, B]),
            MockTransport::default().always(A, Reply::Hang).always(B, ok()),
        );

        client.request("", &Value::Null).await.unwrap();
        assert_eq!(mock.calls_to(B), 1);
        let status = client.health_status();
        assert_eq!(status[0].metrics.total_failure, 1);
        assert!(status[0].metrics.average_duration_ms >= 1000.0);
    }

    #[tokio::test]
    async fn health_checks_record_outcomes_without_failing() {
        let (client, mock) = client(
            config(&[A, B]),
            MockTransport::default().always(A, ok()).always(B, Reply::Status(500)),
        );

        client.perform_health_checks().await;

        assert_eq!(mock.calls_to("mock://alpha/health"), 1);
        assert_eq!(mock.calls_to("mock://beta/health"), 1);
        let status = client.health_status();
        assert!(status[0].healthy);
        assert_eq!(status[0].metrics.total_requests, 1);
        assert_eq!(status[0].metrics.total_success, 1);
        assert!(!status[1].healthy);
        assert_eq!(status[1].failure_count, 1);
        assert_eq!(status[1].metrics.total_failure, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_probe_uses_fixed_timeout() {
        let cfg = config(&[A]).with_timeout(Duration::from_secs(60));
        let (client, _mock) = client(cfg, MockTransport::default().always(A, Reply::Hang));

        let started = Instant::now();
        client.perform_health_checks().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= HEALTH_CHECK_TIMEOUT);
        assert!(elapsed < Duration::from_secs(60));
        assert!(!client.health_status()[0].healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_health_probes_do_not_delay_each_other() {
        let (client, mock) = client(
            config(&[A, B, C]),
            MockTransport::default()
                .always(A, Reply::Hang)
                .always(B, Reply::Hang)
                .always(C, ok()),
        );

        let started = Instant::now();
        client.perform_health_checks().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= HEALTH_CHECK_TIMEOUT);
        assert!(elapsed < HEALTH_CHECK_TIMEOUT * 2);

        assert_eq!(mock.total_calls(), 3);
        let status = client.health_status();
        assert!(!status[0].healthy);
        assert_eq!(status[0].metrics.total_failure, 1);
        assert!(!status[1].healthy);
        assert_eq!(status[1].metrics.total_failure, 1);
        assert!(status[2].healthy);
        assert_eq!(status[2].metrics.total_success, 1);
    }

    #[tokio::test]
    async fn json_rpc_call_decodes_result() {
        let (client, _mock) = client(
            config(&[A]),
            MockTransport::default().always(
                A,
                Reply::Ok(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})),
            ),
        );
        let block: String = client.call("eth_blockNumber", Value::Null).await.unwrap();
        assert_eq!(block, "0x10");
    }

    #[tokio::test]
    async fn json_rpc_error_is_terminal() {
        let (client, mock) = client(
            config(&[A, B]),
            MockTransport::default()
                .always(
                    A,
                    Reply::Ok(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "error": {"code": -32601, "message": "method not found"}
                    })),
                )
                .always(B, ok()),
        );

        let err = client
            .call::<Value>("nope", json!([]))
            .await
            .unwrap_err();
        assert!(err.is_execution_error());
        assert_eq!(mock.calls_to(B), 0);
    }
}
