//! HTTP client with retry and circuit breaking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{CallResult, NetworkFailure, ResilienceError};
use crate::observability;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, Pipeline, RetryEngine, RetryPolicy};

/// Breaker name shared by every request made through the client.
pub const NETWORK_BREAKER: &str = "network_request";

/// Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Timeout for each connectivity probe.
    pub connectivity_timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Statuses treated as transient failures.
    pub status_forcelist: Vec<u16>,
    /// Endpoints probed by [`NetworkClient::check_connectivity`].
    pub health_check_urls: Vec<String>,
    /// Retry policy (default: 3 retries, 2s base delay).
    pub retry: RetryPolicy,
    /// Breaker settings (default: 5 failures, 60s).
    pub breaker: CircuitBreakerConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connectivity_timeout: Duration::from_secs(10),
            user_agent: concat!("resilience-engine/", env!("CARGO_PKG_VERSION")).to_string(),
            status_forcelist: vec![500, 502, 503, 504],
            health_check_urls: vec![
                "https://api.github.com".to_string(),
                "https://httpbin.org/status/200".to_string(),
                "https://www.google.com".to_string(),
            ],
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            breaker: CircuitBreakerConfig::network_request(),
        }
    }
}

/// Response returned by [`NetworkClient::request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Time to receive the full response.
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> CallResult<T> {
        serde_json::from_str(&self.body).map_err(|e| ResilienceError::data(format!("invalid JSON body: {e}")))
    }
}

/// Request counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Attempts made, including retries.
    pub total_requests: u64,
    /// Attempts that returned a non-transient response.
    pub successful_requests: u64,
    /// Attempts that failed.
    pub failed_requests: u64,
    /// Successful share of attempts, in percent (0 with no attempts).
    pub success_rate: f64,
    /// Mean latency of successful attempts.
    pub average_response_time: Duration,
    /// When the counters were last reset.
    pub last_reset: DateTime<Utc>,
}

#[derive(Debug)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    average: Duration,
    last_reset: DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            average: Duration::ZERO,
            last_reset: Utc::now(),
        }
    }

    fn record(&mut self, success: bool, latency: Duration) {
        self.total += 1;
        if success {
            self.successful += 1;
            // Running mean over successful attempts
            let n = self.successful as f64;
            let mean = self.average.as_secs_f64().mul_add(n - 1.0, latency.as_secs_f64()) / n;
            self.average = Duration::from_secs_f64(mean);
        } else {
            self.failed += 1;
        }
    }
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// Responded with 200.
    Success,
    /// Responded with another status.
    Failed,
    /// No response.
    Error,
}

/// Probe result for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCheck {
    /// Probed URL.
    pub url: String,
    /// Classification.
    pub status: EndpointStatus,
    /// Status code, when a response arrived.
    pub status_code: Option<u16>,
    /// Latency, when the probe succeeded.
    pub latency: Option<Duration>,
    /// Transport error, when no response arrived.
    pub error: Option<String>,
}

/// Result of [`NetworkClient::check_connectivity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityReport {
    /// At least one endpoint succeeded.
    pub connected: bool,
    /// Per-endpoint results in probe order.
    pub checked_urls: Vec<EndpointCheck>,
    /// Endpoints that succeeded.
    pub successful_checks: usize,
    /// Endpoints that failed or errored.
    pub failed_checks: usize,
    /// Mean latency of successful probes.
    pub average_latency: Duration,
    /// When the probes ran.
    pub timestamp: DateTime<Utc>,
}

impl ConnectivityReport {
    /// Successful share of probes, in percent (0 with no probes).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_checks + self.failed_checks;
        if total == 0 {
            0.0
        } else {
            self.successful_checks as f64 / total as f64 * 100.0
        }
    }
}

/// HTTP client whose requests pass through retry and the `network_request`
/// breaker.
pub struct NetworkClient {
    http: Client,
    config: NetworkConfig,
    pipeline: Pipeline<HttpResponse>,
    breakers: Arc<CircuitBreakerRegistry>,
    counters: Mutex<Counters>,
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl NetworkClient {
    /// Build a client.
    ///
    /// Retry runs outside the breaker, so each attempt is seen by the
    /// breaker and retries stop early once it opens.
    pub fn new(
        config: NetworkConfig,
        engine: RetryEngine,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> CallResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ResilienceError::network(NetworkFailure::Transport, e.to_string()))?;

        let pipeline = Pipeline::new(NETWORK_BREAKER)
            .retry(engine, config.retry)
            .circuit_breaker(Arc::clone(&breakers), NETWORK_BREAKER, config.breaker);

        Ok(Self {
            http,
            config,
            pipeline,
            breakers,
            counters: Mutex::new(Counters::new()),
        })
    }

    /// Client settings.
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The breaker registry requests are guarded by.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// GET `url`.
    pub async fn get(&self, url: &str) -> CallResult<HttpResponse> {
        self.request(Method::GET, url, None).await
    }

    /// POST `body` as JSON to `url`.
    pub async fn post_json(&self, url: &str, body: &Value) -> CallResult<HttpResponse> {
        self.request(Method::POST, url, Some(body)).await
    }

    /// Send a request with retry and circuit breaking.
    ///
    /// Statuses in `status_forcelist` fail with a network error and are
    /// retried; 429 fails with `RateLimitExceeded`. Other statuses,
    /// including 4xx, are returned as responses.
    pub async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> CallResult<HttpResponse> {
        self.pipeline
            .execute(|| self.send_once(method.clone(), url, body))
            .await
    }

    async fn send_once(&self, method: Method, url: &str, body: Option<&Value>) -> CallResult<HttpResponse> {
        let started = Instant::now();
        tracing::debug!(method = %method, url = url, "Sending request");

        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let result = match request.send().await {
            Ok(response) => self.read_response(url, response, started).await,
            Err(e) => Err(classify_transport(url, &e)),
        };

        let elapsed = started.elapsed();
        let success = result.is_ok();
        self.counters.lock().record(success, elapsed);
        observability::record_http_request(
            method.as_str(),
            if success { "success" } else { "failure" },
            elapsed.as_secs_f64(),
        );

        match &result {
            Ok(response) => tracing::debug!(url = url, status = response.status, "Request completed"),
            Err(e) => tracing::warn!(url = url, error = %e, "Request failed"),
        }
        result
    }

    async fn read_response(
        &self,
        url: &str,
        response: reqwest::Response,
        started: Instant,
    ) -> CallResult<HttpResponse> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(Duration::from_secs(60), Duration::from_secs);
            return Err(ResilienceError::RateLimitExceeded {
                api: host_of(url),
                wait,
            });
        }

        if self.config.status_forcelist.contains(&status.as_u16()) {
            return Err(ResilienceError::network(
                NetworkFailure::HttpStatus(status.as_u16()),
                format!("HTTP {status} from {url}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResilienceError::network(NetworkFailure::Transport, e.to_string()))?;
        Ok(HttpResponse {
            status: status.as_u16(),
            body,
            elapsed: started.elapsed(),
        })
    }

    /// Probe each URL once with a plain GET, bypassing retry and the breaker.
    pub async fn check_connectivity(&self, urls: &[String]) -> ConnectivityReport {
        let probes = urls.iter().map(|url| self.probe(url));
        let checked_urls = futures::future::join_all(probes).await;

        let successes: Vec<Duration> = checked_urls
            .iter()
            .filter(|c| c.status == EndpointStatus::Success)
            .filter_map(|c| c.latency)
            .collect();
        let successful_checks = successes.len();
        let average_latency = if successful_checks == 0 {
            Duration::ZERO
        } else {
            successes.iter().sum::<Duration>() / successful_checks as u32
        };

        let report = ConnectivityReport {
            connected: successful_checks > 0,
            successful_checks,
            failed_checks: checked_urls.len() - successful_checks,
            checked_urls,
            average_latency,
            timestamp: Utc::now(),
        };

        if report.connected {
            tracing::info!(
                successful = report.successful_checks,
                total = urls.len(),
                "Connectivity check passed"
            );
        } else {
            tracing::error!(total = urls.len(), "Connectivity check failed");
        }
        report
    }

    /// Probe the configured health-check URLs.
    pub async fn check_default_connectivity(&self) -> ConnectivityReport {
        self.check_connectivity(&self.config.health_check_urls).await
    }

    async fn probe(&self, url: &str) -> EndpointCheck {
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .timeout(self.config.connectivity_timeout)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::OK => EndpointCheck {
                url: url.to_string(),
                status: EndpointStatus::Success,
                status_code: Some(200),
                latency: Some(started.elapsed()),
                error: None,
            },
            Ok(response) => EndpointCheck {
                url: url.to_string(),
                status: EndpointStatus::Failed,
                status_code: Some(response.status().as_u16()),
                latency: None,
                error: None,
            },
            Err(e) => EndpointCheck {
                url: url.to_string(),
                status: EndpointStatus::Error,
                status_code: None,
                latency: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Request counters.
    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        let counters = self.counters.lock();
        let success_rate = if counters.total == 0 {
            0.0
        } else {
            counters.successful as f64 / counters.total as f64 * 100.0
        };
        NetworkStats {
            total_requests: counters.total,
            successful_requests: counters.successful,
            failed_requests: counters.failed,
            success_rate,
            average_response_time: counters.average,
            last_reset: counters.last_reset,
        }
    }

    /// Zero the request counters.
    pub fn reset_stats(&self) {
        *self.counters.lock() = Counters::new();
    }
}

fn classify_transport(url: &str, error: &reqwest::Error) -> ResilienceError {
    let failure = if error.is_timeout() {
        NetworkFailure::Timeout
    } else if error.is_connect() {
        NetworkFailure::ConnectionRefused
    } else {
        NetworkFailure::Transport
    };
    ResilienceError::network(failure, format!("{url}: {error}"))
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error_store::ErrorStore;
    use crate::resilience::{CircuitBreakerState, RecoveryRegistry};

    fn client(retries: u32, breaker: CircuitBreakerConfig) -> NetworkClient {
        let engine = RetryEngine::new(
            Arc::new(ErrorStore::new()),
            Arc::new(RecoveryRegistry::empty(Duration::from_secs(30))),
        );
        let config = NetworkConfig {
            timeout: Duration::from_millis(500),
            connectivity_timeout: Duration::from_millis(500),
            retry: RetryPolicy::new(retries, Duration::from_millis(10)).without_jitter(),
            breaker,
            ..NetworkConfig::default()
        };
        NetworkClient::new(
            config,
            engine,
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn test_get_success_updates_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let client = client(0, CircuitBreakerConfig::default());
        let response = client.get(&format!("{}/ok", server.uri())).await.expect("response");
        assert!(response.is_success());
        let body: Value = response.json().expect("json");
        assert_eq!(body["ok"], true);

        let stats = client.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
        assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(3, CircuitBreakerConfig::default());
        let response = client.get(&format!("{}/flaky", server.uri())).await.expect("response");
        assert_eq!(response.status, 200);

        let stats = client.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.failed_requests, 2);
    }

    #[tokio::test]
    async fn test_client_error_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(3, CircuitBreakerConfig::default());
        let response = client.get(&format!("{}/missing", server.uri())).await.expect("response");
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let client = client(0, CircuitBreakerConfig::default());
        let err = client.get(&server.uri()).await.expect_err("rate limited");
        assert_eq!(err.wait_hint(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_timeout_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = client(0, CircuitBreakerConfig::default());
        let err = client.get(&server.uri()).await.expect_err("timeout");
        assert!(matches!(
            err,
            ResilienceError::Network {
                failure: NetworkFailure::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_stops_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client(5, CircuitBreakerConfig::new(2, Duration::from_secs(60)));
        let err = client.get(&server.uri()).await.expect_err("open");
        assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
        assert_eq!(client.stats().total_requests, 2);

        let breaker = client.breakers().get(NETWORK_BREAKER).expect("breaker");
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn test_connectivity_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(0, CircuitBreakerConfig::default());
        let urls = vec![format!("{}/up", server.uri()), format!("{}/down", server.uri())];
        let report = client.check_connectivity(&urls).await;

        assert!(report.connected);
        assert_eq!(report.successful_checks, 1);
        assert_eq!(report.failed_checks, 1);
        assert_eq!(report.checked_urls[1].status, EndpointStatus::Failed);
        assert_eq!(report.checked_urls[1].status_code, Some(503));
        assert!((report.success_rate() - 50.0).abs() < f64::EPSILON);
        // Probes bypass the client counters
        assert_eq!(client.stats().total_requests, 0);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://api.github.com/repos"), "api.github.com");
        assert_eq!(host_of("not a url"), "not a url");
    }
}
