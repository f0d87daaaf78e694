use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use application::retry::retry_with_backoff;
use domain::common::error::DomainError;
use domain::export::circuit_breaker::{CircuitBreaker, CircuitState};
use domain::ingest::backoff::BackoffPolicy;
use domain::ingest::entity::CanonicalFlow;
use infrastructure::config::HttpSinkConfig;
use ports::secondary::flow_sink::FlowSink;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

/// Sink that POSTs each batch as a JSON array.
///
/// Deliveries go through a circuit breaker: once open, batches fail fast
/// until the open window elapses and a single probe is let through.
pub struct HttpSink {
    name: String,
    url: String,
    client: reqwest::Client,
    policy: BackoffPolicy,
    breaker: Mutex<CircuitBreaker>,
    cancel: CancellationToken,
}

impl HttpSink {
    pub fn new(config: &HttpSinkConfig, cancel: CancellationToken) -> Result<Self, DomainError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                DomainError::InvalidConfig(format!("sink '{}' header '{key}': {e}", config.name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DomainError::InvalidConfig(format!("sink '{}' header '{key}': {e}", config.name))
            })?;
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DomainError::InvalidConfig(format!("sink '{}': {e}", config.name)))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
            policy: config.backoff_policy(),
            breaker: Mutex::new(CircuitBreaker::new(
                config.failure_threshold,
                config.open_duration(),
            )),
            cancel,
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker_lock().state()
    }

    fn breaker_lock(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn post_once(&self, body: &[u8]) -> Result<(), DomainError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| DomainError::Unavailable(format!("POST {}: {e}", self.url)))?;
        classify_status(response.status().as_u16())
    }
}

/// 429 and 5xx are worth retrying; any other non-2xx is the sink
/// refusing the data.
fn classify_status(status: u16) -> Result<(), DomainError> {
    match status {
        200..=299 => Ok(()),
        429 | 500..=599 => Err(DomainError::Unavailable(format!("sink returned HTTP {status}"))),
        _ => Err(DomainError::InvalidInput(format!("sink rejected batch with HTTP {status}"))),
    }
}

impl FlowSink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(
        &'a self,
        flows: &'a [CanonicalFlow],
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.breaker_lock().can_attempt() {
                return Err(DomainError::Unavailable(format!(
                    "circuit open for sink '{}'",
                    self.name
                )));
            }

            let body = serde_json::to_vec(flows)
                .map_err(|e| DomainError::EngineError(format!("serialize flows: {e}")))?;
            let result =
                retry_with_backoff(&self.policy, &self.cancel, || self.post_once(&body)).await;

            let mut breaker = self.breaker_lock();
            let before = breaker.state();
            match &result {
                Ok(()) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
            let after = breaker.state();
            if before != after {
                tracing::warn!(
                    sink = %self.name,
                    from = before.as_str(),
                    to = after.as_str(),
                    "sink circuit changed state"
                );
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    use super::*;

    fn make_config(url: String, max_retries: u32, failure_threshold: usize) -> HttpSinkConfig {
        HttpSinkConfig {
            name: "siem".to_string(),
            url,
            headers: BTreeMap::from([("x-tenant".to_string(), "t1".to_string())]),
            timeout_ms: 1_000,
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            failure_threshold,
            open_secs: 60,
        }
    }

    /// Local server answering every POST with `status`, counting hits.
    async fn spawn_server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/flows",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/flows"), hits)
    }

    // ── Status classification ──────────────────────────────────────

    #[test]
    fn status_classes() {
        assert!(classify_status(204).is_ok());
        assert!(matches!(classify_status(503), Err(DomainError::Unavailable(_))));
        assert!(matches!(classify_status(429), Err(DomainError::Unavailable(_))));
        assert!(matches!(classify_status(400), Err(DomainError::InvalidInput(_))));
    }

    #[test]
    fn bad_header_is_config_error() {
        let mut config = make_config("http://127.0.0.1:1/".to_string(), 0, 1);
        config.headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            HttpSink::new(&config, CancellationToken::new()),
            Err(DomainError::InvalidConfig(_))
        ));
    }

    // ── Delivery ───────────────────────────────────────────────────

    #[tokio::test]
    async fn delivers_on_2xx() {
        let (url, hits) = spawn_server(StatusCode::OK).await;
        let sink = HttpSink::new(&make_config(url, 2, 3), CancellationToken::new()).unwrap();
        sink.deliver(&[CanonicalFlow::default()]).await.unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(sink.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn retries_5xx_then_gives_up() {
        let (url, hits) = spawn_server(StatusCode::BAD_GATEWAY).await;
        let sink = HttpSink::new(&make_config(url, 2, 10), CancellationToken::new()).unwrap();
        assert!(sink.deliver(&[CanonicalFlow::default()]).await.is_err());
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let (url, hits) = spawn_server(StatusCode::UNPROCESSABLE_ENTITY).await;
        let sink = HttpSink::new(&make_config(url, 3, 10), CancellationToken::new()).unwrap();
        let err = sink.deliver(&[CanonicalFlow::default()]).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn circuit_opens_and_fails_fast() {
        let (url, hits) = spawn_server(StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = HttpSink::new(&make_config(url, 0, 2), CancellationToken::new()).unwrap();
        let flows = [CanonicalFlow::default()];

        assert!(sink.deliver(&flows).await.is_err());
        assert!(sink.deliver(&flows).await.is_err());
        assert_eq!(sink.circuit_state(), CircuitState::Open);

        let err = sink.deliver(&flows).await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
