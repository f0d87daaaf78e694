use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use domain::common::error::DomainError;
use domain::ingest::payload::EncodedBatch;
use infrastructure::config::MapperConfig;
use ports::secondary::batch_transport::BatchTransport;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};

/// Header carrying the mapper's per-batch trace id. The gateway adopts
/// it as the audit record id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// POSTs encoded batches to the gateway's `/ingest`.
///
/// Any HTTP response is returned as its status code so the mapper can
/// decide between accept, split and retry. Only connection-level
/// failures are errors.
pub struct HttpBatchTransport {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl HttpBatchTransport {
    pub fn new(config: &MapperConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("flowgate-mapper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DomainError::EngineError(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            url: config.gateway_url.clone(),
            bearer: config.api_key.clone(),
        })
    }
}

impl BatchTransport for HttpBatchTransport {
    fn send<'a>(
        &'a self,
        batch: &'a EncodedBatch,
        trace_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DomainError>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .header(TRACE_ID_HEADER, trace_id)
                .body(batch.body.clone());
            if batch.gzipped {
                request = request.header(CONTENT_ENCODING, "gzip");
            }
            if let Some(ref key) = self.bearer {
                request = request.header(AUTHORIZATION, format!("Bearer {key}"));
            }

            let response = request.send().await.map_err(|e| {
                DomainError::Unavailable(format!("POST {} failed: {e}", self.url))
            })?;
            Ok(response.status().as_u16())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    use super::*;

    type Seen = Arc<Mutex<Vec<(Option<String>, Option<String>, Option<String>)>>>;

    async fn spawn_gateway(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let log = Arc::clone(&seen);
        let app = Router::new().route(
            "/ingest",
            post(move |headers: HeaderMap| {
                let log = Arc::clone(&log);
                async move {
                    let get = |name: &str| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string)
                    };
                    log.lock().unwrap().push((
                        get("content-encoding"),
                        get("authorization"),
                        get("x-trace-id"),
                    ));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/ingest"), seen)
    }

    fn make_config(url: String, api_key: Option<&str>) -> MapperConfig {
        MapperConfig {
            gateway_url: url,
            api_key: api_key.map(ToString::to_string),
            request_timeout_ms: 2_000,
            ..MapperConfig::default()
        }
    }

    fn make_batch(gzipped: bool) -> EncodedBatch {
        EncodedBatch {
            body: b"{}".to_vec(),
            gzipped,
            record_count: 1,
            raw_len: 2,
        }
    }

    #[tokio::test]
    async fn sends_headers_and_returns_status() {
        let (url, seen) = spawn_gateway(StatusCode::OK).await;
        let transport = HttpBatchTransport::new(&make_config(url, Some("k1"))).unwrap();

        let status = transport.send(&make_batch(true), "trace-1").await.unwrap();
        assert_eq!(status, 200);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                Some("gzip".to_string()),
                Some("Bearer k1".to_string()),
                Some("trace-1".to_string())
            )
        );
    }

    #[tokio::test]
    async fn plain_batch_has_no_encoding_or_auth() {
        let (url, seen) = spawn_gateway(StatusCode::PAYLOAD_TOO_LARGE).await;
        let transport = HttpBatchTransport::new(&make_config(url, None)).unwrap();

        let status = transport.send(&make_batch(false), "t").await.unwrap();
        assert_eq!(status, 413);
        let seen = seen.lock().unwrap();
        assert!(seen[0].0.is_none());
        assert!(seen[0].1.is_none());
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        // Port 1 on loopback is never listening in a test sandbox.
        let transport =
            HttpBatchTransport::new(&make_config("http://127.0.0.1:1/ingest".to_string(), None))
                .unwrap();
        let err = transport.send(&make_batch(false), "t").await.unwrap_err();
        assert!(matches!(err, DomainError::Unavailable(_)));
    }
}
