//! HTTP-based probes: reachability, latency and security headers.

use std::time::Duration;

use async_trait::async_trait;
use remedy_types::{ProbeId, ProbeKind};
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::{Probe, ProbeReading};
use crate::error::ProbeResult;

/// Headers checked by [`SecurityHeadersProbe::new`].
pub const DEFAULT_SECURITY_HEADERS: &[&str] = &[
    "strict-transport-security",
    "x-content-type-options",
    "x-frame-options",
    "content-security-policy",
];

/// Reachability probe: GET a URL, healthy on any 2xx status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    id: ProbeId,
    url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: ProbeId::new(id),
            url: url.into(),
            client: Client::new(),
        }
    }

    /// Use a preconfigured client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn id(&self) -> &ProbeId {
        &self.id
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Reachability
    }

    #[instrument(skip(self), fields(probe = %self.id, url = %self.url))]
    async fn probe(&self) -> ProbeResult<ProbeReading> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "HTTP probe response");

        if status.is_success() {
            Ok(ProbeReading::healthy(format!("GET {} returned {}", self.url, status)))
        } else {
            Ok(ProbeReading::unhealthy(format!(
                "GET {} returned {}",
                self.url, status
            )))
        }
    }
}

/// Performance probe: GET a URL, healthy when the round trip stays under a threshold.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    id: ProbeId,
    url: String,
    threshold: Duration,
    client: Client,
}

impl LatencyProbe {
    pub fn new(id: impl Into<String>, url: impl Into<String>, threshold: Duration) -> Self {
        Self {
            id: ProbeId::new(id),
            url: url.into(),
            threshold,
            client: Client::new(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Probe for LatencyProbe {
    fn id(&self) -> &ProbeId {
        &self.id
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Performance
    }

    #[instrument(skip(self), fields(probe = %self.id, url = %self.url))]
    async fn probe(&self) -> ProbeResult<ProbeReading> {
        let start = Instant::now();
        let response = self.client.get(&self.url).send().await?;
        // Include the body in the measured round trip.
        let _ = response.bytes().await?;
        let elapsed = start.elapsed();

        let threshold_ms = self.threshold.as_millis();
        if elapsed <= self.threshold {
            Ok(ProbeReading::healthy(format!(
                "response time {}ms within {}ms",
                elapsed.as_millis(),
                threshold_ms
            )))
        } else {
            // Detail omits the measured value so repeated slow responses
            // share one fingerprint.
            Ok(ProbeReading::unhealthy(format!(
                "response time above {threshold_ms}ms threshold for {}",
                self.url
            )))
        }
    }
}

/// Security probe: GET a URL, healthy when every required header is present.
#[derive(Debug, Clone)]
pub struct SecurityHeadersProbe {
    id: ProbeId,
    url: String,
    required: Vec<String>,
    client: Client,
}

impl SecurityHeadersProbe {
    /// Probe for [`DEFAULT_SECURITY_HEADERS`].
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_headers(
            id,
            url,
            DEFAULT_SECURITY_HEADERS.iter().map(|h| h.to_string()),
        )
    }

    /// Probe for a custom header list.
    pub fn with_headers(
        id: impl Into<String>,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: ProbeId::new(id),
            url: url.into(),
            required: headers.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            client: Client::new(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Probe for SecurityHeadersProbe {
    fn id(&self) -> &ProbeId {
        &self.id
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Security
    }

    #[instrument(skip(self), fields(probe = %self.id, url = %self.url))]
    async fn probe(&self) -> ProbeResult<ProbeReading> {
        let response = self.client.get(&self.url).send().await?;
        let headers = response.headers();

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| !headers.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(ProbeReading::healthy("all required security headers present"))
        } else {
            Ok(ProbeReading::unhealthy(format!(
                "missing security headers: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection, forever.
    async fn serve_canned(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/health", addr)
    }

    const OK: &str = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const HARDENED: &str = "HTTP/1.1 200 OK\r\n\
        strict-transport-security: max-age=63072000\r\n\
        x-content-type-options: nosniff\r\n\
        x-frame-options: DENY\r\n\
        content-security-policy: default-src 'self'\r\n\
        content-length: 0\r\nconnection: close\r\n\r\n";

    #[tokio::test]
    async fn test_http_probe_healthy() {
        let url = serve_canned(OK).await;
        let reading = HttpProbe::new("api", url).probe().await.unwrap();
        assert!(reading.ok);
        assert!(reading.detail.contains("200"));
    }

    #[tokio::test]
    async fn test_http_probe_unhealthy_status() {
        let url = serve_canned(UNAVAILABLE).await;
        let reading = HttpProbe::new("api", url).probe().await.unwrap();
        assert!(!reading.ok);
        assert!(reading.detail.contains("503"));
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        // Bind then drop to obtain a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpProbe::new("api", format!("http://{}/", addr))
            .probe()
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }

    #[tokio::test]
    async fn test_latency_probe_within_threshold() {
        let url = serve_canned(OK).await;
        let reading = LatencyProbe::new("latency", url, Duration::from_secs(5))
            .probe()
            .await
            .unwrap();
        assert!(reading.ok);
    }

    #[tokio::test]
    async fn test_latency_probe_above_threshold() {
        let url = serve_canned(OK).await;
        let reading = LatencyProbe::new("latency", url, Duration::ZERO)
            .probe()
            .await
            .unwrap();
        assert!(!reading.ok);
        assert!(reading.detail.starts_with("response time above 0ms"));
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let url = serve_canned(HARDENED).await;
        let reading = SecurityHeadersProbe::new("headers", url).probe().await.unwrap();
        assert!(reading.ok);
    }

    #[tokio::test]
    async fn test_security_headers_missing() {
        let url = serve_canned(OK).await;
        let reading = SecurityHeadersProbe::with_headers(
            "headers",
            url,
            vec!["X-Frame-Options".to_string()],
        )
        .probe()
        .await
        .unwrap();
        assert!(!reading.ok);
        assert_eq!(reading.detail, "missing security headers: x-frame-options");
    }
}
