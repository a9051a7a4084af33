//! HTTP probe implementation.

use async_trait::async_trait;
use std::time::Duration;

use super::{Classification, ProbeError, Prober};
use crate::db::Observation;

/// Issues one GET per check with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
    classification: Classification,
}

impl HttpProber {
    pub fn new(timeout: Duration, classification: Classification) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("uptrail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            classification,
        })
    }

    /// Returns the response status code.
    async fn get(&self, url: &str) -> Result<u16, (ProbeError, u16)> {
        match self.client.get(url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => {
                let code = e.status().map_or(0, |s| s.as_u16());
                let err = if e.is_timeout() {
                    ProbeError::Timeout(self.timeout)
                } else {
                    ProbeError::Network(e.to_string())
                };
                Err((err, code))
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: &str) -> Observation {
        let url = normalize_url(address);

        match self.get(&url).await {
            Ok(code) => self.classification.classify(code),
            Err((e, code)) => {
                tracing::debug!("HTTP probe failed for {}: {}", url, e);
                Observation::offline(code)
            }
        }
    }
}

/// Probe bare host names over plain HTTP.
pub fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Status;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response on a local port and return its URL.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/health", addr)
    }

    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const OK: &str = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";

    #[tokio::test]
    async fn test_ok_response_is_online() {
        let url = serve_once(OK).await;
        let prober = HttpProber::new(Duration::from_secs(2), Classification::AnyResponse).unwrap();
        assert_eq!(prober.probe(&url).await, Observation::online(200));
    }

    #[tokio::test]
    async fn test_error_code_with_any_response() {
        let url = serve_once(UNAVAILABLE).await;
        let prober = HttpProber::new(Duration::from_secs(2), Classification::AnyResponse).unwrap();
        assert_eq!(prober.probe(&url).await, Observation::online(503));
    }

    #[tokio::test]
    async fn test_error_code_with_success_only() {
        let url = serve_once(UNAVAILABLE).await;
        let prober = HttpProber::new(Duration::from_secs(2), Classification::SuccessOnly).unwrap();
        assert_eq!(prober.probe(&url).await, Observation::offline(503));
    }

    #[tokio::test]
    async fn test_connection_refused_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HttpProber::new(Duration::from_secs(2), Classification::AnyResponse).unwrap();
        let obs = prober.probe(&format!("http://{}", addr)).await;
        assert_eq!(obs.status, Status::Offline);
        assert_eq!(obs.status_code, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(socket);
            }
        });

        let prober = HttpProber::new(Duration::from_millis(200), Classification::AnyResponse).unwrap();
        let started = std::time::Instant::now();
        let obs = prober.probe(&format!("http://{}", addr)).await;
        assert_eq!(obs, Observation::offline(0));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_invalid_host_is_offline() {
        let prober = HttpProber::new(Duration::from_millis(100), Classification::AnyResponse).unwrap();
        let obs = prober.probe("http://256.256.256.256").await;
        assert_eq!(obs, Observation::offline(0));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com/x"), "https://example.com/x");
    }
}
