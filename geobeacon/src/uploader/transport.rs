//! Upload transport trait and HTTP implementation.
//!
//! The [`UploadTransport`] trait is the pipeline's network seam: tests
//! substitute a recording mock, production uses [`HttpTransport`] backed
//! by a reusable `reqwest::Client` with fixed timeouts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Connect timeout for collector requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout (covers send and response read).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type the collector expects.
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Errors raised by an upload transport.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Failed to construct the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The request failed before an HTTP status was received.
    #[error("{0}")]
    Transport(String),
}

/// Transport used to deliver serialized payloads to the collector.
///
/// Implementations return the HTTP status code; mapping status codes to
/// [`DeliveryStatus`](crate::fix::DeliveryStatus) is the pipeline's job.
pub trait UploadTransport: Send + Sync {
    /// POST `body` to `url` and return the response status code.
    fn send(
        &self,
        url: &str,
        body: String,
    ) -> impl Future<Output = Result<u16, UploadError>> + Send;
}

/// HTTP transport with connection pooling and fixed timeouts.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create the transport. Connect timeout 10s, total timeout 30s.
    pub fn new() -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UploadError::ClientBuild(e.to_string()))?;
        Ok(Self { http })
    }
}

impl UploadTransport for HttpTransport {
    async fn send(&self, url: &str, body: String) -> Result<u16, UploadError> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let transport = HttpTransport::new().unwrap();
        let result = transport.send("not-a-url", "{}".to_string()).await;
        assert!(matches!(result, Err(UploadError::Transport(_))));
    }
}
