use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use webhook_events::DeliveryResponse;

/// Responses larger than this are truncated before being stored.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Transport-level failure. An HTTP error status is not one of these: the
/// client hands back a [`DeliveryResponse`] for every status code.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else if err.is_builder() {
            HttpClientError::InvalidUrl(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// HTTP client wrapper for webhook delivery
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
}

impl WebhookHttpClient {
    /// Every request is bounded by `timeout`, connection set-up included.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// POST a JSON body and capture whatever the endpoint answers.
    pub async fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(&str, String)],
    ) -> Result<DeliveryResponse, HttpClientError> {
        reqwest::Url::parse(url).map_err(|e| HttpClientError::InvalidUrl(format!("{url}: {e}")))?;
        debug!(url = %url, "Sending webhook");

        let start = Instant::now();
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.body(body).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Webhook request failed");
            HttpClientError::from_reqwest(e, self.timeout)
        })?;

        let status_code = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = self.read_response_body(response).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            url = %url,
            status = %status_code,
            duration_ms = %duration_ms,
            "Webhook response received"
        );

        Ok(DeliveryResponse {
            status_code,
            body,
            headers,
            duration_ms,
        })
    }

    /// Read at most `MAX_BODY_SIZE` bytes of the body. The rest is never
    /// pulled off the connection.
    async fn read_response_body(&self, mut response: Response) -> Result<String, HttpClientError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HttpClientError::from_reqwest(e, self.timeout))?
        {
            let room = MAX_BODY_SIZE - bytes.len();
            if chunk.len() > room {
                bytes.extend_from_slice(&chunk[..room]);
                warn!(max_size = MAX_BODY_SIZE, "Response body too large, truncating");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Get configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_http_client_with_custom_timeout() -> Result<(), HttpClientError> {
        let timeout = Duration::from_secs(10);
        let client = WebhookHttpClient::new(timeout, "test-agent/1.0")?;
        assert_eq!(client.timeout(), timeout);
        Ok(())
    }

    #[test]
    fn test_http_client_error_display() {
        let err = HttpClientError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Request timeout after 30s");

        let err = HttpClientError::InvalidUrl("invalid".to_string());
        assert_eq!(err.to_string(), "Invalid URL: invalid");

        let err = HttpClientError::NetworkError("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() -> Result<(), HttpClientError> {
        let client = WebhookHttpClient::new(Duration::from_secs(1), "test-agent/1.0")?;
        let result = client.post_json("not a url", b"{}".to_vec(), &[]).await;
        assert!(matches!(result, Err(HttpClientError::InvalidUrl(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_transport_error() -> Result<(), HttpClientError> {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?
            .port();
        drop(listener);

        let client = WebhookHttpClient::new(Duration::from_secs(2), "test-agent/1.0")?;
        let result = client
            .post_json(&format!("http://127.0.0.1:{port}/hook"), b"{}".to_vec(), &[])
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_body_is_cut_off_without_reading_the_rest() -> Result<(), HttpClientError>
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?
            .port();

        // Announces 64 MB, sends 2 MB, then stalls with the connection open.
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.ends_with(b"{}") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\n\r\n",
                64 * MAX_BODY_SIZE
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&vec![b'x'; 2 * MAX_BODY_SIZE]).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = WebhookHttpClient::new(Duration::from_secs(5), "test-agent/1.0")?;
        let response = client
            .post_json(&format!("http://127.0.0.1:{port}/hook"), b"{}".to_vec(), &[])
            .await?;

        assert_eq!(response.status_code, 500);
        assert_eq!(response.body.len(), MAX_BODY_SIZE);
        Ok(())
    }
}
