//! `HttpClient` backed by reqwest.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pooled reqwest client.
///
/// Makes exactly one attempt per `execute`; the cache and the sync queue
/// decide what happens after a failure.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client whose requests give up after `timeout` unless the request
    /// carries its own deadline.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .user_agent(concat!("offline-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map(Self::with_client)
            .map_err(|e| BridgeError::NotAvailable(format!("reqwest client unavailable: {}", e)))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> BridgeError {
    let cause = if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("could not connect ({})", e)
    } else {
        e.to_string()
    };
    BridgeError::Network(format!("{}: {}", url, cause))
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[instrument(skip_all, fields(method = %request.method))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method: verb,
            url,
            headers,
            body,
            timeout,
        } = request;

        let mut builder = self.client.request(method(verb), &url);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        // A body cut off mid-transfer is a transport failure, not a response
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, e))?;

        debug!(status, bytes = body.len(), "Response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP/1.1 response and close.
    async fn serve_once(raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(raw.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Head), Method::HEAD);
        assert_eq!(method(HttpMethod::Patch), Method::PATCH);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let base = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 4\r\n\
             Connection: close\r\n\r\nbusy",
        )
        .await;

        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let response = client
            .execute(HttpRequest::new(HttpMethod::Post, format!("{}/api/posts", base)).body("{}"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.header_value("content-type"), Some("text/plain"));
        assert_eq!(&response.body[..], b"busy");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop a listener so the port is known to be closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        let err = client
            .execute(HttpRequest::get(format!("http://{}/api/posts", addr)))
            .await
            .unwrap_err();

        assert!(err.is_network());
    }
}
