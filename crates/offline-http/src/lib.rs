//! # Offline HTTP
//!
//! Minimal HTTP/1.1 client used as the live network behind the offline
//! site worker.
//!
//! One connection per request (`Connection: close`), redirects followed,
//! TLS through native-tls. [`HttpNetwork`] adapts the client to the
//! worker's [`Network`](offline_sw::Network) seam.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use native_tls::TlsConnector as NativeTlsConnector;
use offline_common::with_timeout;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;
use tracing::{debug, trace};
use url::Url;

mod network;
mod wire;

pub use network::HttpNetwork;

/// HTTP client errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Final response of a request, after redirects.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL the body was served from.
    pub url: Url,
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string.
    pub user_agent: String,
    /// Limit for one request including redirects.
    pub timeout: Duration,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Largest response body accepted, in bytes.
    pub max_body_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "OfflineSW/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            follow_redirects: true,
            max_body_size: 64 * 1024 * 1024,
        }
    }
}

/// HTTP client.
pub struct Client {
    config: ClientConfig,
    tls_connector: TlsConnector,
}

impl Client {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::default())
    }

    /// Fails only if the platform TLS backend cannot be initialized.
    pub fn with_config(config: ClientConfig) -> Result<Self, HttpError> {
        let native_connector =
            NativeTlsConnector::new().map_err(|e| HttpError::TlsError(e.to_string()))?;

        Ok(Self {
            config,
            tls_connector: TlsConnector::from(native_connector),
        })
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        let url = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
        self.request(Method::GET, url, HeaderMap::new(), None).await
    }

    /// Perform an HTTP request, following redirects.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response, HttpError> {
        with_timeout(
            self.config.timeout,
            self.request_following(method, url, headers, body),
        )
        .await
        .map_err(|_| HttpError::Timeout)?
    }

    async fn request_following(
        &self,
        mut method: Method,
        mut url: Url,
        headers: HeaderMap,
        mut body: Option<Bytes>,
    ) -> Result<Response, HttpError> {
        for _ in 0..=self.config.max_redirects {
            debug!(method = %method, url = %url, "HTTP request");
            let raw = self.exchange(&method, &url, &headers, body.as_ref()).await?;

            let location = raw
                .headers
                .get(http::header::LOCATION)
                .and_then(|v| v.to_str().ok());
            let redirect = self.config.follow_redirects
                && raw.status.is_redirection()
                && raw.status != StatusCode::NOT_MODIFIED;

            let Some(location) = location.filter(|_| redirect) else {
                return Ok(Response {
                    status: raw.status,
                    version: raw.version,
                    headers: raw.headers,
                    body: raw.body,
                    url,
                });
            };

            let next = url
                .join(location)
                .map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
            debug!(from = %url, to = %next, status = %raw.status, "Following redirect");

            // 307/308 replay the request; the others turn into a GET.
            if !matches!(
                raw.status,
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
            ) && method != Method::HEAD
            {
                method = Method::GET;
                body = None;
            }
            url = next;
        }

        Err(HttpError::TooManyRedirects)
    }

    /// One request/response exchange on a fresh connection.
    async fn exchange(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<RawResponse, HttpError> {
        let scheme = url.scheme();
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("Missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::UnsupportedScheme(scheme.to_string()))?;

        let stream = match scheme {
            "http" | "https" => TcpStream::connect((host, port))
                .await
                .map_err(|e| HttpError::ConnectionFailed(format!("{host}:{port}: {e}")))?,
            _ => return Err(HttpError::UnsupportedScheme(scheme.to_string())),
        };

        if scheme == "https" {
            let tls_stream = self
                .tls_connector
                .connect(host, stream)
                .await
                .map_err(|e| HttpError::TlsError(e.to_string()))?;
            self.send_request(tls_stream, method, url, headers, body).await
        } else {
            self.send_request(stream, method, url, headers, body).await
        }
    }

    async fn send_request<S>(
        &self,
        mut stream: S,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<RawResponse, HttpError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let head = wire::encode_head(
            method,
            url,
            headers,
            &self.config.user_agent,
            body.map(Bytes::len),
        )?;
        stream.write_all(&head).await?;
        if let Some(b) = body {
            stream.write_all(b).await?;
        }
        stream.flush().await?;

        let mut reader = BufReader::new(stream);

        let mut status_line = String::new();
        reader.read_line(&mut status_line).await?;
        let (version, status) = wire::parse_status_line(&status_line)?;
        let headers = wire::read_headers(&mut reader).await?;

        let body = if wire::has_body(method, status) {
            wire::read_body(&mut reader, &headers, self.config.max_body_size).await?
        } else {
            Bytes::new()
        };

        trace!(status = %status, body_len = body.len(), "Response received");

        Ok(RawResponse {
            status,
            version,
            headers,
            body,
        })
    }
}

/// Response of a single exchange, before redirect handling.
struct RawResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

/// Builder over [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.user_agent = user_agent.to_string();
        self
    }

    /// Limit for a whole request, redirects included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn redirect(mut self, follow: bool, max: usize) -> Self {
        self.config.follow_redirects = follow;
        self.config.max_redirects = max;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    pub fn build(self) -> Result<Client, HttpError> {
        Client::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve each canned reply to one connection, in order.
    async fn serve(replies: Vec<&'static str>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[test]
    fn test_client_builder() {
        let client = Client::builder()
            .user_agent("TestAgent/1.0")
            .timeout(Duration::from_secs(10))
            .redirect(true, 5)
            .build()
            .unwrap();

        assert_eq!(client.config().user_agent, "TestAgent/1.0");
        assert_eq!(client.config().timeout, Duration::from_secs(10));
        assert_eq!(client.config().max_redirects, 5);
    }

    #[tokio::test]
    async fn test_get_plain_http() {
        let base = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 4\r\n\r\nbody",
        ])
        .await;

        let client = Client::new().unwrap();
        let response = client.get(base.join("main.css").unwrap().as_str()).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["content-type"], "text/css");
        assert_eq!(response.body, "body");
    }

    #[tokio::test]
    async fn test_follows_redirect() {
        let base = serve(vec![
            "HTTP/1.1 302 Found\r\nLocation: /index.html\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        ])
        .await;

        let client = Client::new().unwrap();
        let response = client.get(base.as_str()).await.unwrap();

        assert_eq!(response.body, "ok");
        assert_eq!(response.url.path(), "/index.html");
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let base = serve(vec![
            "HTTP/1.1 301 Moved\r\nLocation: /a\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 301 Moved\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n",
        ])
        .await;

        let client = Client::builder().redirect(true, 1).build().unwrap();
        assert!(matches!(
            client.get(base.as_str()).await,
            Err(HttpError::TooManyRedirects)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let client = Client::new().unwrap();
        assert!(matches!(
            client.get("ftp://example.com/file").await,
            Err(HttpError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new().unwrap();
        assert!(matches!(
            client.get(&format!("http://{addr}/")).await,
            Err(HttpError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        assert!(matches!(
            client.get(&format!("http://{addr}/")).await,
            Err(HttpError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_rejects_body_over_limit() {
        let base = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 99999999999999\r\n\r\ntiny",
            "HTTP/1.1 200 OK\r\n\r\n0123456789",
        ])
        .await;

        let client = Client::builder().max_body_size(8).build().unwrap();
        assert!(matches!(
            client.get(base.as_str()).await,
            Err(HttpError::InvalidResponse(_))
        ));
        assert!(matches!(
            client.get(base.as_str()).await,
            Err(HttpError::InvalidResponse(_))
        ));
    }
}
