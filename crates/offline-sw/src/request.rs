//! Intercepted requests, stored responses, and cache keys.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::fmt;
use url::Url;

/// Identity of a request inside a named cache.
///
/// Method plus absolute URL with the fragment removed. Headers do not take
/// part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.clone(),
            url: url.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A request intercepted by the worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// Is navigation request.
    pub is_navigation: bool,
}

impl FetchRequest {
    /// A plain `GET` for `url`.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            is_navigation: false,
        }
    }

    /// A top-level navigation to `url`.
    pub fn navigate(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url)
        }
    }

    /// Override the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Cache identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// A response, either fresh from the network or replayed from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// Status code.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Check if response is success (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Copy of this response marked as replayed from the cache.
    pub(crate) fn replayed(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }
}

fn append_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.append(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_fragment() {
        let a = Url::parse("https://example.com/index.html#top").unwrap();
        let b = Url::parse("https://example.com/index.html").unwrap();
        assert_eq!(RequestKey::new(&Method::GET, &a), RequestKey::new(&Method::GET, &b));
    }

    #[test]
    fn test_key_distinguishes_method_and_query() {
        let url = Url::parse("https://example.com/main.js").unwrap();
        let query = Url::parse("https://example.com/main.js?v=2").unwrap();

        assert_ne!(RequestKey::new(&Method::GET, &url), RequestKey::new(&Method::HEAD, &url));
        assert_ne!(RequestKey::new(&Method::GET, &url), RequestKey::new(&Method::GET, &query));
        assert_eq!(
            RequestKey::new(&Method::GET, &url).to_string(),
            "GET https://example.com/main.js"
        );
    }

    #[test]
    fn test_navigation_request() {
        let request = FetchRequest::navigate(Url::parse("https://example.com/").unwrap())
            .with_header("accept", "text/html");
        assert!(request.is_navigation);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.headers.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_response_helpers() {
        let response = FetchResponse::new(StatusCode::NOT_FOUND, "missing")
            .with_header("content-type", "text/plain");
        assert!(!response.is_success());
        assert_eq!(response.status_text(), "Not Found");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert!(response.replayed().from_cache);
    }

    #[test]
    fn test_with_header_skips_invalid_name_or_value() {
        let url = Url::parse("https://example.com/").unwrap();
        let request = FetchRequest::get(url)
            .with_header("bad header", "x")
            .with_header("x-ok", "bad\nvalue")
            .with_header("x-ok", "1");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers["x-ok"], "1");

        let response = FetchResponse::ok("")
            .with_header("", "x")
            .with_header("content-type", "text/css");
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("content-type"), Some("text/css"));
    }
}
