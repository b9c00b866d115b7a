//! HTTP/1.1 message framing.

use crate::HttpError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

/// Headers the client always sets itself.
const RESERVED: [&str; 3] = ["host", "connection", "content-length"];

/// Serialize the request line and headers.
pub(crate) fn encode_head(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    user_agent: &str,
    body_len: Option<usize>,
) -> Result<Vec<u8>, HttpError> {
    let host = url
        .host_str()
        .ok_or_else(|| HttpError::InvalidUrl("Missing host".to_string()))?;

    let mut target = url.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = Vec::new();
    write!(head, "{method} {target} HTTP/1.1\r\n")?;
    match url.port() {
        Some(port) => write!(head, "Host: {host}:{port}\r\n")?,
        None => write!(head, "Host: {host}\r\n")?,
    }
    if !headers.contains_key(http::header::USER_AGENT) {
        write!(head, "User-Agent: {user_agent}\r\n")?;
    }
    if !headers.contains_key(http::header::ACCEPT) {
        write!(head, "Accept: */*\r\n")?;
    }
    if !url.username().is_empty() && !headers.contains_key(http::header::AUTHORIZATION) {
        let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
        write!(head, "Authorization: Basic {}\r\n", STANDARD.encode(credentials))?;
    }
    write!(head, "Connection: close\r\n")?;

    for (name, value) in headers {
        if RESERVED.iter().any(|r| *r == name.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            write!(head, "{name}: {v}\r\n")?;
        }
    }

    if let Some(len) = body_len {
        write!(head, "Content-Length: {len}\r\n")?;
    }
    write!(head, "\r\n")?;
    Ok(head)
}

/// Parse `HTTP/1.1 200 OK`.
pub(crate) fn parse_status_line(line: &str) -> Result<(Version, StatusCode), HttpError> {
    let mut parts = line.split_whitespace();
    let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
        return Err(HttpError::InvalidResponse(format!(
            "Invalid status line: {:?}",
            line.trim_end()
        )));
    };

    let version = match version {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        other => {
            return Err(HttpError::InvalidResponse(format!(
                "Unsupported version: {other}"
            )))
        }
    };

    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| HttpError::InvalidResponse(format!("Invalid status code: {code}")))?;

    Ok((version, status))
}

/// Read header lines up to the blank line. Repeated headers are kept.
pub(crate) async fn read_headers<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(HttpError::InvalidResponse(
                "Connection closed inside headers".to_string(),
            ));
        }
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(headers);
        }

        if let Some((name, value)) = line.split_once(':') {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.trim()),
                HeaderValue::try_from(value.trim()),
            ) {
                headers.append(n, v);
            }
        }
    }
}

/// Whether a response to `method` with `status` carries a body at all.
pub(crate) fn has_body(method: &Method, status: StatusCode) -> bool {
    !(*method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Read the response body according to its framing headers.
///
/// Bodies larger than `limit` bytes are rejected. The buffer grows with the
/// bytes actually received, never with the size the server announced.
pub(crate) async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &HeaderMap,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let chunked = headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return read_chunked_body(reader, limit).await;
    }

    if let Some(value) = headers.get(http::header::CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| HttpError::InvalidResponse("Invalid content-length".to_string()))?;
        if len > limit as u64 {
            return Err(too_large(limit));
        }

        let mut buf = Vec::new();
        let read = (&mut *reader).take(len).read_to_end(&mut buf).await?;
        if (read as u64) < len {
            return Err(HttpError::InvalidResponse(format!(
                "Body truncated: {read} of {len} bytes"
            )));
        }
        return Ok(Bytes::from(buf));
    }

    let mut buf = Vec::new();
    (&mut *reader)
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .await?;
    if buf.len() > limit {
        return Err(too_large(limit));
    }
    Ok(Bytes::from(buf))
}

async fn read_chunked_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = Vec::new();

    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;

        // Chunk extensions (";name=value") are ignored.
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| {
            HttpError::InvalidResponse(format!("Invalid chunk size: {size_field:?}"))
        })?;

        if size == 0 {
            // Skip trailers.
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer).await? == 0 || trailer.trim().is_empty() {
                    break;
                }
            }
            return Ok(Bytes::from(body));
        }

        if body.len().checked_add(size).map_or(true, |end| end > limit) {
            return Err(too_large(limit));
        }
        let read = (&mut *reader)
            .take(size as u64)
            .read_to_end(&mut body)
            .await?;
        if read < size {
            return Err(HttpError::InvalidResponse("Chunk truncated".to_string()));
        }

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(HttpError::InvalidResponse(
                "Missing CRLF after chunk".to_string(),
            ));
        }
    }
}

fn too_large(limit: usize) -> HttpError {
    HttpError::InvalidResponse(format!("Body exceeds {limit} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    fn head(url: &str, headers: HeaderMap, body: Option<usize>) -> String {
        let url = Url::parse(url).unwrap();
        let bytes = encode_head(&Method::GET, &url, &headers, "OfflineSW/1.0", body).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_encode_head_defaults() {
        let text = head("http://example.com", HeaderMap::new(), None);
        assert!(text.starts_with("GET / HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(text.contains("User-Agent: OfflineSW/1.0\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn test_encode_head_port_query_and_body() {
        let text = head("http://127.0.0.1:8080/main.js?v=2#frag", HeaderMap::new(), Some(3));
        assert!(text.starts_with("GET /main.js?v=2 HTTP/1.1\r\nHost: 127.0.0.1:8080\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
    }

    #[test]
    fn test_encode_head_custom_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Custom/2"));
        headers.insert("host", HeaderValue::from_static("spoofed"));
        headers.insert("accept", HeaderValue::from_static("text/html"));

        let text = head("https://example.com/", headers, None);
        assert!(text.contains("user-agent: Custom/2\r\n"));
        assert!(!text.contains("OfflineSW"));
        assert!(!text.contains("spoofed"));
        assert!(text.contains("accept: text/html\r\n"));
        assert!(!text.contains("Accept: */*"));
    }

    #[test]
    fn test_encode_head_basic_auth() {
        let text = head("https://user:pw@example.com/", HeaderMap::new(), None);
        assert!(text.contains("Authorization: Basic dXNlcjpwdw==\r\n"));
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status) = parse_status_line("HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(version, Version::HTTP_11);
        assert_eq!(status, StatusCode::OK);

        let (version, status) = parse_status_line("HTTP/1.0 404 Not Found").unwrap();
        assert_eq!(version, Version::HTTP_10);
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert!(parse_status_line("").is_err());
        assert!(parse_status_line("HTTP/1.1 abc").is_err());
        assert!(parse_status_line("SPDY/3 200 OK").is_err());
    }

    #[test]
    fn test_has_body() {
        assert!(has_body(&Method::GET, StatusCode::OK));
        assert!(!has_body(&Method::HEAD, StatusCode::OK));
        assert!(!has_body(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!has_body(&Method::GET, StatusCode::NOT_MODIFIED));
    }

    #[tokio::test]
    async fn test_read_headers_keeps_repeats() {
        let mut input: &[u8] =
            b"Set-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Type: text/css\r\n\r\nrest";
        let headers = read_headers(&mut input).await.unwrap();

        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(headers.get("content-type").unwrap(), "text/css");
        assert_eq!(input, b"rest");
    }

    #[tokio::test]
    async fn test_read_headers_truncated() {
        let mut input: &[u8] = b"Content-Type: text/css\r\n";
        assert!(read_headers(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_read_body_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("5"));
        let mut input: &[u8] = b"helloEXTRA";

        let body = read_body(&mut input, &headers, LIMIT).await.unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_read_body_until_eof() {
        let mut input: &[u8] = b"body { margin: 0 }";
        let body = read_body(&mut input, &HeaderMap::new(), LIMIT).await.unwrap();
        assert_eq!(body, "body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_read_chunked_body() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let mut input: &[u8] = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nExpires: never\r\n\r\n";

        let body = read_body(&mut input, &headers, LIMIT).await.unwrap();
        assert_eq!(body, "Wikipedia");
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_read_chunked_body_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let mut input: &[u8] = b"zz\r\n";

        assert!(read_body(&mut input, &headers, LIMIT).await.is_err());
    }

    #[tokio::test]
    async fn test_read_body_rejects_oversized_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("99999999999999"));
        let mut input: &[u8] = b"tiny";

        assert!(matches!(
            read_body(&mut input, &headers, LIMIT).await,
            Err(HttpError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_read_body_rejects_short_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("10"));
        let mut input: &[u8] = b"tiny";

        assert!(matches!(
            read_body(&mut input, &headers, LIMIT).await,
            Err(HttpError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_read_body_until_eof_respects_limit() {
        let mut input: &[u8] = &[b'x'; LIMIT + 1];
        assert!(read_body(&mut input, &HeaderMap::new(), LIMIT).await.is_err());

        let mut input: &[u8] = &[b'x'; LIMIT];
        let body = read_body(&mut input, &HeaderMap::new(), LIMIT).await.unwrap();
        assert_eq!(body.len(), LIMIT);
    }

    #[tokio::test]
    async fn test_read_chunked_body_rejects_huge_chunk() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let mut input: &[u8] = b"1\r\nA\r\nffffffffffffffff\r\nB\r\n0\r\n\r\n";

        assert!(matches!(
            read_body(&mut input, &headers, LIMIT).await,
            Err(HttpError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_read_chunked_body_rejects_truncated_chunk() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let mut input: &[u8] = b"10\r\nshort";

        assert!(read_body(&mut input, &headers, LIMIT).await.is_err());
    }
}
