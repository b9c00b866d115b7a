//! Live network backend for the worker.

use crate::{Client, HttpError};
use async_trait::async_trait;
use offline_sw::{FetchRequest, FetchResponse, Network, NetworkError};
use tracing::debug;

impl From<HttpError> for NetworkError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout => NetworkError::Timeout,
            HttpError::ConnectionFailed(msg) => NetworkError::ConnectionFailed(msg),
            HttpError::IoError(io) => NetworkError::ConnectionFailed(io.to_string()),
            HttpError::InvalidUrl(msg) | HttpError::UnsupportedScheme(msg) => {
                NetworkError::InvalidRequest(msg)
            }
            other @ (HttpError::TlsError(_)
            | HttpError::InvalidResponse(_)
            | HttpError::TooManyRedirects) => NetworkError::Protocol(other.to_string()),
        }
    }
}

/// [`Network`] backed by the HTTP client.
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self, HttpError> {
        Ok(Self::with_client(Client::new()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError> {
        let response = self
            .client
            .request(
                request.method.clone(),
                request.url.clone(),
                request.headers.clone(),
                None,
            )
            .await
            .map_err(|e| {
                debug!(url = %request.url, error = %e, "Network fetch failed");
                NetworkError::from(e)
            })?;

        Ok(FetchResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
            from_cache: false,
        })
    }
}
