//! HTTP byte fetcher built on `reqwest`.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tracing::{debug, trace, warn};

use crate::pipeline::{ByteFetcher, FetchError, FetchResponse};

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("glimpse/", env!("CARGO_PKG_VERSION"));

/// Async HTTP fetcher.
///
/// Only the connect phase has a client-level timeout; the pipeline bounds
/// the wait for headers and for each body chunk itself, so slow but steady
/// downloads are not cut off.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a pooled client.
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ByteFetcher for HttpFetcher {
    fn fetch(&self, uri: &str) -> BoxFuture<'static, Result<FetchResponse, FetchError>> {
        let request = self.client.get(uri);
        let uri = uri.to_string();

        Box::pin(async move {
            trace!(uri = %uri, "HTTP GET request starting");

            let response = request.send().await.map_err(|e| {
                warn!(
                    uri = %uri,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                map_reqwest_error(e)
            })?;

            let status = response.status();
            debug!(uri = %uri, status = status.as_u16(), "HTTP response received");

            if let Some(error) = status_error(status, &uri) {
                return Err(error);
            }

            let content_length = response.content_length();
            let body = response
                .bytes_stream()
                .map_err(map_reqwest_error)
                .boxed();

            Ok(FetchResponse::new(content_length, body))
        })
    }
}

/// Map a non-success status to a fetch error.
///
/// 408 and 504 are timeouts and so are retried.
fn status_error(status: StatusCode, uri: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("{} from {}", status, uri);
    Some(match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchError::timeout(message),
        _ => FetchError::status(status.as_u16(), message),
    })
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(e.to_string())
    } else if e.is_connect() || e.is_body() || e.is_request() {
        FetchError::io(e.to_string())
    } else {
        FetchError::other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FetchErrorKind;

    #[test]
    fn test_success_is_not_an_error() {
        assert!(status_error(StatusCode::OK, "http://x").is_none());
        assert!(status_error(StatusCode::NO_CONTENT, "http://x").is_none());
    }

    #[test]
    fn test_timeout_statuses_are_retryable() {
        let e = status_error(StatusCode::REQUEST_TIMEOUT, "http://x").unwrap();
        assert_eq!(e.kind, FetchErrorKind::Timeout);
        assert!(e.is_retryable());

        let e = status_error(StatusCode::GATEWAY_TIMEOUT, "http://x").unwrap();
        assert!(e.is_retryable());
    }

    #[test]
    fn test_other_statuses_keep_code() {
        let e = status_error(StatusCode::NOT_FOUND, "http://x/a.png").unwrap();
        assert_eq!(e.kind, FetchErrorKind::Status(404));
        assert!(e.message.contains("http://x/a.png"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(5)).is_ok());
    }
}
