//! Ordered-endpoint failover.
//!
//! Every adapter is configured with an ordered list of backend base URLs.
//! A logical call is attempted against each endpoint in turn; network
//! errors, non-2xx statuses, and malformed payloads all rotate to the next
//! endpoint. Only when the list is exhausted does the call surface
//! [`ChainError::Unavailable`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::ChainError;

/// Failure of a single endpoint attempt. Never surfaced to callers
/// directly; it only drives rotation.
#[derive(Debug, Error)]
pub(crate) enum EndpointError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Run one logical call against each endpoint in order until one succeeds.
pub(crate) async fn with_failover<T, F, Fut>(
    chain: &str,
    endpoints: &[String],
    mut call: F,
) -> Result<T, ChainError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, EndpointError>>,
{
    for base in endpoints {
        match call(base.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(chain, endpoint = %base, error = %e, "endpoint failed, rotating");
            }
        }
    }
    Err(ChainError::Unavailable {
        chain: chain.to_string(),
        tried: endpoints.len(),
    })
}

/// Build the HTTP client shared by an adapter instance.
pub(crate) fn http_client() -> Result<reqwest::Client, ChainError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ChainError::Client(e.to_string()))
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, EndpointError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| EndpointError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(EndpointError::Status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| EndpointError::Payload(e.to_string()))
}

/// GET returning plain text (esplora's tip-height endpoint).
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
) -> Result<String, EndpointError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| EndpointError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(EndpointError::Status(status.as_u16()));
    }
    response
        .text()
        .await
        .map_err(|e| EndpointError::Payload(e.to_string()))
}

pub(crate) async fn post_json<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<T, EndpointError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| EndpointError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(EndpointError::Status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| EndpointError::Payload(e.to_string()))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_success_wins() {
        let endpoints = vec!["a".to_string(), "b".to_string()];
        let result = with_failover("BTC", &endpoints, |base| async move {
            Ok::<_, EndpointError>(base)
        })
        .await
        .unwrap();
        assert_eq!(result, "a");
    }

    #[tokio::test]
    async fn rotates_past_failures() {
        let endpoints = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = with_failover("BTC", &endpoints, |base| async move {
            if base == "c" {
                Ok(base)
            } else {
                Err(EndpointError::Status(502))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "c");
    }

    #[tokio::test]
    async fn exhausted_list_is_unavailable() {
        let endpoints = vec!["a".to_string(), "b".to_string()];
        let err = with_failover("SOL", &endpoints, |_| async {
            Err::<(), _>(EndpointError::Transport("refused".to_string()))
        })
        .await
        .unwrap_err();
        match err {
            ChainError::Unavailable { chain, tried } => {
                assert_eq!(chain, "SOL");
                assert_eq!(tried, 2);
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://x/api/", "/tx/abc"), "http://x/api/tx/abc");
        assert_eq!(join_url("http://x/api", "tx/abc"), "http://x/api/tx/abc");
    }
}
