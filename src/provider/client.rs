use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::ProviderCredentials;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: String,
    },
    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
}

/// Status-polling seam between the reconciliation runner and the provider's
/// HTTP API. The runner only ever talks to this trait.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn fetch_transaction_status(
        &self,
        provider_transaction_id: &str,
        credentials: &ProviderCredentials,
    ) -> Result<Value, ProviderError>;
}

/// HTTP client for the provider's transaction-status endpoint.
///
/// Expected 4xx/5xx responses come back as `ProviderError::Api` values, not
/// panics, so the runner can branch on them. The client never retries; retry
/// policy belongs to the caller.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl ProviderClient {
    /// Creates a new client with the given base URL and request timeout.
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, timeout, 3, 60)
    }

    /// Creates a new client with custom circuit breaker configuration.
    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ProviderClient {
            client,
            base_url,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker.
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }
}

#[async_trait]
impl ProviderGateway for ProviderClient {
    async fn fetch_transaction_status(
        &self,
        provider_transaction_id: &str,
        credentials: &ProviderCredentials,
    ) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/transaction/status/{}",
            self.base_url.trim_end_matches('/'),
            provider_transaction_id
        );
        let client = self.client.clone();
        let api_key = credentials.api_key.clone();
        let app_id = credentials.app_id.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .get(&url)
                    .header("X-API-KEY", api_key)
                    .header("X-APP-ID", app_id)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await?;

                let status = response.status();
                let body = response.text().await?;

                if !status.is_success() {
                    return Err(ProviderError::Api {
                        status: status.as_u16(),
                        message: extract_error_message(&body),
                        body,
                    });
                }

                serde_json::from_str::<Value>(&body)
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitOpen(
                "provider API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

/// Error bodies come in two shapes: `{"error":{"message":...}}` and
/// `{"message":...}`. Anything else falls back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| v.get("message").and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> ProviderCredentials {
        ProviderCredentials {
            api_key: "key-123".to_string(),
            app_id: "app-456".to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = ProviderClient::new(
            "https://api.provider.example".to_string(),
            Duration::from_secs(30),
        );
        assert_eq!(client.base_url, "https://api.provider.example");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad token"}}"#),
            "bad token"
        );
        assert_eq!(
            extract_error_message(r#"{"message":"not found"}"#),
            "not found"
        );
        assert_eq!(extract_error_message("plain text failure"), "plain text failure");
        assert_eq!(extract_error_message(r#"{"code":42}"#), r#"{"code":42}"#);
    }

    #[tokio::test]
    async fn test_fetch_status_success() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/transaction/status/tx-100")
            .match_header("X-API-KEY", "key-123")
            .match_header("X-APP-ID", "app-456")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transaction":{"status":"settled","id":"tx-100"}}"#)
            .create_async().await;

        let client = ProviderClient::new(server.url(), Duration::from_secs(5));
        let body = client
            .fetch_transaction_status("tx-100", &test_credentials())
            .await
            .unwrap();

        assert_eq!(body["transaction"]["status"], "settled");
    }

    #[tokio::test]
    async fn test_fetch_status_api_error_with_nested_message() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/transaction/status/tx-404")
            .with_status(404)
            .with_body(r#"{"error":{"message":"transaction not found"}}"#)
            .create_async().await;

        let client = ProviderClient::new(server.url(), Duration::from_secs(5));
        let result = client
            .fetch_transaction_status("tx-404", &test_credentials())
            .await;

        match result {
            Err(ProviderError::Api { status, message, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "transaction not found");
            }
            other => panic!("expected Api error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fetch_status_invalid_json() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/transaction/status/tx-1")
            .with_status(200)
            .with_body("<html>gateway timeout</html>")
            .create_async().await;

        let client = ProviderClient::new(server.url(), Duration::from_secs(5));
        let result = client
            .fetch_transaction_status("tx-1", &test_credentials())
            .await;

        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"/transaction/status/.*".into()))
            .with_status(500)
            .with_body(r#"{"message":"internal"}"#)
            .expect_at_least(3)
            .create_async().await;

        let client =
            ProviderClient::with_circuit_breaker(server.url(), Duration::from_secs(5), 3, 60);

        for _ in 0..3 {
            let _ = client
                .fetch_transaction_status("tx-1", &test_credentials())
                .await;
        }

        let result = client
            .fetch_transaction_status("tx-1", &test_credentials())
            .await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen(_))));
        assert_eq!(client.circuit_state(), "open");
    }
}
