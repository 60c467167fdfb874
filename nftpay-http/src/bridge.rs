//! A [`WalletTransport`] that forwards requests to a remote wallet bridge.
//!
//! The bridge speaks JSON-RPC 2.0 over HTTP POST and relays each request to a
//! wallet the user controls elsewhere (a browser extension, a mobile wallet).
//! Only the modern `request` dialect is offered; the bridge pushes no events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use nftpay::provider::{ProviderError, WalletTransport};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Errors raised while reaching the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The request did not complete before the configured timeout.
    #[error("bridge request timed out: {method}")]
    Timeout {
        /// RPC method being relayed.
        method: String,
    },
    /// HTTP transport error.
    #[error("bridge request failed: {method}: {source}")]
    Http {
        /// RPC method being relayed.
        method: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("bridge answered {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The response was not a JSON-RPC 2.0 response.
    #[error("malformed bridge response: {0}")]
    Malformed(String),
}

impl From<BridgeError> for ProviderError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout { .. } => Self::Timeout,
            BridgeError::Malformed(reason) => Self::Decode(reason),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// A wallet reached through a JSON-RPC bridge.
#[derive(Debug)]
pub struct BridgeTransport {
    endpoint: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl BridgeTransport {
    /// Creates a transport posting to `endpoint`.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the bridge endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    ///
    /// Bridged requests wait for the user, so the timeout should cover a
    /// signing prompt.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let payload = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let mut req = self.client.post(self.endpoint.clone()).json(&payload);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| transport_error(method, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::HttpStatus { status, body }.into());
        }
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Malformed(format!("{method}: {e}")))?;

        match body {
            RpcResponse {
                error: Some(error), ..
            } => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(method, code = error.code, "bridge returned error");
                Err(ProviderError::Rpc {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                })
            }
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            // A missing result is how JSON-RPC encodes `null`.
            RpcResponse { .. } => Ok(Value::Null),
        }
    }
}

fn transport_error(method: &str, source: reqwest::Error) -> BridgeError {
    if source.is_timeout() {
        BridgeError::Timeout {
            method: method.to_owned(),
        }
    } else {
        BridgeError::Http {
            method: method.to_owned(),
            source,
        }
    }
}

#[async_trait]
impl WalletTransport for BridgeTransport {
    fn supports_request(&self) -> bool {
        true
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.call(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nftpay::provider::{Capability, ErrorClass, ProviderHandle, VendorTag, codes};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn bridge(server: &MockServer) -> BridgeTransport {
        let url = Url::parse(&format!("{}/rpc", server.uri())).unwrap();
        BridgeTransport::new(url)
    }

    #[test]
    fn test_bridge_speaks_modern_dialect_only() {
        let transport: Arc<dyn WalletTransport> =
            Arc::new(BridgeTransport::new(Url::parse("http://127.0.0.1:1/").unwrap()));
        let handle = ProviderHandle::new(VendorTag::Generic, transport);
        assert!(handle.capabilities().contains(Capability::RequestRpc));
        assert!(!handle.capabilities().contains(Capability::LegacyEnable));
        assert!(!handle.capabilities().contains(Capability::EventSubscription));
    }

    #[tokio::test]
    async fn test_result_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({
                "jsonrpc": "2.0",
                "method": "eth_chainId",
                "params": [],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x89" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = bridge(&server)
            .request("eth_chainId", json!([]))
            .await
            .unwrap();
        assert_eq!(result, json!("0x89"));
    }

    #[tokio::test]
    async fn test_rpc_error_keeps_code_and_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {
                    "code": codes::INTERNAL_ERROR,
                    "message": "Internal JSON-RPC error.",
                    "data": { "originalError": { "code": codes::USER_REJECTED } },
                },
            })))
            .mount(&server)
            .await;

        let err = bridge(&server)
            .request("eth_sendTransaction", json!([{}]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::INTERNAL_ERROR));
        assert_eq!(err.classify(), ErrorClass::UserRejected);
    }

    #[tokio::test]
    async fn test_null_result_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": null })),
            )
            .mount(&server)
            .await;

        let result = bridge(&server)
            .request("eth_getTransactionReceipt", json!(["0x00"]))
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_http_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = bridge(&server)
            .request("eth_chainId", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(reason) if reason.contains("502")));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = bridge(&server)
            .with_timeout(Duration::from_millis(50))
            .request("eth_chainId", json!([]))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Timeout);
        assert_eq!(err.classify(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = bridge(&server)
            .request("eth_chainId", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
