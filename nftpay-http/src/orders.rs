//! An [`OrderLifecycle`] implementation backed by the marketplace's order API.
//!
//! [`OrderServiceClient`] talks to three JSON endpoints relative to a base URL:
//!
//! - `POST {base}/orders` - create an order, answering `{"id": "..."}`
//! - `POST {base}/orders/{id}/payments` - record a payment, answering `{"applied": bool}`
//! - `POST {base}/orders/{id}/cancel` - cancel an order, answering `{"applied": bool}`
//!
//! ## Error Handling
//!
//! Failures keep their context (which endpoint, which stage) in
//! [`OrderServiceError`]. When used through [`OrderLifecycle`], they are mapped
//! onto [`OrderError`]: a `validation_error` body becomes
//! [`OrderError::Validation`], 404 becomes [`OrderError::NotFound`], 409
//! becomes [`OrderError::Conflict`], anything else
//! [`OrderError::Unavailable`].

use std::fmt::Display;
use std::time::Duration;

use alloy_primitives::TxHash;
use async_trait::async_trait;
use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, StatusCode};
use nftpay::order::{
    Ack, CreateOrderRequest, OrderError, OrderId, OrderLifecycle, OutcomeStatus,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

/// Errors that can occur while talking to the order API.
#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Request being made.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The base URL cannot carry path segments.
    #[error("base URL cannot be a base: {0}")]
    CannotBeABase(Url),
    /// A header value was rejected.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Request being made.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Request being made.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Request being made.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Request being made.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// Error body the order API answers with on rejected requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    field: Option<String>,
}

impl OrderServiceError {
    /// Maps the error onto the [`OrderLifecycle`] taxonomy.
    #[must_use]
    pub fn into_order_error(self, order: Option<&OrderId>) -> OrderError {
        if let Self::HttpStatus { status, body, .. } = &self {
            if status.is_client_error() {
                if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
                    if parsed.error == "validation_error" {
                        return OrderError::Validation {
                            field: parsed.field.unwrap_or_else(|| "unknown".to_owned()),
                        };
                    }
                }
            }
            match (*status, order) {
                (StatusCode::NOT_FOUND, Some(order)) => {
                    return OrderError::NotFound(order.clone());
                }
                (StatusCode::CONFLICT, _) => return OrderError::Conflict(body.clone()),
                _ => {}
            }
        }
        OrderError::Unavailable(self.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: OrderId,
}

#[derive(Debug, Serialize)]
struct RecordPaymentBody {
    tx_hash: TxHash,
    status: OutcomeStatus,
}

#[derive(Debug, Serialize)]
struct CancelOrderBody<'a> {
    reason: &'a str,
}

/// A client for the marketplace's order API.
#[derive(Clone, Debug)]
pub struct OrderServiceClient {
    /// Base URL of the API (e.g. `https://api.market.example/v1/`)
    base_url: Url,
    /// Full URL to `POST /orders`
    orders_url: Url,
    /// HTTP client.
    client: Client,
    /// Custom headers sent with each request
    headers: HeaderMap,
    /// Per-request timeout.
    timeout: Option<Duration>,
}

impl OrderServiceClient {
    /// Constructs a client from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, OrderServiceError> {
        let orders_url = base_url
            .join("./orders")
            .map_err(|e| OrderServiceError::UrlParse {
                context: "Failed to construct ./orders URL",
                source: e,
            })?;
        if orders_url.cannot_be_a_base() {
            return Err(OrderServiceError::CannotBeABase(base_url));
        }
        Ok(Self {
            base_url,
            orders_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./orders` URL.
    #[must_use]
    pub const fn orders_url(&self) -> &Url {
        &self.orders_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Authenticates all future requests with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::InvalidHeader`] if the token is not a valid header value.
    pub fn with_bearer_token(mut self, token: &str) -> Result<Self, OrderServiceError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends `POST /orders`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError`] if the request fails.
    pub async fn create(&self, request: &CreateOrderRequest) -> Result<OrderId, OrderServiceError> {
        let response: CreateOrderResponse = self
            .post_json(&self.orders_url, "POST /orders", request)
            .await?;
        Ok(response.id)
    }

    /// Sends `POST /orders/{id}/payments`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError`] if the request fails.
    pub async fn record(
        &self,
        order: &OrderId,
        tx_hash: TxHash,
        status: OutcomeStatus,
    ) -> Result<Ack, OrderServiceError> {
        let url = self.order_url(order, "payments")?;
        self.post_json(
            &url,
            "POST /orders/{id}/payments",
            &RecordPaymentBody { tx_hash, status },
        )
        .await
    }

    /// Sends `POST /orders/{id}/cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError`] if the request fails.
    pub async fn cancel(&self, order: &OrderId, reason: &str) -> Result<Ack, OrderServiceError> {
        let url = self.order_url(order, "cancel")?;
        self.post_json(&url, "POST /orders/{id}/cancel", &CancelOrderBody { reason })
            .await
    }

    /// Builds `{orders_url}/{id}/{action}` with the id as a single escaped path segment.
    fn order_url(&self, order: &OrderId, action: &str) -> Result<Url, OrderServiceError> {
        let mut url = self.orders_url.clone();
        url.path_segments_mut()
            .map_err(|()| OrderServiceError::CannotBeABase(self.base_url.clone()))?
            .pop_if_empty()
            .push(order.as_str())
            .push(action);
        Ok(url)
    }

    /// Posts `payload` as JSON and decodes a 2xx response body.
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, OrderServiceError>
    where
        T: Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| OrderServiceError::Http { context, source: e })?;

        let result = if http_response.status().is_success() {
            http_response
                .json::<R>()
                .await
                .map_err(|e| OrderServiceError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| OrderServiceError::ResponseBodyRead { context, source: e })?;
            Err(OrderServiceError::HttpStatus {
                context,
                status,
                body,
            })
        };

        log_result(context, &result);

        result
    }
}

#[async_trait]
impl OrderLifecycle for OrderServiceClient {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, OrderError> {
        request.validate()?;
        self.create(request)
            .await
            .map_err(|e| e.into_order_error(None))
    }

    async fn record_payment(
        &self,
        order: &OrderId,
        tx_hash: TxHash,
        status: OutcomeStatus,
    ) -> Result<Ack, OrderError> {
        self.record(order, tx_hash, status)
            .await
            .map_err(|e| e.into_order_error(Some(order)))
    }

    async fn cancel_order(&self, order: &OrderId, reason: &str) -> Result<Ack, OrderError> {
        self.cancel(order, reason)
            .await
            .map_err(|e| e.into_order_error(Some(order)))
    }
}

/// Converts a string URL into an [`OrderServiceClient`], normalising the trailing slash.
impl TryFrom<&str> for OrderServiceClient {
    type Error = OrderServiceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| OrderServiceError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

#[cfg(feature = "telemetry")]
fn log_result<R, E: Display>(context: &'static str, result: &Result<R, E>) {
    match result {
        Ok(_) => tracing::debug!(context, "order API request succeeded"),
        Err(err) => tracing::error!(context, error = %err, "order API request failed"),
    }
}

#[cfg(not(feature = "telemetry"))]
const fn log_result<R, E: Display>(_context: &'static str, _result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use nftpay::order::OrderKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            payer: "0x00000000000000000000000000000000000000aa".into(),
            payee: "0x00000000000000000000000000000000000000cc".into(),
            amount: "0.5".into(),
            currency: "ETH".into(),
            network: "ethereum".into(),
            item_reference: "token-42".into(),
            kind: OrderKind::Purchase,
        }
    }

    async fn client(server: &MockServer) -> OrderServiceClient {
        OrderServiceClient::try_from(server.uri().as_str()).unwrap()
    }

    #[test]
    fn test_urls_are_relative_to_base_path() {
        let client = OrderServiceClient::try_from("https://api.market.example/v1").unwrap();
        assert_eq!(
            client.orders_url().as_str(),
            "https://api.market.example/v1/orders"
        );
        let url = client
            .order_url(&OrderId::from("ord 1/x"), "payments")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.market.example/v1/orders/ord%201%2Fx/payments"
        );
    }

    #[tokio::test]
    async fn test_create_order_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "item_reference": "token-42",
                "amount": "0.5",
                "kind": "purchase",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "ord_1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await.with_bearer_token("secret").unwrap();
        let id = client.create_order(&request()).await.unwrap();
        assert_eq!(id, OrderId::from("ord_1"));
    }

    #[tokio::test]
    async fn test_create_order_validates_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "ord_1" })))
            .expect(0)
            .mount(&server)
            .await;

        let mut missing = request();
        missing.payee = String::new();
        let err = client(&server)
            .await
            .create_order(&missing)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OrderError::Validation {
                field: "payee".into()
            }
        );
    }

    #[tokio::test]
    async fn test_backend_validation_error_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": "validation_error",
                "field": "network",
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create_order(&request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OrderError::Validation {
                field: "network".into()
            }
        );
    }

    #[tokio::test]
    async fn test_record_payment_posts_hash_and_status() {
        let server = MockServer::start().await;
        let hash = B256::repeat_byte(0xde);
        Mock::given(method("POST"))
            .and(path("/orders/ord_1/payments"))
            .and(body_json(json!({
                "tx_hash": hash,
                "status": "completed",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "applied": true })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server)
            .await
            .record_payment(&OrderId::from("ord_1"), hash, OutcomeStatus::Completed)
            .await
            .unwrap();
        assert!(ack.applied);
    }

    #[tokio::test]
    async fn test_cancel_order_posts_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/ord_1/cancel"))
            .and(body_json(json!({ "reason": "user_rejected" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "applied": false })))
            .mount(&server)
            .await;

        let ack = client(&server)
            .await
            .cancel_order(&OrderId::from("ord_1"), "user_rejected")
            .await
            .unwrap();
        assert!(!ack.applied);
    }

    #[tokio::test]
    async fn test_status_codes_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/missing/cancel"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders/paid/cancel"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already paid"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders/broken/payments"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let missing = OrderId::from("missing");
        assert_eq!(
            client.cancel_order(&missing, "x").await,
            Err(OrderError::NotFound(missing))
        );
        assert_eq!(
            client.cancel_order(&OrderId::from("paid"), "x").await,
            Err(OrderError::Conflict("already paid".into()))
        );
        let err = client
            .record_payment(
                &OrderId::from("broken"),
                B256::ZERO,
                OutcomeStatus::Completed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Unavailable(reason) if reason.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_response_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderServiceError::JsonDeserialization { context: "POST /orders", .. }
        ));
    }
}
