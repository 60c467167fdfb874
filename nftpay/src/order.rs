//! Order lifecycle collaborator.
//!
//! The marketplace backend is the source of truth for orders. The payment
//! flow only needs three things from it, captured by [`OrderLifecycle`]:
//! create an order before payment, record the transaction hash once a
//! payment is known, and cancel an order that can no longer be paid.
//!
//! [`InMemoryOrderBook`] is a self-contained ledger implementing the contract,
//! used by the CLI's dry runs and by tests. The HTTP implementation lives in
//! the `nftpay-http` crate.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::TxHash;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Backend identifier of an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Wraps a backend identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment status reported to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The payment is confirmed on-chain.
    Completed,
    /// The payment failed on-chain.
    Failed,
    /// The payment is submitted but not yet confirmed.
    Pending,
}

/// Whether an order is a direct purchase or an offer on a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Buy a listed item at its price.
    #[default]
    Purchase,
    /// Offer an amount for an item.
    Offer,
}

/// Acknowledgement of a state-changing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// `false` when the call repeated an already applied change.
    pub applied: bool,
}

/// Parameters of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Paying account.
    pub payer: String,
    /// Receiving account (seller).
    pub payee: String,
    /// Amount in native units, as a decimal string.
    pub amount: String,
    /// Native currency symbol.
    pub currency: String,
    /// Network slug.
    pub network: String,
    /// Marketplace reference of the item (token or listing id).
    pub item_reference: String,
    /// Purchase or offer.
    #[serde(default)]
    pub kind: OrderKind,
}

impl CreateOrderRequest {
    /// Checks that every required field is present.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Validation`] naming the first empty field.
    pub fn validate(&self) -> Result<(), OrderError> {
        let fields = [
            ("payer", &self.payer),
            ("payee", &self.payee),
            ("amount", &self.amount),
            ("currency", &self.currency),
            ("network", &self.network),
            ("item_reference", &self.item_reference),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(OrderError::Validation {
                field: (*field).to_owned(),
            }),
            None => Ok(()),
        }
    }
}

/// Errors returned by an [`OrderLifecycle`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// A required field is missing or empty.
    #[error("validation_error: {field} is required")]
    Validation {
        /// Name of the offending field.
        field: String,
    },
    /// The order does not exist.
    #[error("order {0} not found")]
    NotFound(OrderId),
    /// The change conflicts with the order's current state.
    #[error("order conflict: {0}")]
    Conflict(String),
    /// The backend could not be reached or failed.
    #[error("order service unavailable: {0}")]
    Unavailable(String),
}

/// Operations the payment flow needs from the marketplace backend.
#[async_trait]
pub trait OrderLifecycle: Send + Sync {
    /// Creates an order and returns its identifier.
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, OrderError>;

    /// Records a payment. Idempotent on `(order, tx_hash)`.
    async fn record_payment(
        &self,
        order: &OrderId,
        tx_hash: TxHash,
        status: OutcomeStatus,
    ) -> Result<Ack, OrderError>;

    /// Cancels an order that can no longer be paid.
    async fn cancel_order(&self, order: &OrderId, reason: &str) -> Result<Ack, OrderError>;
}

#[async_trait]
impl<T: OrderLifecycle + ?Sized> OrderLifecycle for Arc<T> {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, OrderError> {
        (**self).create_order(request).await
    }

    async fn record_payment(
        &self,
        order: &OrderId,
        tx_hash: TxHash,
        status: OutcomeStatus,
    ) -> Result<Ack, OrderError> {
        (**self).record_payment(order, tx_hash, status).await
    }

    async fn cancel_order(&self, order: &OrderId, reason: &str) -> Result<Ack, OrderError> {
        (**self).cancel_order(order, reason).await
    }
}

/// State of an order in the [`InMemoryOrderBook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    /// Awaiting payment.
    Open,
    /// A completed payment was recorded.
    Paid {
        /// Hash of the recorded payment.
        tx_hash: TxHash,
    },
    /// The order was cancelled.
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },
}

/// An order held by the [`InMemoryOrderBook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    /// The request the order was created from.
    pub request: CreateOrderRequest,
    /// Current state.
    pub status: OrderStatus,
    /// Every distinct payment recorded, in order.
    pub payments: Vec<(TxHash, OutcomeStatus)>,
}

/// In-memory order ledger.
///
/// Identifiers are issued sequentially as `ord_1`, `ord_2`, ...
#[derive(Debug)]
pub struct InMemoryOrderBook {
    orders: DashMap<OrderId, OrderRecord>,
    next_id: AtomicU64,
}

impl Default for InMemoryOrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderBook {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns a copy of an order.
    #[must_use]
    pub fn order(&self, id: &OrderId) -> Option<OrderRecord> {
        self.orders.get(id).map(|entry| entry.value().clone())
    }

    /// Returns the number of orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Returns `true` if no order was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderLifecycle for InMemoryOrderBook {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, OrderError> {
        request.validate()?;
        let id = OrderId(format!(
            "ord_{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.orders.insert(
            id.clone(),
            OrderRecord {
                request: request.clone(),
                status: OrderStatus::Open,
                payments: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn record_payment(
        &self,
        order: &OrderId,
        tx_hash: TxHash,
        status: OutcomeStatus,
    ) -> Result<Ack, OrderError> {
        let mut record = self
            .orders
            .get_mut(order)
            .ok_or_else(|| OrderError::NotFound(order.clone()))?;
        if record.payments.contains(&(tx_hash, status)) {
            return Ok(Ack { applied: false });
        }
        match &record.status {
            OrderStatus::Cancelled { .. } => {
                return Err(OrderError::Conflict(format!("order {order} is cancelled")));
            }
            OrderStatus::Paid { tx_hash: paid } if status == OutcomeStatus::Completed => {
                return Err(OrderError::Conflict(format!(
                    "order {order} is already paid by {paid}"
                )));
            }
            _ => {}
        }
        record.payments.push((tx_hash, status));
        if status == OutcomeStatus::Completed {
            record.status = OrderStatus::Paid { tx_hash };
        }
        Ok(Ack { applied: true })
    }

    async fn cancel_order(&self, order: &OrderId, reason: &str) -> Result<Ack, OrderError> {
        let mut record = self
            .orders
            .get_mut(order)
            .ok_or_else(|| OrderError::NotFound(order.clone()))?;
        match record.status {
            OrderStatus::Paid { .. } => {
                return Err(OrderError::Conflict(format!(
                    "order {order} is already paid"
                )));
            }
            OrderStatus::Cancelled { .. } => return Ok(Ack { applied: false }),
            OrderStatus::Open => {}
        }
        record.status = OrderStatus::Cancelled {
            reason: reason.to_owned(),
        };
        Ok(Ack { applied: true })
    }
}
