//! Purchase and offer checkout.
//!
//! Checkout wraps a payment in its order: the order is created first, the
//! payment is submitted against it, and the order is cancelled again when the
//! payment ended before any transaction existed.

use alloy_primitives::{Address, U256};

use super::{PaymentIntent, PaymentReport, PaymentResult, TransactionOrchestrator};
use crate::amount::format_wei;
use crate::error::FailureKind;
use crate::networks::Network;
use crate::order::{CreateOrderRequest, OrderError, OrderId, OrderKind, OrderLifecycle};
use crate::session::ConnectionSession;

/// A purchase or offer to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Purchase or offer.
    pub kind: OrderKind,
    /// Paying account.
    pub payer: Address,
    /// Receiving account, as entered.
    pub payee: String,
    /// Amount in the smallest unit of the native currency.
    pub amount_wei: U256,
    /// Network to pay on.
    pub network: Network,
    /// Marketplace reference of the item.
    pub item_reference: String,
}

/// Result of [`TransactionOrchestrator::checkout`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReport {
    /// The order created for this checkout.
    pub order_id: OrderId,
    /// The payment report.
    pub payment: PaymentReport,
    /// Whether the order was cancelled after the payment.
    pub cancelled: bool,
}

/// Returns the cancellation reason for results where no transaction exists.
fn cancellation_reason(result: &PaymentResult) -> Option<&'static str> {
    match result {
        PaymentResult::CancelledByUser { .. } => Some(FailureKind::UserRejected.code()),
        PaymentResult::Failed(failure) if failure.tx_hash.is_none() => match failure.kind {
            FailureKind::InvalidIntent
            | FailureKind::MismatchedAccount
            | FailureKind::ChainUnsupported
            | FailureKind::ProviderUnavailable => Some(failure.kind.code()),
            _ => None,
        },
        _ => None,
    }
}

impl<O: OrderLifecycle> TransactionOrchestrator<O> {
    /// Creates an order, pays it, and cancels it if the payment never left the wallet.
    ///
    /// Orders are never cancelled once a transaction hash exists: the payment
    /// may still confirm.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the order cannot be created. Payment
    /// outcomes are reported in the [`CheckoutReport`].
    pub async fn checkout(
        &self,
        session: &ConnectionSession,
        request: CheckoutRequest,
    ) -> Result<CheckoutReport, OrderError> {
        let CheckoutRequest {
            kind,
            payer,
            payee,
            amount_wei,
            network,
            item_reference,
        } = request;

        let order_id = self
            .orders
            .create_order(&CreateOrderRequest {
                payer: payer.to_string(),
                payee: payee.clone(),
                amount: format_wei(amount_wei, network.native_decimals),
                currency: network.native_symbol.clone(),
                network: network.id.clone(),
                item_reference,
                kind,
            })
            .await?;

        #[cfg(feature = "telemetry")]
        tracing::info!(order = %order_id, ?kind, network = %network, "order created");

        let intent = PaymentIntent::new(payer, payee, amount_wei, network, order_id.clone());
        let payment = self.submit_payment(session, &intent).await;

        let cancelled = match cancellation_reason(&payment.result) {
            Some(reason) => match self.orders.cancel_order(&order_id, reason).await {
                Ok(ack) => ack.applied,
                Err(_e) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(order = %order_id, error = %_e, "failed to cancel order");
                    false
                }
            },
            None => false,
        };

        Ok(CheckoutReport {
            order_id,
            payment,
            cancelled,
        })
    }
}
