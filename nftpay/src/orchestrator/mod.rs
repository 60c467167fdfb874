//! Payment orchestration.
//!
//! [`TransactionOrchestrator::submit_payment`] drives one payment intent from
//! validation to a recorded on-chain payment:
//!
//! 1. Validate the intent (recipient address, non-zero amount).
//! 2. Check that the session is connected to the intended payer.
//! 3. Negotiate the target chain with the wallet.
//! 4. Estimate gas, bounded by a timeout, and add a safety margin.
//! 5. Ask the wallet to sign and send; retry once on a transient error.
//! 6. Poll for the receipt, bounded by a timeout.
//! 7. Record the payment with the order backend.
//!
//! Steps run strictly in sequence. Whenever money may have moved but the
//! outcome cannot be observed, the result routes the user to the manual
//! transaction-hash path ([`TransactionOrchestrator::confirm_manually`])
//! instead of reporting a failure that would invite a second payment.

pub mod checkout;

pub use checkout::{CheckoutReport, CheckoutRequest};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::error::FailureKind;
use crate::negotiator::{ChainNegotiator, Outcome};
use crate::networks::Network;
use crate::order::{Ack, OrderError, OrderId, OrderLifecycle, OutcomeStatus};
use crate::provider::{ErrorClass, ProviderClient, ProviderError, ReceiptSummary, TransferRequest};
use crate::session::{ConnectionSession, SessionState};

/// Default gas headroom added on top of the estimate, in percent.
pub const DEFAULT_GAS_MARGIN_PERCENT: u64 = 20;

/// Timing and margin settings of the [`TransactionOrchestrator`].
///
/// Durations are configured in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Headroom added to the gas estimate, in percent.
    pub gas_margin_percent: u64,
    /// Upper bound on gas estimation.
    pub estimate_timeout_ms: u64,
    /// Pause before the single retry after a transient send error.
    pub retry_delay_ms: u64,
    /// Upper bound on waiting for the transaction receipt.
    pub confirmation_timeout_ms: u64,
    /// Interval between receipt polls.
    pub confirmation_poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gas_margin_percent: DEFAULT_GAS_MARGIN_PERCENT,
            estimate_timeout_ms: 10_000,
            retry_delay_ms: 1_500,
            confirmation_timeout_ms: 120_000,
            confirmation_poll_interval_ms: 2_000,
        }
    }
}

impl OrchestratorConfig {
    /// Returns the gas estimation bound.
    #[must_use]
    pub const fn estimate_timeout(&self) -> Duration {
        Duration::from_millis(self.estimate_timeout_ms)
    }

    /// Returns the pause before a retry.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the confirmation bound.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Returns the receipt polling interval.
    #[must_use]
    pub const fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }
}

/// Applies a percentage margin to a gas estimate, rounding up.
///
/// ```rust
/// use nftpay::orchestrator::apply_gas_margin;
///
/// assert_eq!(apply_gas_margin(21_000, 20), 25_200);
/// assert_eq!(apply_gas_margin(1, 20), 2);
/// ```
#[must_use]
pub fn apply_gas_margin(estimate: u64, margin_percent: u64) -> u64 {
    let scaled = u128::from(estimate) * (100 + u128::from(margin_percent));
    u64::try_from(scaled.div_ceil(100)).unwrap_or(u64::MAX)
}

/// What the user is asked to pay, and for which order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    payer: Address,
    recipient: String,
    amount_wei: U256,
    target_network: Network,
    order_reference: OrderId,
}

impl PaymentIntent {
    /// Creates an intent. The recipient is validated when the intent is submitted.
    pub fn new(
        payer: Address,
        recipient: impl Into<String>,
        amount_wei: U256,
        target_network: Network,
        order_reference: OrderId,
    ) -> Self {
        Self {
            payer,
            recipient: recipient.into(),
            amount_wei,
            target_network,
            order_reference,
        }
    }

    /// Expected paying account.
    #[must_use]
    pub const fn payer(&self) -> Address {
        self.payer
    }

    /// Recipient as provided.
    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Amount in the smallest unit of the native currency.
    #[must_use]
    pub const fn amount_wei(&self) -> U256 {
        self.amount_wei
    }

    /// Chain the payment must be made on.
    #[must_use]
    pub const fn target_network(&self) -> &Network {
        &self.target_network
    }

    /// Order the payment settles.
    #[must_use]
    pub const fn order_reference(&self) -> &OrderId {
        &self.order_reference
    }

    fn validate(&self) -> Result<Address, String> {
        let recipient = parse_strict_address(&self.recipient)
            .ok_or_else(|| format!("recipient {:?} is not a 20-byte hex address", self.recipient))?;
        if recipient.is_zero() {
            return Err("recipient is the zero address".to_owned());
        }
        if self.amount_wei.is_zero() {
            return Err("amount must be greater than zero".to_owned());
        }
        Ok(recipient)
    }
}

fn parse_strict_address(value: &str) -> Option<Address> {
    let hex = value.strip_prefix("0x")?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str(value).ok()
}

fn parse_strict_hash(value: &str) -> Option<TxHash> {
    let hex = value.trim().strip_prefix("0x")?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    TxHash::from_str(hex).ok()
}

/// Checks that the session is still connected to the intended payer.
fn check_payer(session: &ConnectionSession, payer: Address) -> Result<(), PaymentResult> {
    let snapshot = session.snapshot();
    let account = match (snapshot.state, snapshot.account) {
        (SessionState::Connected, Some(account)) => account,
        _ => {
            return Err(PaymentResult::failed(
                FailureKind::ProviderUnavailable,
                "wallet session is not connected",
            ));
        }
    };
    if account == payer {
        Ok(())
    } else {
        Err(PaymentResult::failed(
            FailureKind::MismatchedAccount,
            format!("connected account {account} differs from payer {payer}"),
        ))
    }
}

/// Wallet prompt a user cancelled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStage {
    /// The chain switch or registration prompt.
    NetworkSwitch,
    /// The transaction signature prompt.
    Signature,
}

/// A payment that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Raw reason, for logs and support.
    pub reason: String,
    /// Hash of the transaction, when one was sent.
    pub tx_hash: Option<TxHash>,
}

/// Terminal result of a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentResult {
    /// The payment is on-chain and recorded.
    Confirmed {
        /// Transaction hash.
        hash: TxHash,
    },
    /// The payment was sent but its inclusion could not be observed in time.
    AwaitingManualConfirmation {
        /// Transaction hash.
        hash: TxHash,
    },
    /// The user cancelled a wallet prompt.
    CancelledByUser {
        /// Prompt the user cancelled.
        stage: SigningStage,
    },
    /// The payment is on-chain but the backend did not accept the record.
    PaidButUnrecorded {
        /// Transaction hash.
        hash: TxHash,
        /// Backend error.
        reason: String,
    },
    /// The payment failed.
    Failed(PaymentFailure),
}

impl PaymentResult {
    fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failed(PaymentFailure {
            kind,
            reason: reason.into(),
            tx_hash: None,
        })
    }

    /// Returns the failure kind; `None` for a confirmed, recorded payment.
    #[must_use]
    pub const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Confirmed { .. } => None,
            Self::AwaitingManualConfirmation { .. } => Some(FailureKind::ConfirmationUnknown),
            Self::CancelledByUser { .. } => Some(FailureKind::UserRejected),
            Self::PaidButUnrecorded { .. } => Some(FailureKind::PaidButUnrecorded),
            Self::Failed(failure) => Some(failure.kind),
        }
    }

    /// Returns the transaction hash, if a transaction was sent.
    #[must_use]
    pub const fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::Confirmed { hash }
            | Self::AwaitingManualConfirmation { hash }
            | Self::PaidButUnrecorded { hash, .. } => Some(*hash),
            Self::Failed(failure) => failure.tx_hash,
            Self::CancelledByUser { .. } => None,
        }
    }

    /// Returns `true` for a confirmed, recorded payment.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Progress of a single submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    /// Estimating gas.
    Estimating,
    /// Waiting for the user to sign.
    AwaitingSignature,
    /// Sent, waiting for inclusion.
    Pending,
    /// Included successfully.
    Confirmed,
    /// Failed; see [`TransactionAttempt::error`].
    Failed,
}

/// One submission of a payment to the wallet. At most two per intent.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionAttempt {
    /// 1 for the first submission, 2 for the retry.
    pub attempt_number: u8,
    /// Last status reached.
    pub status: AttemptStatus,
    /// Hash returned by the wallet.
    pub hash: Option<TxHash>,
    /// Error that ended the attempt.
    pub error: Option<ProviderError>,
    /// Gas limit sent with the transaction.
    pub gas_limit: Option<u64>,
}

impl TransactionAttempt {
    /// The first attempt, created before gas is estimated.
    const fn estimating() -> Self {
        Self {
            attempt_number: 1,
            status: AttemptStatus::Estimating,
            hash: None,
            error: None,
            gas_limit: None,
        }
    }

    const fn new(attempt_number: u8, gas_limit: Option<u64>) -> Self {
        Self {
            attempt_number,
            status: AttemptStatus::AwaitingSignature,
            hash: None,
            error: None,
            gas_limit,
        }
    }
}

/// Result of [`TransactionOrchestrator::submit_payment`] with its attempt history.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReport {
    /// Terminal result.
    pub result: PaymentResult,
    /// Submission attempts, in order.
    pub attempts: Vec<TransactionAttempt>,
}

/// Errors of the manual confirmation path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManualConfirmationError {
    /// The hash is not a `0x`-prefixed 32-byte hex string.
    #[error("invalid transaction hash: {0:?}")]
    InvalidHash(String),
    /// The order backend rejected the record.
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Drives payment intents through the wallet and records them with the backend.
#[derive(Debug)]
pub struct TransactionOrchestrator<O> {
    negotiator: Arc<ChainNegotiator>,
    orders: O,
    config: OrchestratorConfig,
}

impl<O: OrderLifecycle> TransactionOrchestrator<O> {
    /// Creates an orchestrator.
    pub const fn new(negotiator: Arc<ChainNegotiator>, orders: O, config: OrchestratorConfig) -> Self {
        Self {
            negotiator,
            orders,
            config,
        }
    }

    /// Returns the order collaborator.
    pub const fn orders(&self) -> &O {
        &self.orders
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submits a payment through the session's wallet.
    ///
    /// Never fails: every outcome, including provider errors, is reported in
    /// the returned [`PaymentReport`].
    pub async fn submit_payment(
        &self,
        session: &ConnectionSession,
        intent: &PaymentIntent,
    ) -> PaymentReport {
        let mut attempts = Vec::new();
        let result = traced!(
            self.drive(session, intent, &mut attempts),
            tracing::info_span!(
                "submit_payment",
                order = %intent.order_reference,
                chain_id = intent.target_network.chain_id
            )
        );

        #[cfg(feature = "telemetry")]
        match &result {
            PaymentResult::Confirmed { hash } => {
                tracing::info!(order = %intent.order_reference, %hash, "payment confirmed");
            }
            other => {
                tracing::warn!(order = %intent.order_reference, kind = ?other.kind(), "payment not confirmed");
            }
        }

        PaymentReport { result, attempts }
    }

    /// Records a transaction hash the user supplies for an order.
    ///
    /// Used when automated submission could not complete. The hash is checked
    /// syntactically only; no provider is contacted.
    ///
    /// # Errors
    ///
    /// Returns [`ManualConfirmationError::InvalidHash`] for a malformed hash,
    /// or the backend's error.
    pub async fn confirm_manually(
        &self,
        order: &OrderId,
        tx_hash: &str,
    ) -> Result<Ack, ManualConfirmationError> {
        let hash = parse_strict_hash(tx_hash)
            .ok_or_else(|| ManualConfirmationError::InvalidHash(tx_hash.to_owned()))?;

        #[cfg(feature = "telemetry")]
        tracing::info!(%order, %hash, "recording manually confirmed payment");

        Ok(self
            .orders
            .record_payment(order, hash, OutcomeStatus::Completed)
            .await?)
    }

    /// Repeats recording of a payment that confirmed but was not recorded.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn retry_recording(&self, order: &OrderId, hash: TxHash) -> Result<Ack, OrderError> {
        self.orders
            .record_payment(order, hash, OutcomeStatus::Completed)
            .await
    }

    async fn drive(
        &self,
        session: &ConnectionSession,
        intent: &PaymentIntent,
        attempts: &mut Vec<TransactionAttempt>,
    ) -> PaymentResult {
        let recipient = match intent.validate() {
            Ok(recipient) => recipient,
            Err(reason) => return PaymentResult::failed(FailureKind::InvalidIntent, reason),
        };

        if let Err(result) = check_payer(session, intent.payer) {
            return result;
        }

        let handle = session.provider();
        let network = &intent.target_network;
        match self.negotiator.ensure_network(handle, network).await {
            Outcome::AlreadyOnTarget | Outcome::Switched | Outcome::AddedAndSwitched => {
                session.observe_chain(network.chain_id);
            }
            Outcome::RejectedByUser => {
                return PaymentResult::CancelledByUser {
                    stage: SigningStage::NetworkSwitch,
                };
            }
            Outcome::UnsupportedProvider => {
                return PaymentResult::failed(
                    FailureKind::ChainUnsupported,
                    format!("wallet cannot switch to {network} programmatically"),
                );
            }
            Outcome::Failed(e) => {
                return PaymentResult::failed(FailureKind::ChainUnsupported, e.to_string());
            }
        }

        // the wallet may have changed account while a prompt was open
        if let Err(result) = check_payer(session, intent.payer) {
            return result;
        }

        let client = handle.client();
        let mut tx = TransferRequest::new(intent.payer, recipient, intent.amount_wei);
        let mut first = TransactionAttempt::estimating();
        tx.gas = self.estimate_gas_limit(&client, &tx).await;
        first.gas_limit = tx.gas;
        first.status = AttemptStatus::AwaitingSignature;

        if let Err(result) = check_payer(session, intent.payer) {
            return result;
        }

        let hash = match self.send_with_retry(&client, &tx, first, attempts).await {
            Ok(hash) => hash,
            Err(result) => return result,
        };

        let receipt = match timeout(
            self.config.confirmation_timeout(),
            self.wait_for_receipt(&client, hash),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(_e)) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(%hash, error = %_e, "receipt polling failed");
                return PaymentResult::AwaitingManualConfirmation { hash };
            }
            Err(_) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(%hash, "confirmation timed out");
                return PaymentResult::AwaitingManualConfirmation { hash };
            }
        };

        let succeeded = receipt.succeeded();
        if let Some(last) = attempts.last_mut() {
            last.status = if succeeded {
                AttemptStatus::Confirmed
            } else {
                AttemptStatus::Failed
            };
        }
        if !succeeded {
            if let Err(_e) = self
                .orders
                .record_payment(&intent.order_reference, hash, OutcomeStatus::Failed)
                .await
            {
                #[cfg(feature = "telemetry")]
                tracing::warn!(%hash, error = %_e, "failed to record reverted payment");
            }
            return PaymentResult::Failed(PaymentFailure {
                kind: FailureKind::TransactionReverted,
                reason: format!("transaction {hash} reverted"),
                tx_hash: Some(hash),
            });
        }

        match self
            .orders
            .record_payment(&intent.order_reference, hash, OutcomeStatus::Completed)
            .await
        {
            Ok(_) => PaymentResult::Confirmed { hash },
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::error!(%hash, error = %e, "payment confirmed but not recorded");
                PaymentResult::PaidButUnrecorded {
                    hash,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Estimates gas with the configured margin; `None` lets the wallet choose.
    async fn estimate_gas_limit(
        &self,
        client: &ProviderClient<'_>,
        tx: &TransferRequest,
    ) -> Option<u64> {
        match timeout(self.config.estimate_timeout(), client.estimate_gas(tx)).await {
            Ok(Ok(estimate)) => Some(apply_gas_margin(estimate, self.config.gas_margin_percent)),
            Ok(Err(_e)) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(error = %_e, "gas estimation failed, sending without limit");
                None
            }
            Err(_) => {
                #[cfg(feature = "telemetry")]
                tracing::info!("gas estimation timed out, sending without limit");
                None
            }
        }
    }

    /// Sends the transaction, repeating it once with identical parameters
    /// after a transient error.
    async fn send_with_retry(
        &self,
        client: &ProviderClient<'_>,
        tx: &TransferRequest,
        first: TransactionAttempt,
        attempts: &mut Vec<TransactionAttempt>,
    ) -> Result<TxHash, PaymentResult> {
        let mut attempt = first;
        loop {
            let attempt_number = attempt.attempt_number;
            let sent = client.send_transaction(tx).await;
            match sent {
                Ok(hash) => {
                    attempt.status = AttemptStatus::Pending;
                    attempt.hash = Some(hash);
                    attempts.push(attempt);

                    #[cfg(feature = "telemetry")]
                    tracing::info!(attempt = attempt_number, %hash, "transaction sent");

                    return Ok(hash);
                }
                Err(e) => {
                    let class = e.classify();
                    let reason = e.to_string();
                    attempt.status = AttemptStatus::Failed;
                    attempt.error = Some(e);
                    attempts.push(attempt);

                    #[cfg(feature = "telemetry")]
                    tracing::warn!(attempt = attempt_number, ?class, error = %reason, "transaction submission failed");

                    match class {
                        ErrorClass::UserRejected => {
                            return Err(PaymentResult::CancelledByUser {
                                stage: SigningStage::Signature,
                            });
                        }
                        ErrorClass::Transient if attempt_number == 1 => {
                            tokio::time::sleep(self.config.retry_delay()).await;
                            attempt = TransactionAttempt::new(2, tx.gas);
                        }
                        ErrorClass::Transient => {
                            return Err(PaymentResult::failed(
                                FailureKind::TransientExhausted,
                                reason,
                            ));
                        }
                        ErrorClass::UnrecognizedChain | ErrorClass::Other => {
                            return Err(PaymentResult::failed(FailureKind::ProviderError, reason));
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_receipt(
        &self,
        client: &ProviderClient<'_>,
        hash: TxHash,
    ) -> Result<ReceiptSummary, ProviderError> {
        loop {
            if let Some(receipt) = client.transaction_receipt(hash).await? {
                if receipt.is_included() {
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(self.config.confirmation_poll_interval()).await;
        }
    }
}
