#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Wallet-mediated payment orchestration for an NFT marketplace storefront.
//!
//! This crate holds the part of the storefront that talks to a user's wallet:
//! it discovers injected wallet providers, negotiates which chain is active,
//! keeps track of the connected account, and drives a payment through gas
//! estimation, submission, confirmation, retry and recording with the
//! marketplace backend.
//!
//! # Modules
//!
//! - [`networks`] - Registry of supported chains
//! - [`provider`] - Wallet provider model, dialect-aware RPC client and locator
//! - [`negotiator`] - Chain switching and registration against a provider
//! - [`session`] - Connected-account state machine and provider event handling
//! - [`orchestrator`] - Payment submission, retry, confirmation and manual fallback
//! - [`order`] - Order lifecycle collaborator contract and an in-memory ledger
//! - [`amount`] - Human-readable native currency amounts
//! - [`error`] - Failure taxonomy surfaced to callers
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

pub mod amount;
pub mod error;
pub mod negotiator;
pub mod networks;
pub mod orchestrator;
pub mod order;
pub mod provider;
pub mod session;

#[cfg(test)]
mod mock;

pub use error::FailureKind;
pub use negotiator::{ChainNegotiator, NegotiatorConfig, Outcome};
pub use networks::{Network, NetworkRegistry};
pub use orchestrator::{
    OrchestratorConfig, PaymentIntent, PaymentReport, PaymentResult, TransactionOrchestrator,
};
pub use order::{OrderId, OrderLifecycle};
pub use provider::{ProviderHandle, WalletTransport};
pub use session::ConnectionSession;
