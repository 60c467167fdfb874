//! HTTP integrations for nftpay.
//!
//! # Modules
//!
//! - [`orders`] - [`OrderServiceClient`], the marketplace backend's order endpoints
//!   behind the [`nftpay::order::OrderLifecycle`] contract
//! - [`bridge`] - [`BridgeTransport`], a wallet provider reached over an HTTP
//!   JSON-RPC bridge
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod bridge;
pub mod orders;

pub use bridge::{BridgeError, BridgeTransport};
pub use orders::{OrderServiceClient, OrderServiceError};
