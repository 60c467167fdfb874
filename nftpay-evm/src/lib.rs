#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A wallet provider backed by a local private key.
//!
//! [`SignerWallet`] implements [`nftpay::WalletTransport`] on top of an alloy
//! provider and a [`PrivateKeySigner`](alloy_signer_local::PrivateKeySigner).
//! It behaves like an injected browser wallet: it holds an active chain,
//! knows a set of chains it can switch between, asks an [`Approver`] before
//! every prompt a real wallet would show, and pushes `chainChanged`
//! notifications to registered listeners.
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod approval;
pub mod wallet;

pub use approval::{ApprovalRequest, Approver, AutoApprove};
pub use wallet::{SignerWallet, SignerWalletError};
