//! User approval of wallet prompts.

use std::fmt;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

/// A prompt a wallet shows before acting on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRequest {
    /// Expose the account to the storefront.
    Connect {
        /// Account to expose.
        account: Address,
    },
    /// Switch the active chain.
    SwitchChain {
        /// Requested chain.
        chain_id: u64,
    },
    /// Register a chain and switch to it.
    AddChain {
        /// Requested chain.
        chain_id: u64,
        /// Display name supplied by the storefront.
        chain_name: String,
    },
    /// Sign and broadcast a transaction.
    SendTransaction {
        /// Chain the transaction is signed for.
        chain_id: u64,
        /// Recipient.
        to: Option<Address>,
        /// Transferred value in wei.
        value: U256,
        /// Gas limit, if the storefront supplied one.
        gas: Option<u64>,
    },
}

impl fmt::Display for ApprovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { account } => write!(f, "connect account {account}"),
            Self::SwitchChain { chain_id } => write!(f, "switch to chain {chain_id}"),
            Self::AddChain {
                chain_id,
                chain_name,
            } => write!(f, "add chain {chain_name} ({chain_id})"),
            Self::SendTransaction {
                chain_id,
                to,
                value,
                gas,
            } => {
                write!(f, "send {value} wei on chain {chain_id}")?;
                if let Some(to) = to {
                    write!(f, " to {to}")?;
                }
                if let Some(gas) = gas {
                    write!(f, " (gas limit {gas})")?;
                }
                Ok(())
            }
        }
    }
}

/// Decides whether a prompt is accepted.
///
/// A declined prompt surfaces to the caller as an EIP-1193 user rejection.
#[async_trait]
pub trait Approver: Send + Sync + fmt::Debug {
    /// Returns `true` to accept the request.
    async fn approve(&self, request: &ApprovalRequest) -> bool;
}

/// Accepts every prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}
