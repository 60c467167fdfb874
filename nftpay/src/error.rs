//! Failure taxonomy surfaced to callers of the payment flow.
//!
//! Every terminal payment outcome other than a confirmed, recorded payment maps
//! to exactly one [`FailureKind`]. The kinds are deliberately fine-grained:
//! callers route the user differently depending on whether money may have
//! moved ([`FailureKind::ConfirmationUnknown`], [`FailureKind::PaidButUnrecorded`])
//! or certainly did not ([`FailureKind::UserRejected`], [`FailureKind::InvalidIntent`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a payment that did not end in a confirmed, recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The user declined a wallet prompt.
    UserRejected,
    /// No wallet provider or no connected session.
    ProviderUnavailable,
    /// The connected account differs from the intended payer.
    MismatchedAccount,
    /// The target chain could not be activated in the wallet.
    ChainUnsupported,
    /// Payment parameters were malformed; the wallet was never contacted.
    InvalidIntent,
    /// Both automated submission attempts failed on transient errors.
    TransientExhausted,
    /// The transaction was sent but its inclusion could not be observed.
    ConfirmationUnknown,
    /// The payment confirmed on-chain but recording it with the backend failed.
    PaidButUnrecorded,
    /// The transaction was included but reverted.
    TransactionReverted,
    /// Unclassified provider failure.
    ProviderError,
}

impl FailureKind {
    /// Returns the stable machine-readable code of this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UserRejected => "user_rejected",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::MismatchedAccount => "mismatched_account",
            Self::ChainUnsupported => "chain_unsupported",
            Self::InvalidIntent => "invalid_intent",
            Self::TransientExhausted => "transient_exhausted",
            Self::ConfirmationUnknown => "confirmation_unknown",
            Self::PaidButUnrecorded => "paid_but_unrecorded",
            Self::TransactionReverted => "transaction_reverted",
            Self::ProviderError => "provider_error",
        }
    }

    /// Returns the message shown to the user for this kind.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::UserRejected => "You cancelled the request in your wallet.",
            Self::ProviderUnavailable => {
                "No wallet is connected. Install or unlock a wallet and connect it to continue."
            }
            Self::MismatchedAccount => {
                "Your wallet is set to a different account than the one signed in. Switch accounts in your wallet and try again."
            }
            Self::ChainUnsupported => {
                "Your wallet could not switch to the required network. Switch networks manually and try again."
            }
            Self::InvalidIntent => "The payment details are invalid. Refresh the page and try again.",
            Self::TransientExhausted => {
                "Your wallet did not respond. If you paid from another wallet, submit the transaction hash to confirm the order."
            }
            Self::ConfirmationUnknown => {
                "Your payment was sent but we could not confirm it yet. Do not pay again; confirm the order with the transaction hash once it appears on the explorer."
            }
            Self::PaidButUnrecorded => {
                "Your payment went through but we could not update the order. Do not pay again; we will retry recording it with your transaction hash."
            }
            Self::TransactionReverted => {
                "The transaction was rejected by the network and no funds were transferred."
            }
            Self::ProviderError => "Something went wrong in your wallet. Please try again.",
        }
    }

    /// Returns `true` when money may have moved and the user must be routed to
    /// the manual transaction-hash path rather than asked to pay again.
    #[must_use]
    pub const fn requires_manual_path(self) -> bool {
        matches!(
            self,
            Self::TransientExhausted | Self::ConfirmationUnknown | Self::PaidButUnrecorded
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
