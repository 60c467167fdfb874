use std::io;

use nftpay::amount::AmountParseError;
use nftpay::orchestrator::ManualConfirmationError;
use nftpay::order::OrderError;
use nftpay::session::SessionError;
use nftpay_evm::SignerWalletError;
use nftpay_http::OrderServiceError;

use crate::config::ConfigError;

/// Errors that end a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A configured wallet could not be built.
    #[error("wallet {name}: {source}")]
    Wallet {
        /// Wallet name.
        name: String,
        /// The underlying error.
        #[source]
        source: SignerWalletError,
    },
    /// A configured URL is invalid.
    #[error("invalid {context} URL: {source}")]
    InvalidUrl {
        /// What the URL is for.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// A network name or chain ID matched nothing.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    /// No network is registered.
    #[error("no networks are registered")]
    NoNetworks,
    /// No usable wallet is configured.
    #[error("no wallet is configured")]
    NoWallet,
    /// A wallet name matched nothing.
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),
    /// The amount is not a valid native amount.
    #[error("invalid amount: {0}")]
    Amount(#[from] AmountParseError),
    /// The wallet session could not be established.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The order backend refused the request.
    #[error(transparent)]
    Order(#[from] OrderError),
    /// A manual confirmation was refused.
    #[error(transparent)]
    ManualConfirmation(#[from] ManualConfirmationError),
    /// The order API client could not be configured.
    #[error(transparent)]
    OrderService(#[from] OrderServiceError),
    /// Writing output failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The payment ended without confirmation.
    #[error("payment not confirmed: {0}")]
    NotConfirmed(&'static str),
}
