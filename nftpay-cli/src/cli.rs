//! Command-line argument parsing with clap.

use std::path::PathBuf;

use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};

/// Drive storefront payments through a configured wallet.
#[derive(Parser, Debug, Clone)]
#[command(name = "nftpay", version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CONFIG", default_value = "nftpay.toml")]
    pub config: PathBuf,

    /// Approve every wallet prompt without asking.
    #[arg(short, long)]
    pub yes: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the networks payments can be made on.
    Networks,

    /// List the configured wallets in preference order.
    Providers,

    /// Pay an existing order.
    Pay(PayArgs),

    /// Create an order for an item and pay it.
    Checkout(CheckoutArgs),

    /// Record a transaction hash for an order after an unconfirmed payment.
    Confirm(ConfirmArgs),
}

/// Wallet and network selection shared by paying commands.
#[derive(Args, Debug, Clone)]
pub struct WalletArgs {
    /// Configured wallet to use; the highest ranked one when omitted.
    #[arg(short, long)]
    pub wallet: Option<String>,

    /// Network slug or chain ID; the default network when omitted.
    #[arg(short, long)]
    pub network: Option<String>,

    /// Expected paying account; the connected account when omitted.
    #[arg(long)]
    pub from: Option<Address>,
}

/// Arguments for the pay command.
#[derive(Args, Debug, Clone)]
pub struct PayArgs {
    /// Order being paid.
    #[arg(long)]
    pub order: String,

    /// Recipient address.
    #[arg(long)]
    pub to: String,

    /// Amount in the network's native currency (e.g. `0.5`).
    #[arg(long)]
    pub amount: String,

    #[command(flatten)]
    pub wallet: WalletArgs,
}

/// Arguments for the checkout command.
#[derive(Args, Debug, Clone)]
pub struct CheckoutArgs {
    /// Marketplace reference of the item.
    #[arg(long)]
    pub item: String,

    /// Seller address.
    #[arg(long)]
    pub payee: String,

    /// Amount in the network's native currency (e.g. `0.5`).
    #[arg(long)]
    pub amount: String,

    /// Place an offer instead of buying outright.
    #[arg(long)]
    pub offer: bool,

    #[command(flatten)]
    pub wallet: WalletArgs,
}

/// Arguments for the confirm command.
#[derive(Args, Debug, Clone)]
pub struct ConfirmArgs {
    /// Order the payment belongs to.
    #[arg(long)]
    pub order: String,

    /// Transaction hash as shown by the wallet or explorer.
    #[arg(long)]
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_pay_command() {
        let cli = Cli::try_parse_from([
            "nftpay",
            "--config",
            "shop.toml",
            "-y",
            "pay",
            "--order",
            "ord_1",
            "--to",
            "0x00000000000000000000000000000000000000cc",
            "--amount",
            "0.5",
            "--network",
            "poly",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("shop.toml"));
        assert!(cli.yes);
        let Command::Pay(args) = cli.command else {
            panic!("expected pay command");
        };
        assert_eq!(args.order, "ord_1");
        assert_eq!(args.amount, "0.5");
        assert_eq!(args.wallet.network.as_deref(), Some("poly"));
        assert!(args.wallet.wallet.is_none());
        assert!(args.wallet.from.is_none());
    }

    #[test]
    fn test_checkout_requires_item() {
        let err = Cli::try_parse_from([
            "nftpay",
            "checkout",
            "--payee",
            "0x00000000000000000000000000000000000000cc",
            "--amount",
            "1",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_rejects_malformed_from_address() {
        let err = Cli::try_parse_from([
            "nftpay", "pay", "--order", "ord_1", "--to", "0x00", "--amount", "1", "--from", "0x1",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
