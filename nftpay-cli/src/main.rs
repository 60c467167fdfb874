//! Command-line storefront driver for nftpay.
//!
//! # Usage
//!
//! ```bash
//! # List the networks payments can be made on
//! nftpay networks
//!
//! # Buy an item with the highest ranked wallet
//! nftpay checkout --item token-42 --payee 0x... --amount 0.5 --network poly
//!
//! # Record a transaction hash after an unconfirmed payment
//! nftpay confirm --order ord_1 --hash 0x...
//!
//! # Configure logging level
//! RUST_LOG=debug nftpay providers
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `nftpay.toml`)
//! - `NFTPAY_ORDER_API` - Override the order API base URL
//! - `NFTPAY_ORDER_TOKEN` - Override the order API bearer token
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

mod app;
mod cli;
mod config;
mod error;
mod wallets;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use nftpay_evm::{Approver, AutoApprove};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::config::CliConfig;
use crate::error::CliError;
use crate::wallets::ConsoleApprover;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("nftpay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = CliConfig::load(&cli.config)?;
    tracing::debug!(
        config = %cli.config.display(),
        wallets = config.wallets.len(),
        networks = config.networks.len(),
        "Loaded configuration"
    );

    let approver: Arc<dyn Approver> = if cli.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ConsoleApprover)
    };
    let app = App::new(&config, &approver)?;
    let mut stdout = io::stdout();

    match &cli.command {
        Command::Networks => app.networks(&mut stdout)?,
        Command::Providers => app.providers(&mut stdout)?,
        Command::Pay(args) => app.pay(args, &mut stdout).await?,
        Command::Checkout(args) => app.checkout(args, &mut stdout).await?,
        Command::Confirm(args) => app.confirm(args, &mut stdout).await?,
    }
    Ok(())
}
