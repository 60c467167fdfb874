//! Command execution.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use nftpay::amount::NativeAmount;
use nftpay::orchestrator::{CheckoutRequest, PaymentReport, PaymentResult};
use nftpay::order::{InMemoryOrderBook, OrderKind};
use nftpay::provider::locate_providers;
use nftpay::{
    ChainNegotiator, ConnectionSession, FailureKind, Network, NetworkRegistry, OrderId,
    OrderLifecycle, PaymentIntent, ProviderHandle, TransactionOrchestrator,
};
use nftpay_evm::Approver;
use nftpay_http::OrderServiceClient;

use crate::cli::{CheckoutArgs, ConfirmArgs, PayArgs, WalletArgs};
use crate::config::CliConfig;
use crate::error::CliError;
use crate::wallets::Wallets;

/// Output sink shared by the commands.
pub type Out = dyn Write + Send;

/// Everything a command needs, built once from configuration.
pub struct App {
    registry: NetworkRegistry,
    default_network: Option<Network>,
    wallets: Wallets,
    orchestrator: TransactionOrchestrator<Arc<dyn OrderLifecycle>>,
}

impl App {
    /// Builds the registry, wallets, order backend and orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if the configuration references unknown networks
    /// or contains invalid wallets or URLs.
    pub fn new(config: &CliConfig, approver: &Arc<dyn Approver>) -> Result<Self, CliError> {
        let registry = config.registry();
        let default_network = match &config.default_network {
            Some(name) => Some(
                registry
                    .resolve(name)
                    .cloned()
                    .ok_or_else(|| CliError::UnknownNetwork(name.clone()))?,
            ),
            None => registry.default_network().cloned(),
        };
        let wallets = Wallets::build(
            &config.wallets,
            &registry,
            default_network.as_ref().map(|network| network.chain_id),
            approver,
        )?;
        if wallets.as_slice().is_empty() {
            tracing::warn!("No wallets configured; paying commands will fail");
        }

        let orders: Arc<dyn OrderLifecycle> = match &config.order_service {
            Some(service) => {
                let mut client = OrderServiceClient::try_from(service.base_url.as_str())?
                    .with_timeout(Duration::from_millis(service.timeout_ms));
                match service.token.as_deref().map(str::trim) {
                    Some(token) if token.starts_with('$') => {
                        tracing::warn!("Order service token not resolved (missing env var?)");
                    }
                    Some(token) if !token.is_empty() => {
                        client = client.with_bearer_token(token)?;
                    }
                    _ => {}
                }
                tracing::info!(base_url = %client.base_url(), "Using order service");
                Arc::new(client)
            }
            None => {
                tracing::warn!("No order service configured; orders are kept in memory");
                Arc::new(InMemoryOrderBook::new())
            }
        };

        let negotiator = Arc::new(ChainNegotiator::new(config.negotiator));
        Ok(Self {
            registry,
            default_network,
            wallets,
            orchestrator: TransactionOrchestrator::new(negotiator, orders, config.orchestrator),
        })
    }

    /// Lists the registered networks.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn networks(&self, out: &mut Out) -> io::Result<()> {
        for network in self.registry.list_networks() {
            let marker = if Some(network) == self.default_network.as_ref() {
                "*"
            } else {
                " "
            };
            writeln!(
                out,
                "{marker} {:<10} {:>9}  {:<6} {}",
                network.id, network.chain_id, network.native_symbol, network.display_name
            )?;
        }
        Ok(())
    }

    /// Lists the usable wallets in preference order.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn providers(&self, out: &mut Out) -> io::Result<()> {
        for handle in locate_providers(&self.wallets) {
            let name = self
                .wallets
                .as_slice()
                .iter()
                .find(|wallet| wallet.injected.id() == handle.id())
                .map_or("?", |wallet| wallet.name.as_str());
            writeln!(
                out,
                "{name:<12} {:<9} {}",
                handle.vendor(),
                handle.capabilities()
            )?;
        }
        Ok(())
    }

    /// Pays an existing order.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if the command cannot run or the payment is not confirmed.
    pub async fn pay(&self, args: &PayArgs, out: &mut Out) -> Result<(), CliError> {
        let network = self.network(args.wallet.network.as_deref())?.clone();
        let amount_wei = amount_wei(&args.amount, &network)?;
        let (session, payer) = self.connect(&args.wallet).await?;

        let order = OrderId::new(args.order.as_str());
        let intent = PaymentIntent::new(payer, args.to.as_str(), amount_wei, network, order);
        let report = self.orchestrator.submit_payment(&session, &intent).await;
        session.disconnect();

        write_report(out, intent.target_network(), intent.order_reference(), &report)?;
        outcome(&report.result)
    }

    /// Creates an order for an item and pays it.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if the order cannot be created or the payment is not confirmed.
    pub async fn checkout(&self, args: &CheckoutArgs, out: &mut Out) -> Result<(), CliError> {
        let network = self.network(args.wallet.network.as_deref())?.clone();
        let amount_wei = amount_wei(&args.amount, &network)?;
        let (session, payer) = self.connect(&args.wallet).await?;

        let request = CheckoutRequest {
            kind: if args.offer {
                OrderKind::Offer
            } else {
                OrderKind::Purchase
            },
            payer,
            payee: args.payee.clone(),
            amount_wei,
            network: network.clone(),
            item_reference: args.item.clone(),
        };
        let result = self.orchestrator.checkout(&session, request).await;
        session.disconnect();
        let report = result?;

        writeln!(out, "order {}", report.order_id)?;
        write_report(out, &network, &report.order_id, &report.payment)?;
        if report.cancelled {
            writeln!(out, "order {} cancelled", report.order_id)?;
        }
        outcome(&report.payment.result)
    }

    /// Records a user-supplied transaction hash for an order.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if the hash is malformed or the backend refuses it.
    pub async fn confirm(&self, args: &ConfirmArgs, out: &mut Out) -> Result<(), CliError> {
        let order = OrderId::new(args.order.as_str());
        let ack = self.orchestrator.confirm_manually(&order, &args.hash).await?;
        if ack.applied {
            writeln!(out, "payment recorded for order {order}")?;
        } else {
            writeln!(out, "payment was already recorded for order {order}")?;
        }
        Ok(())
    }

    fn network(&self, name: Option<&str>) -> Result<&Network, CliError> {
        match name {
            Some(name) => self
                .registry
                .resolve(name)
                .ok_or_else(|| CliError::UnknownNetwork(name.to_owned())),
            None => self.default_network.as_ref().ok_or(CliError::NoNetworks),
        }
    }

    fn handle(&self, name: Option<&str>) -> Result<ProviderHandle, CliError> {
        let handles = locate_providers(&self.wallets);
        match name {
            Some(name) => {
                let id = self
                    .wallets
                    .by_name(name)
                    .map(|wallet| wallet.injected.id())
                    .ok_or_else(|| CliError::UnknownWallet(name.to_owned()))?;
                handles
                    .into_iter()
                    .find(|handle| handle.id() == id)
                    .ok_or_else(|| CliError::UnknownWallet(name.to_owned()))
            }
            None => handles.into_iter().next().ok_or(CliError::NoWallet),
        }
    }

    async fn connect(&self, args: &WalletArgs) -> Result<(ConnectionSession, Address), CliError> {
        let handle = self.handle(args.wallet.as_deref())?;
        tracing::info!(vendor = %handle.vendor(), "Connecting wallet");
        let session = ConnectionSession::new(handle);
        let account = session.connect().await?;
        Ok((session, args.from.unwrap_or(account)))
    }
}

fn amount_wei(amount: &str, network: &Network) -> Result<U256, CliError> {
    Ok(NativeAmount::parse(amount)?.to_wei(network.native_decimals)?)
}

fn outcome(result: &PaymentResult) -> Result<(), CliError> {
    match result.kind() {
        None => Ok(()),
        Some(kind) => Err(CliError::NotConfirmed(kind.code())),
    }
}

fn write_report(
    out: &mut Out,
    network: &Network,
    order: &OrderId,
    report: &PaymentReport,
) -> io::Result<()> {
    for attempt in &report.attempts {
        write!(out, "attempt {}: {:?}", attempt.attempt_number, attempt.status)?;
        if let Some(gas) = attempt.gas_limit {
            write!(out, " gas_limit={gas}")?;
        }
        if let Some(hash) = attempt.hash {
            write!(out, " tx={hash}")?;
        }
        if let Some(error) = &attempt.error {
            write!(out, " error=\"{error}\"")?;
        }
        writeln!(out)?;
    }

    let kind = report.result.kind();
    match kind {
        None => writeln!(out, "payment confirmed")?,
        Some(kind) => writeln!(out, "{}: {}", kind.code(), kind.user_message())?,
    }
    if let Some(hash) = report.result.tx_hash() {
        writeln!(out, "transaction: {}", network.explorer_tx_url(hash))?;
        if kind.is_some_and(FailureKind::requires_manual_path) {
            writeln!(
                out,
                "once the transaction is visible, run: nftpay confirm --order {order} --hash {hash}"
            )?;
        }
    }
    Ok(())
}
