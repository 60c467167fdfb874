//! Builds the wallets the storefront can see from configuration.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nftpay::NetworkRegistry;
use nftpay::provider::{HostEnvironment, InjectedProvider};
use nftpay_evm::{ApprovalRequest, Approver, SignerWallet};
use nftpay_http::BridgeTransport;
use url::Url;

use crate::config::{WalletBackend, WalletConfig};
use crate::error::CliError;

/// Asks on the terminal before every wallet prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleApprover;

#[async_trait]
impl Approver for ConsoleApprover {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        let prompt = format!("approve: {request}? [y/N] ");
        tokio::task::spawn_blocking(move || {
            let mut stderr = io::stderr();
            if stderr
                .write_all(prompt.as_bytes())
                .and_then(|()| stderr.flush())
                .is_err()
            {
                return false;
            }
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer).is_ok()
                && matches!(answer.trim(), "y" | "Y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

/// A configured wallet and the provider object it injects.
#[derive(Debug, Clone)]
pub struct ConfiguredWallet {
    /// Name from the configuration.
    pub name: String,
    /// Injected provider object.
    pub injected: InjectedProvider,
}

/// The configured wallets, exposed in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Wallets(Vec<ConfiguredWallet>);

impl Wallets {
    /// Builds every configured wallet.
    ///
    /// Signer wallets whose key is empty or still an unresolved `$VAR`
    /// reference are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if a wallet's key, chain or URL is invalid.
    pub fn build(
        configs: &[WalletConfig],
        registry: &NetworkRegistry,
        default_chain: Option<u64>,
        approver: &Arc<dyn Approver>,
    ) -> Result<Self, CliError> {
        let mut wallets = Vec::with_capacity(configs.len());
        for config in configs {
            let transport: Arc<dyn nftpay::WalletTransport> = match &config.backend {
                WalletBackend::Signer { private_key, chain } => {
                    let key = private_key.trim();
                    if key.is_empty() || key.starts_with('$') {
                        tracing::warn!(
                            wallet = %config.name,
                            "Skipping wallet: private_key not resolved (missing env var?)"
                        );
                        continue;
                    }
                    let chain_id = match chain {
                        Some(chain) => {
                            registry
                                .resolve(chain)
                                .ok_or_else(|| CliError::UnknownNetwork(chain.clone()))?
                                .chain_id
                        }
                        None => default_chain.ok_or(CliError::NoNetworks)?,
                    };
                    let wallet = SignerWallet::from_private_key(
                        key,
                        Arc::clone(approver),
                        registry.list_networks(),
                        chain_id,
                    )
                    .map_err(|e| CliError::Wallet {
                        name: config.name.clone(),
                        source: e,
                    })?;
                    tracing::info!(wallet = %config.name, address = %wallet.address(), chain_id, "Configured signer wallet");
                    Arc::new(wallet)
                }
                WalletBackend::Bridge { url, timeout_ms } => {
                    let url = Url::parse(url).map_err(|e| CliError::InvalidUrl {
                        context: "wallet bridge",
                        source: e,
                    })?;
                    tracing::info!(wallet = %config.name, %url, "Configured bridge wallet");
                    let bridge = BridgeTransport::new(url);
                    Arc::new(match timeout_ms {
                        Some(ms) => bridge.with_timeout(Duration::from_millis(*ms)),
                        None => bridge,
                    })
                }
            };
            wallets.push(ConfiguredWallet {
                name: config.name.clone(),
                injected: InjectedProvider::new(config.flags.iter(), transport),
            });
        }
        Ok(Self(wallets))
    }

    /// Returns the wallet configured under `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ConfiguredWallet> {
        self.0.iter().find(|wallet| wallet.name == name)
    }

    /// Returns the wallets in configuration order.
    #[must_use]
    pub fn as_slice(&self) -> &[ConfiguredWallet] {
        &self.0
    }
}

impl HostEnvironment for Wallets {
    fn injected_providers(&self) -> Vec<InjectedProvider> {
        self.0.iter().map(|wallet| wallet.injected.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use nftpay::provider::{VendorTag, locate_providers};
    use nftpay_evm::AutoApprove;

    use super::*;

    fn bridge(name: &str, flags: &[&str]) -> WalletConfig {
        WalletConfig {
            name: name.into(),
            flags: flags.iter().map(|flag| (*flag).to_owned()).collect(),
            backend: WalletBackend::Bridge {
                url: "http://127.0.0.1:9/rpc".into(),
                timeout_ms: None,
            },
        }
    }

    fn approver() -> Arc<dyn Approver> {
        Arc::new(AutoApprove)
    }

    #[test]
    fn test_wallets_are_ranked_by_vendor() {
        let wallets = Wallets::build(
            &[
                bridge("plain", &[]),
                bridge("coinbase", &["isCoinbaseWallet"]),
                bridge("metamask", &["isMetaMask"]),
            ],
            &NetworkRegistry::builtin(),
            Some(1),
            &approver(),
        )
        .unwrap();

        let handles = locate_providers(&wallets);
        let vendors: Vec<VendorTag> = handles.iter().map(|h| h.vendor()).collect();
        assert_eq!(
            vendors,
            vec![
                VendorTag::MetaMaskLike,
                VendorTag::CoinbaseLike,
                VendorTag::Generic
            ]
        );
        assert_eq!(
            wallets.by_name("coinbase").unwrap().injected.id(),
            handles[1].id()
        );
    }

    #[test]
    fn test_unresolved_signer_key_is_skipped() {
        let configs = [
            WalletConfig {
                name: "hot".into(),
                flags: vec![],
                backend: WalletBackend::Signer {
                    private_key: "$NFTPAY_SIGNER_KEY".into(),
                    chain: None,
                },
            },
            bridge("phone", &[]),
        ];
        let wallets =
            Wallets::build(&configs, &NetworkRegistry::builtin(), Some(1), &approver()).unwrap();
        assert_eq!(wallets.as_slice().len(), 1);
        assert!(wallets.by_name("hot").is_none());
    }

    #[test]
    fn test_signer_with_unknown_chain_fails() {
        let configs = [WalletConfig {
            name: "hot".into(),
            flags: vec![],
            backend: WalletBackend::Signer {
                private_key: "0x0101010101010101010101010101010101010101010101010101010101010101"
                    .into(),
                chain: Some("nowhere".into()),
            },
        }];
        let err = Wallets::build(&configs, &NetworkRegistry::builtin(), Some(1), &approver())
            .unwrap_err();
        assert!(matches!(err, CliError::UnknownNetwork(name) if name == "nowhere"));
    }

    #[test]
    fn test_invalid_bridge_url_fails() {
        let mut config = bridge("phone", &[]);
        config.backend = WalletBackend::Bridge {
            url: "not a url".into(),
            timeout_ms: None,
        };
        let err = Wallets::build(&[config], &NetworkRegistry::builtin(), Some(1), &approver())
            .unwrap_err();
        assert!(matches!(err, CliError::InvalidUrl { .. }));
    }
}
