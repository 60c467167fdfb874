//! Chain negotiation against a wallet provider.
//!
//! Before a payment can be signed the wallet must be on the payment's chain.
//! [`ChainNegotiator::ensure_network`] queries the active chain, asks the
//! wallet to switch when it differs, and registers the chain first when the
//! wallet does not know it. Every path ends in a tagged [`Outcome`].
//!
//! Wallets show one switch prompt at a time, so negotiations against the same
//! provider object are serialised: a second call queues behind the first.
//! Calls against different providers proceed concurrently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::networks::Network;
use crate::provider::{
    AddChainParameter, Capability, ErrorClass, ProviderError, ProviderHandle, ProviderId, codes,
};

/// Default pause after a successful switch before the provider is used again.
pub const DEFAULT_SETTLE_INTERVAL_MS: u64 = 1000;

const fn default_settle_interval_ms() -> u64 {
    DEFAULT_SETTLE_INTERVAL_MS
}

/// Configuration of the [`ChainNegotiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatorConfig {
    /// Pause after a successful switch or registration, in milliseconds.
    ///
    /// Some wallets report the new chain before their internal RPC client has
    /// followed, so requests issued immediately after a switch may still reach
    /// the old chain.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            settle_interval_ms: DEFAULT_SETTLE_INTERVAL_MS,
        }
    }
}

impl NegotiatorConfig {
    /// Returns the settle interval.
    #[must_use]
    pub const fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}

/// Result of a chain negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The wallet was already on the target chain; nothing was prompted.
    AlreadyOnTarget,
    /// The wallet switched to the target chain.
    Switched,
    /// The wallet did not know the chain; it was registered and activated.
    AddedAndSwitched,
    /// The user declined the switch or registration prompt.
    RejectedByUser,
    /// The provider cannot switch chains programmatically.
    UnsupportedProvider,
    /// The negotiation failed with a provider error.
    Failed(ProviderError),
}

impl Outcome {
    /// Returns `true` if the wallet is on the target chain afterwards.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOnTarget | Self::Switched | Self::AddedAndSwitched
        )
    }
}

/// Switches and registers chains, one negotiation per provider at a time.
#[derive(Debug, Default)]
pub struct ChainNegotiator {
    config: NegotiatorConfig,
    locks: DashMap<ProviderId, Arc<Mutex<()>>>,
}

impl ChainNegotiator {
    /// Creates a negotiator.
    #[must_use]
    pub fn new(config: NegotiatorConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    /// Ensures the provider is on `network`.
    ///
    /// A user rejection is terminal and reported as [`Outcome::RejectedByUser`];
    /// it is never retried here.
    pub async fn ensure_network(&self, handle: &ProviderHandle, network: &Network) -> Outcome {
        let id = handle.id();
        let lock = self.lock_for(id);
        let outcome = {
            let _guard = lock.lock().await;
            traced!(
                self.negotiate(handle, network),
                tracing::info_span!("ensure_network", chain_id = network.chain_id, vendor = %handle.vendor())
            )
        };
        drop(lock);
        // only the map's own reference left means nobody is queued on it
        self.locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    fn lock_for(&self, id: ProviderId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    async fn negotiate(&self, handle: &ProviderHandle, network: &Network) -> Outcome {
        let client = handle.client();
        let current = match client.chain_id().await {
            Ok(current) => current,
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %e, "failed to query active chain");
                return Outcome::Failed(e);
            }
        };
        if current == network.chain_id {
            return Outcome::AlreadyOnTarget;
        }
        if !handle.capabilities().contains(Capability::RequestRpc) {
            #[cfg(feature = "telemetry")]
            tracing::info!(current, "legacy provider cannot switch chains");
            return Outcome::UnsupportedProvider;
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(current, target = network.chain_id, "requesting chain switch");

        let outcome = match client.switch_chain(network.chain_id).await {
            Ok(()) => Outcome::Switched,
            Err(e) => match e.classify() {
                ErrorClass::UserRejected => Outcome::RejectedByUser,
                ErrorClass::UnrecognizedChain => {
                    #[cfg(feature = "telemetry")]
                    tracing::info!(target = network.chain_id, "chain unknown to wallet, registering");
                    match client.add_chain(&AddChainParameter::from(network)).await {
                        Ok(()) => Outcome::AddedAndSwitched,
                        Err(e) => failure_outcome(e),
                    }
                }
                _ => failure_outcome(e),
            },
        };

        if outcome.is_success() {
            tokio::time::sleep(self.config.settle_interval()).await;
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(?outcome, "chain negotiation finished");

        outcome
    }
}

fn failure_outcome(error: ProviderError) -> Outcome {
    match error.classify() {
        ErrorClass::UserRejected => Outcome::RejectedByUser,
        _ if error.code() == Some(codes::UNSUPPORTED_METHOD) => Outcome::UnsupportedProvider,
        _ => Outcome::Failed(error),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::json;

    use super::*;
    use crate::mock::{MockWallet, handle};
    use crate::networks::NetworkRegistry;

    fn negotiator() -> ChainNegotiator {
        ChainNegotiator::new(NegotiatorConfig {
            settle_interval_ms: 0,
        })
    }

    fn poly() -> Network {
        NetworkRegistry::builtin()
            .find_by_slug("poly")
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_already_on_target_makes_no_switch_calls() {
        let negotiator = negotiator();
        for network in NetworkRegistry::builtin().list_networks() {
            let wallet = Arc::new(MockWallet::new(network.chain_id));
            let outcome = negotiator.ensure_network(&handle(&wallet), network).await;
            assert_eq!(outcome, Outcome::AlreadyOnTarget, "{}", network.display_name);
            assert_eq!(wallet.calls(), vec!["eth_chainId"], "{}", network.display_name);
        }
    }

    #[tokio::test]
    async fn test_switches_known_chain() {
        let wallet = Arc::new(MockWallet::new(1).with_known_chain(137));
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::Switched);
        assert_eq!(wallet.chain_id(), 137);
        assert_eq!(
            wallet.params_of("wallet_switchEthereumChain"),
            vec![json!([{ "chainId": "0x89" }])]
        );
        assert_eq!(wallet.calls_to("wallet_addEthereumChain"), 0);
    }

    #[tokio::test]
    async fn test_unknown_chain_is_added_with_full_metadata() {
        let wallet = Arc::new(MockWallet::new(1));
        let network = poly();
        let outcome = negotiator().ensure_network(&handle(&wallet), &network).await;
        assert_eq!(outcome, Outcome::AddedAndSwitched);
        assert_eq!(wallet.chain_id(), 137);

        let params = wallet.params_of("wallet_addEthereumChain");
        assert_eq!(params.len(), 1);
        let added = &params[0][0];
        assert_eq!(added["chainId"], json!("0x89"));
        assert_eq!(added["chainName"], json!(network.display_name));
        assert_eq!(added["nativeCurrency"]["symbol"], json!("MATIC"));
        assert_eq!(added["nativeCurrency"]["decimals"], json!(18));
        assert_eq!(added["rpcUrls"], json!([network.rpc_url]));
        assert_eq!(added["blockExplorerUrls"], json!([network.explorer_url]));
    }

    #[tokio::test]
    async fn test_nested_unrecognized_chain_triggers_add() {
        let wallet = Arc::new(MockWallet::new(1));
        wallet.script(
            "wallet_switchEthereumChain",
            Err(ProviderError::Rpc {
                code: codes::INTERNAL_ERROR,
                message: "Internal JSON-RPC error.".into(),
                data: Some(json!({ "originalError": { "code": 4902 } })),
            }),
        );
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::AddedAndSwitched);
    }

    #[tokio::test]
    async fn test_user_rejection_of_switch_or_add() {
        let wallet = Arc::new(MockWallet::new(1).with_known_chain(137));
        wallet.script(
            "wallet_switchEthereumChain",
            Err(ProviderError::rpc(codes::USER_REJECTED, "User rejected")),
        );
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::RejectedByUser);
        assert_eq!(wallet.chain_id(), 1);

        let wallet = Arc::new(MockWallet::new(1));
        wallet.script(
            "wallet_addEthereumChain",
            Err(ProviderError::rpc(codes::USER_REJECTED, "User rejected")),
        );
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::RejectedByUser);
        assert_eq!(wallet.calls_to("wallet_switchEthereumChain"), 1);
    }

    #[tokio::test]
    async fn test_legacy_provider_is_unsupported() {
        let wallet = Arc::new(MockWallet::legacy(1));
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::UnsupportedProvider);
        assert_eq!(wallet.calls(), vec!["eth_chainId"]);
    }

    #[tokio::test]
    async fn test_other_errors_fail_with_raw_reason() {
        let wallet = Arc::new(MockWallet::new(1));
        let err = ProviderError::rpc(codes::REQUEST_PENDING, "already pending");
        wallet.script("wallet_switchEthereumChain", Err(err.clone()));
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::Failed(err));

        let wallet = Arc::new(MockWallet::new(1));
        wallet.script("eth_chainId", Err(ProviderError::Timeout));
        let outcome = negotiator().ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::Failed(ProviderError::Timeout));
    }

    #[tokio::test]
    async fn test_settle_interval_applied_after_switch() {
        let wallet = Arc::new(MockWallet::new(1).with_known_chain(137));
        let negotiator = ChainNegotiator::new(NegotiatorConfig {
            settle_interval_ms: 50,
        });
        let started = Instant::now();
        let outcome = negotiator.ensure_network(&handle(&wallet), &poly()).await;
        assert_eq!(outcome, Outcome::Switched);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_concurrent_negotiations_on_one_provider_never_overlap() {
        let wallet = Arc::new(
            MockWallet::new(1)
                .with_known_chain(137)
                .with_delay("eth_chainId", Duration::from_millis(20))
                .with_delay("wallet_switchEthereumChain", Duration::from_millis(20)),
        );
        let negotiator = negotiator();
        let first = handle(&wallet);
        let second = handle(&wallet);
        let network = poly();
        let (a, b) = tokio::join!(
            negotiator.ensure_network(&first, &network),
            negotiator.ensure_network(&second, &network),
        );
        assert_eq!(wallet.max_in_flight(), 1);
        assert_eq!(a, Outcome::Switched);
        assert_eq!(b, Outcome::AlreadyOnTarget);
        assert_eq!(wallet.calls_to("wallet_switchEthereumChain"), 1);
        assert!(negotiator.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_negotiation() {
        let negotiator = negotiator();
        let network = poly();
        for _ in 0..3 {
            let wallet = Arc::new(MockWallet::new(1).with_known_chain(137));
            assert!(negotiator.ensure_network(&handle(&wallet), &network).await.is_success());
            assert!(negotiator.locks.is_empty());
        }
    }

    #[tokio::test]
    async fn test_different_providers_negotiate_concurrently() {
        let slow = |chain| {
            Arc::new(
                MockWallet::new(chain)
                    .with_delay("eth_chainId", Duration::from_millis(100)),
            )
        };
        let first = slow(137);
        let second = slow(137);
        let negotiator = negotiator();
        let network = poly();
        let (first, second) = (handle(&first), handle(&second));
        let started = Instant::now();
        let (a, b) = tokio::join!(
            negotiator.ensure_network(&first, &network),
            negotiator.ensure_network(&second, &network),
        );
        assert!(a.is_success() && b.is_success());
        assert!(negotiator.locks.is_empty());
        assert!(started.elapsed() < Duration::from_millis(190));
    }
}
