//! [`SignerWallet`]: an EIP-1193 wallet over a local key and per-chain alloy providers.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::{LocalSignerError, PrivateKeySigner};
use alloy_transport::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use nftpay::networks::Network;
use nftpay::provider::{
    EventListener, ListenerId, ProviderError, ProviderEvent, WalletTransport, codes,
    parse_quantity,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::approval::{ApprovalRequest, Approver};

/// JSON-RPC code for malformed parameters.
const INVALID_PARAMS: i64 = -32602;

/// Errors raised while building a [`SignerWallet`].
#[derive(Debug, thiserror::Error)]
pub enum SignerWalletError {
    /// The private key could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(#[from] LocalSignerError),
    /// A network's RPC endpoint is not a valid URL.
    #[error("invalid RPC URL for chain {chain_id}: {source}")]
    InvalidRpcUrl {
        /// Chain whose endpoint failed to parse.
        chain_id: u64,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The initial chain is not among the wallet's networks.
    #[error("chain {0} is not among the wallet's networks")]
    UnknownChain(u64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChainRequest {
    chain_id: String,
    chain_name: String,
    #[serde(default)]
    rpc_urls: Vec<String>,
}

/// A wallet that signs with a local private key.
///
/// Each known chain has its own alloy provider with the recommended fillers
/// (nonce, gas, chain ID) and the signer attached. Requests the wallet does
/// not handle itself are forwarded to the active chain's node.
pub struct SignerWallet {
    address: Address,
    wallet: EthereumWallet,
    chains: DashMap<u64, DynProvider>,
    active: Mutex<u64>,
    approver: Arc<dyn Approver>,
    listeners: Mutex<Vec<(ListenerId, EventListener)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for SignerWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerWallet")
            .field("address", &self.address)
            .field("active", &*self.active.lock())
            .field("chains", &self.chains.len())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl SignerWallet {
    /// Creates a wallet that knows `networks` and starts on `active_chain`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerWalletError`] if an RPC URL is invalid or `active_chain`
    /// is not among `networks`.
    pub fn new(
        signer: PrivateKeySigner,
        approver: Arc<dyn Approver>,
        networks: &[Network],
        active_chain: u64,
    ) -> Result<Self, SignerWalletError> {
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let chains = DashMap::new();
        for network in networks {
            let url = Url::parse(&network.rpc_url).map_err(|e| {
                SignerWalletError::InvalidRpcUrl {
                    chain_id: network.chain_id,
                    source: e,
                }
            })?;
            chains.insert(network.chain_id, connect(&wallet, url));
        }
        if !chains.contains_key(&active_chain) {
            return Err(SignerWalletError::UnknownChain(active_chain));
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(%address, chains = chains.len(), active_chain, "signer wallet ready");

        Ok(Self {
            address,
            wallet,
            chains,
            active: Mutex::new(active_chain),
            approver,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    /// Creates a wallet from a hex-encoded private key, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerWalletError`] if the key cannot be parsed or
    /// [`SignerWallet::new`] fails.
    pub fn from_private_key(
        key: &str,
        approver: Arc<dyn Approver>,
        networks: &[Network],
        active_chain: u64,
    ) -> Result<Self, SignerWalletError> {
        let signer: PrivateKeySigner = key.trim().parse()?;
        Self::new(signer, approver, networks, active_chain)
    }

    /// Returns the signing account.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Returns the active chain.
    #[must_use]
    pub fn active_chain_id(&self) -> u64 {
        *self.active.lock()
    }

    /// Returns `true` if the wallet can switch to `chain_id` without registering it.
    #[must_use]
    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    async fn approve(&self, request: ApprovalRequest) -> Result<(), ProviderError> {
        if self.approver.approve(&request).await {
            Ok(())
        } else {
            #[cfg(feature = "telemetry")]
            tracing::info!(%request, "prompt declined");
            Err(ProviderError::rpc(
                codes::USER_REJECTED,
                "User rejected the request.",
            ))
        }
    }

    fn provider(&self, chain_id: u64) -> Result<DynProvider, ProviderError> {
        self.chains
            .get(&chain_id)
            .map(|provider| provider.value().clone())
            .ok_or_else(|| {
                ProviderError::rpc(
                    codes::CHAIN_DISCONNECTED,
                    format!("no connection to chain {chain_id}"),
                )
            })
    }

    fn activate(&self, chain_id: u64) {
        let changed = {
            let mut active = self.active.lock();
            let changed = *active != chain_id;
            *active = chain_id;
            changed
        };
        if changed {
            self.emit(&ProviderEvent::ChainChanged(chain_id));
        }
    }

    fn emit(&self, event: &ProviderEvent) {
        let listeners: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    async fn switch_chain(&self, params: &Value) -> Result<Value, ProviderError> {
        let chain_id = first_param(params)?
            .get("chainId")
            .ok_or_else(|| invalid_params("missing chainId"))
            .and_then(parse_quantity)?;
        if !self.knows_chain(chain_id) {
            return Err(ProviderError::rpc(
                codes::UNRECOGNIZED_CHAIN,
                format!("Unrecognized chain ID {chain_id:#x}. Try adding the chain using wallet_addEthereumChain first."),
            ));
        }
        if chain_id != self.active_chain_id() {
            self.approve(ApprovalRequest::SwitchChain { chain_id }).await?;
            self.activate(chain_id);
        }
        Ok(Value::Null)
    }

    async fn add_chain(&self, params: &Value) -> Result<Value, ProviderError> {
        let request: AddChainRequest = serde_json::from_value(first_param(params)?.clone())
            .map_err(|e| invalid_params(e.to_string()))?;
        let chain_id = parse_quantity(&Value::String(request.chain_id))?;
        let url = request
            .rpc_urls
            .first()
            .ok_or_else(|| invalid_params("rpcUrls must not be empty"))
            .and_then(|raw| Url::parse(raw).map_err(|e| invalid_params(e.to_string())))?;

        self.approve(ApprovalRequest::AddChain {
            chain_id,
            chain_name: request.chain_name,
        })
        .await?;

        self.chains
            .entry(chain_id)
            .or_insert_with(|| connect(&self.wallet, url));
        self.activate(chain_id);
        Ok(Value::Null)
    }

    async fn send_transaction(&self, params: &Value) -> Result<Value, ProviderError> {
        let tx: TransactionRequest = serde_json::from_value(first_param(params)?.clone())
            .map_err(|e| invalid_params(e.to_string()))?;
        if tx.from.is_some_and(|from| from != self.address) {
            return Err(ProviderError::rpc(
                codes::UNAUTHORIZED,
                "The requested account has not been authorized by the user.",
            ));
        }

        let chain_id = self.active_chain_id();
        self.approve(ApprovalRequest::SendTransaction {
            chain_id,
            to: tx.to.and_then(|kind| kind.to().copied()),
            value: tx.value.unwrap_or_default(),
            gas: tx.gas,
        })
        .await?;

        let tx = tx.with_from(self.address).with_chain_id(chain_id);
        let pending = self
            .provider(chain_id)?
            .send_transaction(tx)
            .await
            .map_err(map_transport_error)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(chain_id, tx_hash = %pending.tx_hash(), "transaction broadcast");

        Ok(json!(pending.tx_hash()))
    }

    async fn forward(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let provider = self.provider(self.active_chain_id())?;
        let raw = serde_json::value::to_raw_value(&params)
            .map_err(|e| invalid_params(e.to_string()))?;
        let result = provider
            .raw_request_dyn(Cow::Owned(method.to_owned()), &raw)
            .await
            .map_err(map_transport_error)?;
        serde_json::from_str(result.get()).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl WalletTransport for SignerWallet {
    fn supports_request(&self) -> bool {
        true
    }

    fn supports_events(&self) -> bool {
        true
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        match method {
            "eth_requestAccounts" => {
                self.approve(ApprovalRequest::Connect {
                    account: self.address,
                })
                .await?;
                Ok(json!([self.address]))
            }
            "eth_accounts" => Ok(json!([self.address])),
            "eth_chainId" => Ok(json!(format!("{:#x}", self.active_chain_id()))),
            "wallet_switchEthereumChain" => self.switch_chain(&params).await,
            "wallet_addEthereumChain" => self.add_chain(&params).await,
            "eth_sendTransaction" => self.send_transaction(&params).await,
            _ => self.forward(method, params).await,
        }
    }

    fn on(&self, listener: EventListener) -> Result<ListenerId, ProviderError> {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        Ok(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

fn connect(wallet: &EthereumWallet, url: Url) -> DynProvider {
    ProviderBuilder::new()
        .wallet(wallet.clone())
        .connect_http(url)
        .erased()
}

fn first_param(params: &Value) -> Result<&Value, ProviderError> {
    params
        .get(0)
        .ok_or_else(|| invalid_params("expected a single parameter object"))
}

fn invalid_params(message: impl Into<String>) -> ProviderError {
    ProviderError::rpc(INVALID_PARAMS, message)
}

/// Keeps the node's JSON-RPC error object intact so callers can classify it.
fn map_transport_error(err: TransportError) -> ProviderError {
    match err.as_error_resp() {
        Some(payload) => ProviderError::Rpc {
            code: payload.code,
            message: payload.message.to_string(),
            data: payload
                .data
                .as_ref()
                .and_then(|data| serde_json::from_str(data.get()).ok()),
        },
        None => ProviderError::Transport(err.to_string()),
    }
}
