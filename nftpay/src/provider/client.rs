//! Typed, dialect-aware calls over a located provider.
//!
//! [`ProviderClient`] turns the untyped call surface of a [`WalletTransport`]
//! into the handful of operations the payment flow needs. It picks the call
//! shape from the handle's [`Capabilities`]: the modern `request` dialect when
//! available, the legacy `enable`/`send` pair otherwise.
//!
//! [`WalletTransport`]: super::WalletTransport
//! [`Capabilities`]: super::Capabilities

use alloy_primitives::{Address, TxHash, U256};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use super::{Capability, ProviderError, ProviderHandle};
use crate::networks::Network;

/// A native-currency transfer to be estimated or signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Paying account.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount in wei.
    pub value: U256,
    /// Optional gas limit.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_quantity_opt"
    )]
    pub gas: Option<u64>,
}

impl TransferRequest {
    /// Creates a transfer without a gas limit.
    #[must_use]
    pub const fn new(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            to,
            value,
            gas: None,
        }
    }
}

/// Native currency metadata supplied when registering a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    /// Currency name.
    pub name: String,
    /// Currency symbol.
    pub symbol: String,
    /// Currency decimals.
    pub decimals: u8,
}

/// Parameter of a chain-registration request (EIP-3085).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameter {
    /// Chain ID as a hex quantity.
    pub chain_id: String,
    /// Display name.
    pub chain_name: String,
    /// Native currency metadata.
    pub native_currency: NativeCurrency,
    /// RPC endpoints.
    pub rpc_urls: Vec<String>,
    /// Block explorer endpoints.
    pub block_explorer_urls: Vec<String>,
}

impl From<&Network> for AddChainParameter {
    fn from(network: &Network) -> Self {
        Self {
            chain_id: network.chain_id_hex(),
            chain_name: network.display_name.clone(),
            native_currency: NativeCurrency {
                name: network.native_symbol.clone(),
                symbol: network.native_symbol.clone(),
                decimals: network.native_decimals,
            },
            rpc_urls: vec![network.rpc_url.clone()],
            block_explorer_urls: vec![network.explorer_url.clone()],
        }
    }
}

/// The parts of a transaction receipt the payment flow looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Transaction hash.
    pub transaction_hash: TxHash,
    /// Block the transaction was included in, once included.
    pub block_number: Option<u64>,
    /// Execution status; `None` on chains that predate status codes.
    pub status: Option<bool>,
}

impl ReceiptSummary {
    /// Returns `true` if the transaction is included in a block.
    #[must_use]
    pub const fn is_included(&self) -> bool {
        self.block_number.is_some()
    }

    /// Returns `true` unless the receipt reports a revert.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.unwrap_or(true)
    }

    /// Parses a JSON receipt object.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Decode`] if required fields are missing or malformed.
    pub fn from_json(value: &Value) -> Result<Self, ProviderError> {
        let transaction_hash = value
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Decode("receipt without transactionHash".into()))?
            .parse::<TxHash>()
            .map_err(|e| ProviderError::Decode(format!("receipt transactionHash: {e}")))?;
        let block_number = match value.get("blockNumber") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_quantity(raw)?),
        };
        let status = match value.get("status") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_quantity(raw)? == 1),
        };
        Ok(Self {
            transaction_hash,
            block_number,
            status,
        })
    }
}

/// Dialect-aware RPC client borrowed from a [`ProviderHandle`].
#[derive(Debug, Clone, Copy)]
pub struct ProviderClient<'a> {
    handle: &'a ProviderHandle,
}

impl<'a> ProviderClient<'a> {
    /// Creates a client for a handle.
    #[must_use]
    pub const fn new(handle: &'a ProviderHandle) -> Self {
        Self { handle }
    }

    /// Issues a call in whichever dialect the provider speaks.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or [`ProviderError::Unsupported`] if the
    /// provider speaks neither dialect.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let caps = self.handle.capabilities();
        let transport = self.handle.transport();
        if caps.contains(Capability::RequestRpc) {
            transport.request(method, params).await
        } else if caps.contains(Capability::LegacyEnable) {
            transport.send_legacy(method, params).await
        } else {
            Err(ProviderError::Unsupported("rpc"))
        }
    }

    /// Asks the wallet to expose its accounts, prompting the user if needed.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, e.g. a user rejection.
    pub async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let caps = self.handle.capabilities();
        let raw = if caps.contains(Capability::RequestRpc) {
            self.handle
                .transport()
                .request("eth_requestAccounts", json!([]))
                .await?
        } else if caps.contains(Capability::LegacyEnable) {
            self.handle.transport().enable().await?
        } else {
            return Err(ProviderError::Unsupported("account request"));
        };
        parse_addresses(&raw)
    }

    /// Returns the chain the wallet is currently on.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or a decode error.
    pub async fn chain_id(&self) -> Result<u64, ProviderError> {
        let raw = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&raw)
    }

    /// Asks the wallet to switch to `chain_id`. Modern dialect only.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; an unknown chain is reported with code 4902.
    pub async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        self.modern_only("wallet_switchEthereumChain")?;
        self.handle
            .transport()
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": format!("{chain_id:#x}") }]),
            )
            .await
            .map(drop)
    }

    /// Asks the wallet to register a chain. Modern dialect only.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    pub async fn add_chain(&self, chain: &AddChainParameter) -> Result<(), ProviderError> {
        self.modern_only("wallet_addEthereumChain")?;
        let param =
            serde_json::to_value(chain).map_err(|e| ProviderError::Decode(e.to_string()))?;
        self.handle
            .transport()
            .request("wallet_addEthereumChain", Value::Array(vec![param]))
            .await
            .map(drop)
    }

    /// Estimates the gas a transfer will use.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or a decode error.
    pub async fn estimate_gas(&self, tx: &TransferRequest) -> Result<u64, ProviderError> {
        let raw = self
            .call("eth_estimateGas", json!([tx_to_value(tx)?]))
            .await?;
        parse_quantity(&raw)
    }

    /// Asks the wallet to sign and send a transfer.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, e.g. a user rejection.
    pub async fn send_transaction(&self, tx: &TransferRequest) -> Result<TxHash, ProviderError> {
        let raw = self
            .call("eth_sendTransaction", json!([tx_to_value(tx)?]))
            .await?;
        raw.as_str()
            .ok_or_else(|| ProviderError::Decode("eth_sendTransaction must return a hash".into()))?
            .parse::<TxHash>()
            .map_err(|e| ProviderError::Decode(format!("invalid transaction hash: {e}")))
    }

    /// Fetches a transaction receipt, `None` while the transaction is unknown or pending.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or a decode error.
    pub async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, ProviderError> {
        let raw = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        ReceiptSummary::from_json(&raw).map(Some)
    }

    fn modern_only(&self, method: &'static str) -> Result<(), ProviderError> {
        if self.handle.capabilities().contains(Capability::RequestRpc) {
            Ok(())
        } else {
            Err(ProviderError::Unsupported(method))
        }
    }
}

fn tx_to_value(tx: &TransferRequest) -> Result<Value, ProviderError> {
    serde_json::to_value(tx).map_err(|e| ProviderError::Decode(e.to_string()))
}

#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn serialize_quantity_opt<S: Serializer>(value: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.serialize_str(&format!("{v:#x}")),
        None => s.serialize_none(),
    }
}

/// Parses a JSON-RPC quantity.
///
/// Accepts `0x`-prefixed hex strings, decimal strings (some legacy providers
/// return `net_version`-style chain IDs) and plain JSON numbers.
///
/// # Errors
///
/// Returns [`ProviderError::Decode`] for any other shape.
pub fn parse_quantity(value: &Value) -> Result<u64, ProviderError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ProviderError::Decode(format!("quantity out of range: {n}"))),
        Value::String(s) => {
            let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
            {
                u64::from_str_radix(hex, 16)
            } else {
                s.parse::<u64>()
            };
            parsed.map_err(|e| ProviderError::Decode(format!("invalid quantity {s:?}: {e}")))
        }
        other => Err(ProviderError::Decode(format!(
            "expected quantity, got {other}"
        ))),
    }
}

fn parse_addresses(value: &Value) -> Result<Vec<Address>, ProviderError> {
    let items = value
        .as_array()
        .ok_or_else(|| ProviderError::Decode("account list must be an array".into()))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| ProviderError::Decode("account must be a string".into()))?
                .parse::<Address>()
                .map_err(|e| ProviderError::Decode(format!("invalid account: {e}")))
        })
        .collect()
}
