//! Supported blockchain networks.
//!
//! The storefront settles payments in the native currency of an EVM chain.
//! Every chain the storefront accepts is described by a [`Network`] and
//! registered once at startup in a [`NetworkRegistry`]. The registry is
//! read-only afterwards; lookups that miss return `None` and callers decide
//! whether to fall back to [`NetworkRegistry::default_network`] or report a
//! configuration error.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Ethereum Sepolia (testnet) chain ID.
pub const ETHEREUM_SEPOLIA: u64 = 11_155_111;

/// Polygon Mainnet chain ID.
pub const POLYGON_MAINNET: u64 = 137;

/// Polygon Amoy (testnet) chain ID.
pub const POLYGON_AMOY: u64 = 80_002;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84_532;

/// BNB Smart Chain chain ID.
pub const BSC_MAINNET: u64 = 56;

/// Avalanche C-Chain chain ID.
pub const AVALANCHE_MAINNET: u64 = 43_114;

/// Decimals used by the native currency of every EVM chain registered here.
pub const DEFAULT_NATIVE_DECIMALS: u8 = 18;

const fn default_native_decimals() -> u8 {
    DEFAULT_NATIVE_DECIMALS
}

/// Immutable descriptor of a supported chain.
///
/// Identity is the numeric `chain_id`: two descriptors with the same chain ID
/// compare equal regardless of their display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Network {
    /// Internal slug (e.g. `"poly"`).
    pub id: String,
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// Human-readable name shown in wallet prompts.
    pub display_name: String,
    /// Ticker of the native currency (e.g. `"MATIC"`).
    pub native_symbol: String,
    /// Decimals of the native currency.
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    /// Public JSON-RPC endpoint.
    pub rpc_url: String,
    /// Block explorer base URL.
    pub explorer_url: String,
}

impl Network {
    /// Creates a network descriptor with the default native decimals.
    pub fn new(
        id: impl Into<String>,
        chain_id: u64,
        display_name: impl Into<String>,
        native_symbol: impl Into<String>,
        rpc_url: impl Into<String>,
        explorer_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            chain_id,
            display_name: display_name.into(),
            native_symbol: native_symbol.into(),
            native_decimals: DEFAULT_NATIVE_DECIMALS,
            rpc_url: rpc_url.into(),
            explorer_url: explorer_url.into(),
        }
    }

    /// Returns the chain ID as an `0x`-prefixed hex quantity, the form wallets expect.
    #[must_use]
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    /// Returns the explorer page for a transaction hash.
    #[must_use]
    pub fn explorer_tx_url(&self, tx_hash: impl fmt::Display) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url.trim_end_matches('/'))
    }
}

impl PartialEq for Network {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id
    }
}

impl Eq for Network {}

impl Hash for Network {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain_id.hash(state);
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.chain_id)
    }
}

/// Registry of the networks the storefront accepts payments on.
///
/// # Example
///
/// ```rust
/// use nftpay::networks::{NetworkRegistry, POLYGON_MAINNET};
///
/// let registry = NetworkRegistry::builtin();
/// let polygon = registry.find_by_chain_id(POLYGON_MAINNET).unwrap();
/// assert_eq!(polygon.id, "poly");
/// assert!(registry.find_by_slug("unknown").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: Vec<Network>,
}

impl NetworkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            networks: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with the built-in networks.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            networks: builtin_networks(),
        }
    }

    /// Builder-style method: registers a network and returns `self`.
    ///
    /// A network whose chain ID is already registered replaces the existing entry
    /// in place, so configuration can override RPC or explorer endpoints.
    #[must_use]
    pub fn with_network(mut self, network: Network) -> Self {
        self.register(network);
        self
    }

    /// Registers a network, replacing any entry with the same chain ID.
    pub fn register(&mut self, network: Network) {
        match self
            .networks
            .iter_mut()
            .find(|n| n.chain_id == network.chain_id)
        {
            Some(existing) => *existing = network,
            None => self.networks.push(network),
        }
    }

    /// Returns all registered networks in registration order.
    #[must_use]
    pub fn list_networks(&self) -> &[Network] {
        &self.networks
    }

    /// Looks up a network by its EIP-155 chain ID.
    #[must_use]
    pub fn find_by_chain_id(&self, chain_id: u64) -> Option<&Network> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    /// Looks up a network by its slug.
    #[must_use]
    pub fn find_by_slug(&self, id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id == id)
    }

    /// Resolves user input that is either a slug or a decimal chain ID.
    #[must_use]
    pub fn resolve(&self, slug_or_chain_id: &str) -> Option<&Network> {
        self.find_by_slug(slug_or_chain_id).or_else(|| {
            slug_or_chain_id
                .parse::<u64>()
                .ok()
                .and_then(|chain_id| self.find_by_chain_id(chain_id))
        })
    }

    /// Returns the fallback network: the first one registered.
    #[must_use]
    pub fn default_network(&self) -> Option<&Network> {
        self.networks.first()
    }

    /// Returns the number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns `true` if no networks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

fn builtin_networks() -> Vec<Network> {
    vec![
        Network::new(
            "ethereum",
            ETHEREUM_MAINNET,
            "Ethereum Mainnet",
            "ETH",
            "https://eth.llamarpc.com",
            "https://etherscan.io",
        ),
        Network::new(
            "poly",
            POLYGON_MAINNET,
            "Polygon Mainnet",
            "MATIC",
            "https://polygon-rpc.com",
            "https://polygonscan.com",
        ),
        Network::new(
            "poly-amoy",
            POLYGON_AMOY,
            "Polygon Amoy Testnet",
            "POL",
            "https://rpc-amoy.polygon.technology",
            "https://amoy.polygonscan.com",
        ),
        Network::new(
            "base",
            BASE_MAINNET,
            "Base",
            "ETH",
            "https://mainnet.base.org",
            "https://basescan.org",
        ),
        Network::new(
            "base-sepolia",
            BASE_SEPOLIA,
            "Base Sepolia",
            "ETH",
            "https://sepolia.base.org",
            "https://sepolia.basescan.org",
        ),
        Network::new(
            "sepolia",
            ETHEREUM_SEPOLIA,
            "Sepolia",
            "ETH",
            "https://rpc.sepolia.org",
            "https://sepolia.etherscan.io",
        ),
        Network::new(
            "bsc",
            BSC_MAINNET,
            "BNB Smart Chain",
            "BNB",
            "https://bsc-dataseed.binance.org",
            "https://bscscan.com",
        ),
        Network::new(
            "avalanche",
            AVALANCHE_MAINNET,
            "Avalanche C-Chain",
            "AVAX",
            "https://api.avax.network/ext/bc/C/rpc",
            "https://snowtrace.io",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly() -> Network {
        Network::new(
            "poly",
            137,
            "Polygon",
            "MATIC",
            "https://example/rpc",
            "https://example/explorer",
        )
    }

    #[test]
    fn test_find_by_chain_id_and_slug() {
        let registry = NetworkRegistry::new().with_network(poly());
        assert_eq!(registry.find_by_chain_id(137).unwrap().id, "poly");
        assert_eq!(registry.find_by_slug("poly").unwrap().chain_id, 137);
        assert!(registry.find_by_chain_id(1).is_none());
        assert!(registry.find_by_slug("eth").is_none());
    }

    #[test]
    fn test_identity_is_chain_id() {
        let mut renamed = poly();
        renamed.display_name = "Matic".into();
        renamed.rpc_url = "https://other/rpc".into();
        assert_eq!(poly(), renamed);
    }

    #[test]
    fn test_register_overrides_same_chain_id() {
        let mut custom = poly();
        custom.rpc_url = "https://private/rpc".into();
        let registry = NetworkRegistry::builtin().with_network(custom);
        let polygon = registry.find_by_chain_id(POLYGON_MAINNET).unwrap();
        assert_eq!(polygon.rpc_url, "https://private/rpc");
        assert_eq!(registry.len(), NetworkRegistry::builtin().len());
    }

    #[test]
    fn test_resolve_slug_or_chain_id() {
        let registry = NetworkRegistry::builtin();
        assert_eq!(registry.resolve("base").unwrap().chain_id, BASE_MAINNET);
        assert_eq!(registry.resolve("137").unwrap().id, "poly");
        assert!(registry.resolve("999999").is_none());
    }

    #[test]
    fn test_default_network_on_empty_registry() {
        assert!(NetworkRegistry::new().default_network().is_none());
        assert_eq!(
            NetworkRegistry::builtin().default_network().unwrap().chain_id,
            ETHEREUM_MAINNET
        );
    }

    #[test]
    fn test_chain_id_hex_and_explorer_url() {
        let network = poly();
        assert_eq!(network.chain_id_hex(), "0x89");
        assert_eq!(
            network.explorer_tx_url("0xabc"),
            "https://example/explorer/tx/0xabc"
        );
    }

    #[test]
    fn test_deserialize_defaults_native_decimals() {
        let network: Network = serde_json::from_str(
            r#"{"id":"x","chain_id":5,"display_name":"X","native_symbol":"X",
                "rpc_url":"https://x","explorer_url":"https://x/scan"}"#,
        )
        .unwrap();
        assert_eq!(network.native_decimals, DEFAULT_NATIVE_DECIMALS);
    }
}
