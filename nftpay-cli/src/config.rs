//! Storefront configuration.
//!
//! Loaded from a TOML file. String values may reference environment variables
//! with `$VAR` or `${VAR}`; unresolved references are left as written.
//!
//! # Example Configuration
//!
//! ```toml
//! default_network = "poly"
//!
//! [orchestrator]
//! gas_margin_percent = 20
//! confirmation_timeout_ms = 120000
//!
//! [negotiator]
//! settle_interval_ms = 1000
//!
//! [order_service]
//! base_url = "https://api.market.example/v1"
//! token = "$NFTPAY_ORDER_TOKEN"
//!
//! [[wallets]]
//! name = "hot"
//! kind = "signer"
//! flags = ["isMetaMask"]
//! private_key = "${NFTPAY_SIGNER_KEY}"
//! chain = "ethereum"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the configuration file (default: `nftpay.toml`)
//! - `NFTPAY_ORDER_API` - Overrides `order_service.base_url`
//! - `NFTPAY_ORDER_TOKEN` - Overrides `order_service.token`

use std::io;
use std::path::{Path, PathBuf};

use nftpay::{NegotiatorConfig, Network, NetworkRegistry, OrchestratorConfig};
use regex::{Captures, Regex};
use serde::Deserialize;

const DEFAULT_ORDER_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Configuration path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The variable pattern failed to compile.
    #[error("invalid variable pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Network used when a command does not name one. Falls back to the
    /// first registered network.
    #[serde(default)]
    pub default_network: Option<String>,
    /// Payment timing and gas margin.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Chain negotiation settings.
    #[serde(default)]
    pub negotiator: NegotiatorConfig,
    /// Networks registered on top of the built-in ones. An entry with a known
    /// chain ID replaces the built-in descriptor.
    #[serde(default)]
    pub networks: Vec<Network>,
    /// Remote order API. Orders are kept in memory when absent.
    #[serde(default)]
    pub order_service: Option<OrderServiceConfig>,
    /// Wallets exposed to the storefront, in injection order.
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
}

/// Order API connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderServiceConfig {
    /// Base URL; endpoints are resolved relative to it.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_order_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_order_timeout_ms() -> u64 {
    DEFAULT_ORDER_TIMEOUT_MS
}

/// A wallet exposed to the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletConfig {
    /// Name used to select the wallet on the command line.
    pub name: String,
    /// Injection flags the wallet advertises (e.g. `isMetaMask`).
    #[serde(default)]
    pub flags: Vec<String>,
    /// How the wallet is reached.
    #[serde(flatten)]
    pub backend: WalletBackend,
}

/// How a configured wallet signs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletBackend {
    /// A local private key.
    Signer {
        /// Hex private key, usually an environment reference.
        private_key: String,
        /// Initial chain as slug or chain ID; the default network when absent.
        #[serde(default)]
        chain: Option<String>,
    },
    /// A remote wallet behind a JSON-RPC bridge.
    Bridge {
        /// Bridge endpoint.
        url: String,
        /// Per-request timeout in milliseconds; covers the user's signing time.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl CliConfig {
    /// Loads the configuration from `path`, then applies environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            String::new()
        };
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parses configuration text, expanding environment references first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid configuration.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok())?;
        Ok(toml::from_str(&expanded)?)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("NFTPAY_ORDER_API") {
            match &mut self.order_service {
                Some(service) => service.base_url = base_url,
                None => {
                    self.order_service = Some(OrderServiceConfig {
                        base_url,
                        token: None,
                        timeout_ms: DEFAULT_ORDER_TIMEOUT_MS,
                    });
                }
            }
        }
        if let Some(token) = lookup("NFTPAY_ORDER_TOKEN") {
            if let Some(service) = &mut self.order_service {
                service.token = Some(token);
            }
        }
    }

    /// Builds the network registry: built-in networks plus configured ones.
    #[must_use]
    pub fn registry(&self) -> NetworkRegistry {
        self.networks
            .iter()
            .cloned()
            .fold(NetworkRegistry::builtin(), NetworkRegistry::with_network)
    }
}

/// Expands `$VAR` and `${VAR}` references using `lookup`.
fn expand_env_vars(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let pattern = Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")?;
    let expanded = pattern.replace_all(input, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        lookup(name).unwrap_or_else(|| caps[0].to_owned())
    });
    Ok(expanded.into_owned())
}
