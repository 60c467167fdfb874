//! Discovery of injected wallet providers.
//!
//! A host environment may expose several injected provider objects at once,
//! and one object may identify as more than one vendor (Brave's built-in
//! wallet also sets `isMetaMask`). [`locate_providers`] turns whatever the host
//! exposes into a de-duplicated list of [`ProviderHandle`]s ranked by
//! [`VendorTag`], probing each provider's capabilities exactly once.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use super::{ProviderHandle, ProviderId, WalletTransport};

/// Vendor flag set by MetaMask and by several wallets that imitate it.
pub const FLAG_METAMASK: &str = "isMetaMask";
/// Vendor flag set by Coinbase Wallet.
pub const FLAG_COINBASE: &str = "isCoinbaseWallet";
/// Vendor flag set by Brave's built-in wallet.
pub const FLAG_BRAVE: &str = "isBraveWallet";
/// Vendor flag set by Trust Wallet.
pub const FLAG_TRUST: &str = "isTrust";
/// Alternative vendor flag set by newer Trust Wallet builds.
pub const FLAG_TRUST_WALLET: &str = "isTrustWallet";

/// Heuristic vendor classification of a provider. Display and diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VendorTag {
    /// MetaMask or a wallet advertising MetaMask compatibility.
    MetaMaskLike,
    /// Coinbase Wallet.
    CoinbaseLike,
    /// Brave's built-in wallet.
    BraveLike,
    /// Trust Wallet.
    TrustLike,
    /// Any other provider.
    Generic,
}

impl VendorTag {
    /// Position in the fixed ranking; lower ranks first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::MetaMaskLike => 0,
            Self::CoinbaseLike => 1,
            Self::BraveLike => 2,
            Self::TrustLike => 3,
            Self::Generic => 4,
        }
    }

    /// Classifies a set of vendor flags under the most specific tag.
    ///
    /// Wallets that imitate MetaMask keep their own flag alongside
    /// `isMetaMask`, so the vendor-specific flags are checked first.
    #[must_use]
    pub fn from_flags(flags: &BTreeSet<String>) -> Self {
        let has = |flag: &str| flags.contains(flag);
        if has(FLAG_BRAVE) {
            Self::BraveLike
        } else if has(FLAG_TRUST) || has(FLAG_TRUST_WALLET) {
            Self::TrustLike
        } else if has(FLAG_COINBASE) {
            Self::CoinbaseLike
        } else if has(FLAG_METAMASK) {
            Self::MetaMaskLike
        } else {
            Self::Generic
        }
    }

    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetaMaskLike => "metamask",
            Self::CoinbaseLike => "coinbase",
            Self::BraveLike => "brave",
            Self::TrustLike => "trust",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for VendorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider object exposed by the host, with the vendor flags it sets.
#[derive(Debug, Clone)]
pub struct InjectedProvider {
    /// Vendor flags set on the object (`isMetaMask`, `isBraveWallet`, ...).
    pub flags: BTreeSet<String>,
    /// The object's call surface.
    pub transport: Arc<dyn WalletTransport>,
}

impl InjectedProvider {
    /// Creates an injection from its flags and transport.
    pub fn new<I, S>(flags: I, transport: Arc<dyn WalletTransport>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            transport,
        }
    }

    /// Returns the identity of the injected object.
    #[must_use]
    pub fn id(&self) -> ProviderId {
        ProviderId::of(&self.transport)
    }
}

/// An environment wallets inject providers into.
pub trait HostEnvironment: Send + Sync {
    /// Returns every provider object currently exposed, possibly with repeats.
    fn injected_providers(&self) -> Vec<InjectedProvider>;
}

/// A host environment with a fixed set of injections.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    providers: Vec<InjectedProvider>,
}

impl StaticHost {
    /// Creates an empty host.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Builder-style method: exposes an additional provider object.
    #[must_use]
    pub fn with_provider(mut self, provider: InjectedProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Exposes an additional provider object.
    pub fn inject(&mut self, provider: InjectedProvider) {
        self.providers.push(provider);
    }
}

impl HostEnvironment for StaticHost {
    fn injected_providers(&self) -> Vec<InjectedProvider> {
        self.providers.clone()
    }
}

/// Discovers, de-duplicates and ranks the providers a host exposes.
///
/// Each injected object yields at most one handle, tagged with its most
/// specific vendor. Objects that speak neither dialect are skipped. The result
/// is stable-sorted by [`VendorTag::rank`], so injections with the same tag
/// keep the host's order. An environment without providers yields an empty
/// list.
#[must_use]
pub fn locate_providers(host: &dyn HostEnvironment) -> Vec<ProviderHandle> {
    let mut seen = HashSet::new();
    let mut handles = Vec::new();
    for injected in host.injected_providers() {
        if !seen.insert(injected.id()) {
            continue;
        }
        let vendor = VendorTag::from_flags(&injected.flags);
        let handle = ProviderHandle::new(vendor, injected.transport);
        if !handle.capabilities().has_rpc() {
            #[cfg(feature = "telemetry")]
            tracing::debug!(%vendor, "skipping provider without rpc capability");
            continue;
        }
        handles.push(handle);
    }
    handles.sort_by_key(|h| h.vendor().rank());

    #[cfg(feature = "telemetry")]
    tracing::debug!(count = handles.len(), "located wallet providers");

    handles
}

/// Returns `true` if the host exposes a usable provider with the given tag.
#[must_use]
pub fn is_installed(host: &dyn HostEnvironment, vendor: VendorTag) -> bool {
    locate_providers(host)
        .iter()
        .any(|handle| handle.vendor() == vendor)
}
