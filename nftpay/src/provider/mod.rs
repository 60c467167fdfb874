//! Wallet provider model.
//!
//! A wallet provider is the object a wallet injects into the host environment
//! to expose account access, chain information and transaction signing.
//! Providers come in two dialects: the modern request-based one
//! (`request({ method, params })`) and the legacy enable-based one
//! (`enable()` plus `send`). Which dialect a provider speaks, and whether it
//! can notify about account or chain changes, is probed exactly once by the
//! [`locator`] and recorded as [`Capabilities`] on a [`ProviderHandle`]. Every
//! other component branches on that set instead of re-inspecting the provider.
//!
//! - [`WalletTransport`] - The raw call surface a provider exposes
//! - [`ProviderHandle`] - A located provider with its vendor tag and capabilities
//! - [`ProviderClient`] - Typed, dialect-aware RPC calls over a handle
//! - [`ProviderError`] - Provider failures and their classification

pub mod client;
pub mod locator;

pub use client::*;
pub use locator::*;

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde_json::Value;

/// Standard provider error codes (EIP-1193, EIP-1474).
pub mod codes {
    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested method or account has not been authorized by the user.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The provider does not support the requested method.
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    /// The provider is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;
    /// The provider is not connected to the requested chain.
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    /// The requested chain has not been added to the wallet.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// A request of the same kind is already pending in the wallet UI.
    pub const REQUEST_PENDING: i64 = -32002;
    /// The request exceeded a rate or resource limit.
    pub const LIMIT_EXCEEDED: i64 = -32005;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Errors reported by a wallet provider or by the transport reaching it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a JSON-RPC error object.
    #[error("provider error {code}: {message}")]
    Rpc {
        /// Error code.
        code: i64,
        /// Error message as reported by the provider.
        message: String,
        /// Additional error data, if any.
        data: Option<Value>,
    },
    /// The provider did not answer in time.
    #[error("provider request timed out")]
    Timeout,
    /// The provider could not be reached.
    #[error("provider transport error: {0}")]
    Transport(String),
    /// The provider answered with a value of an unexpected shape.
    #[error("malformed provider response: {0}")]
    Decode(String),
    /// The provider does not expose the requested call shape.
    #[error("provider does not support {0}")]
    Unsupported(&'static str),
}

/// How the orchestration layer reacts to a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The user declined the prompt. Terminal, never retried.
    UserRejected,
    /// The wallet does not know the requested chain.
    UnrecognizedChain,
    /// A timeout or generic internal error that may succeed when repeated once.
    Transient,
    /// Anything else.
    Other,
}

impl ProviderError {
    /// Creates a JSON-RPC error without data.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Returns the top-level JSON-RPC error code, if this is an RPC error.
    #[must_use]
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the code some wallets nest under `data.originalError.code` (or
    /// `data.code`) when they wrap an error into a generic internal error.
    #[must_use]
    pub fn nested_code(&self) -> Option<i64> {
        let Self::Rpc {
            data: Some(data), ..
        } = self
        else {
            return None;
        };
        data.get("originalError")
            .and_then(|original| original.get("code"))
            .or_else(|| data.get("code"))
            .and_then(Value::as_i64)
    }

    /// Classifies the error.
    ///
    /// Only provider timeouts and the generic internal-error and
    /// limit-exceeded codes are transient. An internal error that wraps a user
    /// rejection or an unknown chain is classified by the wrapped code. A
    /// request that is already pending in the wallet UI is never transient:
    /// repeating it would stack a second signing prompt.
    #[must_use]
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Rpc { code, .. } => {
                let nested = self.nested_code();
                if *code == codes::USER_REJECTED || nested == Some(codes::USER_REJECTED) {
                    ErrorClass::UserRejected
                } else if *code == codes::UNRECOGNIZED_CHAIN
                    || nested == Some(codes::UNRECOGNIZED_CHAIN)
                {
                    ErrorClass::UnrecognizedChain
                } else if matches!(*code, codes::INTERNAL_ERROR | codes::LIMIT_EXCEEDED) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Other
                }
            }
            Self::Timeout => ErrorClass::Transient,
            Self::Transport(_) | Self::Decode(_) | Self::Unsupported(_) => ErrorClass::Other,
        }
    }
}

/// A capability a provider may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Modern request-based RPC.
    RequestRpc,
    /// Legacy enable-based RPC.
    LegacyEnable,
    /// Account and chain change notifications.
    EventSubscription,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Self::RequestRpc => 1,
            Self::LegacyEnable => 1 << 1,
            Self::EventSubscription => 1 << 2,
        }
    }
}

/// The set of capabilities probed from a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Returns the empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the set with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns `true` if the set contains `capability`.
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Returns `true` if the provider can be called in at least one dialect.
    #[must_use]
    pub const fn has_rpc(self) -> bool {
        self.contains(Capability::RequestRpc) || self.contains(Capability::LegacyEnable)
    }

    /// Returns `true` if no capability is present.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Probes a transport for its capabilities.
    #[must_use]
    pub fn probe(transport: &dyn WalletTransport) -> Self {
        let mut caps = Self::empty();
        if transport.supports_request() {
            caps = caps.with(Capability::RequestRpc);
        }
        if transport.supports_enable() {
            caps = caps.with(Capability::LegacyEnable);
        }
        if transport.supports_events() {
            caps = caps.with(Capability::EventSubscription);
        }
        caps
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Capability::RequestRpc, "request_rpc"),
            (Capability::LegacyEnable, "legacy_enable"),
            (Capability::EventSubscription, "event_subscription"),
        ];
        let present: Vec<&str> = names
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", present.join(", "))
    }
}

/// A notification pushed by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The exposed accounts changed; empty when the wallet was locked or disconnected.
    AccountsChanged(Vec<Address>),
    /// The active chain changed.
    ChainChanged(u64),
    /// The provider lost connection to all chains.
    Disconnect {
        /// Error code carried by the disconnect notification.
        code: i64,
        /// Reason carried by the disconnect notification.
        message: String,
    },
}

/// Callback invoked for every provider notification.
///
/// Transports must not hold internal locks while invoking listeners: a
/// listener may remove itself from within the callback.
pub type EventListener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Identifier of a registered [`EventListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The raw call surface of an injected wallet provider.
///
/// Implementations expose whichever dialect they speak. Default method bodies
/// report the call shape as unsupported.
#[async_trait]
pub trait WalletTransport: Send + Sync + fmt::Debug {
    /// Whether `request({ method, params })` is available.
    fn supports_request(&self) -> bool;

    /// Whether the legacy `enable()` / `send()` pair is available.
    fn supports_enable(&self) -> bool {
        false
    }

    /// Whether `on` / `removeListener` are available.
    fn supports_events(&self) -> bool {
        false
    }

    /// Issues a modern-dialect request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let _ = (method, params);
        Err(ProviderError::Unsupported("request"))
    }

    /// Issues a legacy `enable()` call, returning the exposed accounts.
    async fn enable(&self) -> Result<Value, ProviderError> {
        Err(ProviderError::Unsupported("enable"))
    }

    /// Issues a legacy `send(method, params)` call.
    async fn send_legacy(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let _ = (method, params);
        Err(ProviderError::Unsupported("send"))
    }

    /// Registers a listener for provider notifications.
    fn on(&self, listener: EventListener) -> Result<ListenerId, ProviderError> {
        let _ = listener;
        Err(ProviderError::Unsupported("event subscription"))
    }

    /// Removes a previously registered listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId) {
        let _ = id;
    }
}

/// Identity of an injected provider object.
///
/// Two handles located from the same injected object share the same id, even
/// across separate locate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(usize);

impl ProviderId {
    /// Returns the identity of a transport object.
    #[must_use]
    pub fn of(transport: &Arc<dyn WalletTransport>) -> Self {
        Self(Arc::as_ptr(transport).cast::<()>() as usize)
    }
}

/// A located wallet provider.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    id: ProviderId,
    vendor: VendorTag,
    capabilities: Capabilities,
    transport: Arc<dyn WalletTransport>,
}

impl ProviderHandle {
    /// Creates a handle, probing the transport's capabilities.
    #[must_use]
    pub fn new(vendor: VendorTag, transport: Arc<dyn WalletTransport>) -> Self {
        let capabilities = Capabilities::probe(transport.as_ref());
        Self {
            id: ProviderId::of(&transport),
            vendor,
            capabilities,
            transport,
        }
    }

    /// Returns the identity of the underlying provider object.
    #[must_use]
    pub const fn id(&self) -> ProviderId {
        self.id
    }

    /// Returns the vendor tag, for display and diagnostics only.
    #[must_use]
    pub const fn vendor(&self) -> VendorTag {
        self.vendor
    }

    /// Returns the probed capability set.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn WalletTransport> {
        &self.transport
    }

    /// Returns a typed RPC client speaking this provider's dialect.
    #[must_use]
    pub const fn client(&self) -> ProviderClient<'_> {
        ProviderClient::new(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_classify_user_rejection() {
        let err = ProviderError::rpc(codes::USER_REJECTED, "User rejected the request.");
        assert_eq!(err.classify(), ErrorClass::UserRejected);
    }

    #[test]
    fn test_classify_wrapped_codes() {
        let wrapped_rejection = ProviderError::Rpc {
            code: codes::INTERNAL_ERROR,
            message: "Internal JSON-RPC error.".into(),
            data: Some(json!({ "originalError": { "code": 4001 } })),
        };
        assert_eq!(wrapped_rejection.classify(), ErrorClass::UserRejected);

        let wrapped_unknown_chain = ProviderError::Rpc {
            code: codes::INTERNAL_ERROR,
            message: "Unrecognized chain ID".into(),
            data: Some(json!({ "originalError": { "code": 4902 } })),
        };
        assert_eq!(
            wrapped_unknown_chain.classify(),
            ErrorClass::UnrecognizedChain
        );
    }

    #[test]
    fn test_classify_transient_set() {
        assert_eq!(
            ProviderError::rpc(codes::INTERNAL_ERROR, "internal").classify(),
            ErrorClass::Transient
        );
        assert_eq!(
            ProviderError::rpc(codes::LIMIT_EXCEEDED, "limit").classify(),
            ErrorClass::Transient
        );
        assert_eq!(ProviderError::Timeout.classify(), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_request_pending_is_not_transient() {
        let err = ProviderError::rpc(codes::REQUEST_PENDING, "already pending");
        assert_eq!(err.classify(), ErrorClass::Other);
        assert_eq!(
            ProviderError::Transport("connection refused".into()).classify(),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_capabilities_set() {
        let caps: Capabilities = [Capability::RequestRpc, Capability::EventSubscription]
            .into_iter()
            .collect();
        assert!(caps.contains(Capability::RequestRpc));
        assert!(!caps.contains(Capability::LegacyEnable));
        assert!(caps.has_rpc());
        assert_eq!(caps.to_string(), "[request_rpc, event_subscription]");
        assert!(!Capabilities::empty().has_rpc());
    }
}
