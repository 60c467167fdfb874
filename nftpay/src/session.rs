//! Connected-account session.
//!
//! A [`ConnectionSession`] owns the link between the storefront and one wallet
//! provider: which account is connected, which chain the wallet is on, and
//! the provider event subscription that keeps both current when the user
//! changes them from the wallet UI.
//!
//! The session moves through `Disconnected -> Connecting -> Connected ->
//! Disconnected`. The account is set if and only if the session is
//! `Connected`. Every path back to `Disconnected` releases the provider
//! subscription: it is held in a guard whose drop unregisters the listener.

use std::sync::{Arc, Weak};

use alloy_primitives::Address;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::provider::{
    Capability, ErrorClass, ListenerId, ProviderError, ProviderEvent, ProviderHandle,
    WalletTransport,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No account is connected.
    Disconnected,
    /// An account request is in flight.
    Connecting,
    /// An account is connected.
    Connected,
}

/// Why a session returned to [`SessionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// [`ConnectionSession::disconnect`] was called.
    UserRequested,
    /// The wallet reported an empty account list (locked or revoked).
    AccountsCleared,
    /// The provider reported a disconnect.
    ProviderDisconnected,
}

/// Notification delivered to [`SessionListener`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session connected.
    Connected {
        /// Connected account.
        account: Address,
        /// Active chain, if the wallet reported one.
        chain_id: Option<u64>,
    },
    /// The wallet switched to another account.
    AccountChanged {
        /// Newly active account.
        account: Address,
    },
    /// The wallet switched to another chain.
    ChainChanged {
        /// Newly active chain.
        chain_id: u64,
    },
    /// The session disconnected.
    Disconnected {
        /// What caused the disconnect.
        reason: DisconnectReason,
    },
}

/// Errors returned by [`ConnectionSession::connect`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The session is already connecting or connected.
    #[error("session is already active")]
    AlreadyActive,
    /// The user declined the account request.
    #[error("account request rejected by user")]
    Rejected,
    /// The wallet exposed no accounts.
    #[error("wallet exposed no accounts")]
    NoAccounts,
    /// The session was disconnected while the account request was in flight.
    #[error("session was disconnected while connecting")]
    Interrupted,
    /// The provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection state.
    pub state: SessionState,
    /// Connected account; `Some` iff `state` is `Connected`.
    pub account: Option<Address>,
    /// Active chain as last reported by the wallet.
    pub active_chain_id: Option<u64>,
}

/// Registered provider listener; unregisters itself on drop.
#[derive(Debug)]
struct Subscription {
    transport: Arc<dyn WalletTransport>,
    id: ListenerId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.transport.remove_listener(self.id);
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    account: Option<Address>,
    active_chain_id: Option<u64>,
    subscription: Option<Subscription>,
    generation: u64,
}

impl Inner {
    /// Resets to `Disconnected`, handing the subscription to the caller so it
    /// is released outside the lock.
    fn clear(&mut self) -> Option<Subscription> {
        self.state = SessionState::Disconnected;
        self.account = None;
        self.active_chain_id = None;
        self.subscription.take()
    }
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn teardown(&self, reason: DisconnectReason) {
        let released = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Connected {
                return;
            }
            inner.clear()
        };
        drop(released);

        #[cfg(feature = "telemetry")]
        tracing::info!(?reason, "wallet session disconnected");

        self.emit(SessionEvent::Disconnected { reason });
    }

    fn on_provider_event(&self, event: &ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let Some(&first) = accounts.first() else {
                    self.teardown(DisconnectReason::AccountsCleared);
                    return;
                };
                {
                    let mut inner = self.inner.lock();
                    if inner.state != SessionState::Connected || inner.account == Some(first) {
                        return;
                    }
                    inner.account = Some(first);
                }

                #[cfg(feature = "telemetry")]
                tracing::info!(account = %first, "wallet account changed");

                self.emit(SessionEvent::AccountChanged { account: first });
            }
            ProviderEvent::ChainChanged(chain_id) => self.set_chain(*chain_id),
            ProviderEvent::Disconnect { .. } => {
                self.teardown(DisconnectReason::ProviderDisconnected);
            }
        }
    }

    fn set_chain(&self, chain_id: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Connected || inner.active_chain_id == Some(chain_id) {
                return;
            }
            inner.active_chain_id = Some(chain_id);
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!(chain_id, "wallet chain changed");

        self.emit(SessionEvent::ChainChanged { chain_id });
    }
}

/// Receives [`SessionEvent`]s. Dropping the listener unsubscribes.
#[derive(Debug)]
pub struct SessionListener {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionListener {
    /// Waits for the next event; `None` once the session is gone.
    ///
    /// Events missed because the listener fell behind are skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// The connection between the storefront and one wallet provider.
#[derive(Debug)]
pub struct ConnectionSession {
    provider: ProviderHandle,
    shared: Arc<Shared>,
}

impl ConnectionSession {
    /// Creates a disconnected session over a located provider.
    #[must_use]
    pub fn new(provider: ProviderHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Disconnected,
                    account: None,
                    active_chain_id: None,
                    subscription: None,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    /// Requests account access and connects.
    ///
    /// On success the first exposed account becomes the session account, the
    /// active chain is queried on a best-effort basis, and provider events are
    /// subscribed when the provider supports them. On failure the session is
    /// back in `Disconnected` with no partial state.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] unless the session is disconnected
    /// - [`SessionError::Rejected`] if the user declines the account request
    /// - [`SessionError::NoAccounts`] if the wallet exposes no account
    /// - [`SessionError::Interrupted`] if [`disconnect`](Self::disconnect) ran meanwhile
    /// - [`SessionError::Provider`] for any other provider failure
    pub async fn connect(&self) -> Result<Address, SessionError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Disconnected {
                return Err(SessionError::AlreadyActive);
            }
            inner.state = SessionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        let client = self.provider.client();
        let accounts = match client.request_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.abort_connect(generation);
                #[cfg(feature = "telemetry")]
                tracing::info!(error = %e, "account request failed");
                return Err(match e.classify() {
                    ErrorClass::UserRejected => SessionError::Rejected,
                    _ => SessionError::Provider(e),
                });
            }
        };
        let Some(&account) = accounts.first() else {
            self.abort_connect(generation);
            return Err(SessionError::NoAccounts);
        };

        let chain_id = match client.chain_id().await {
            Ok(chain_id) => Some(chain_id),
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(error = %_e, "active chain unavailable after connect");
                None
            }
        };
        let subscription = self.subscribe_provider();

        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Connecting || inner.generation != generation {
                drop(inner);
                drop(subscription);
                return Err(SessionError::Interrupted);
            }
            inner.state = SessionState::Connected;
            inner.account = Some(account);
            inner.active_chain_id = chain_id;
            inner.subscription = subscription;
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(%account, ?chain_id, vendor = %self.provider.vendor(), "wallet session connected");

        self.shared
            .emit(SessionEvent::Connected { account, chain_id });
        Ok(account)
    }

    /// Disconnects: clears the account and releases the provider subscription.
    pub fn disconnect(&self) {
        let (was_connected, released) = {
            let mut inner = self.shared.inner.lock();
            let was_connected = inner.state == SessionState::Connected;
            (was_connected, inner.clear())
        };
        drop(released);
        if was_connected {
            self.shared.emit(SessionEvent::Disconnected {
                reason: DisconnectReason::UserRequested,
            });
        }
    }

    /// Subscribes to session notifications.
    #[must_use]
    pub fn subscribe(&self) -> SessionListener {
        SessionListener {
            rx: self.shared.events.subscribe(),
        }
    }

    /// Records a chain the wallet is known to be on, e.g. after a negotiated switch.
    pub(crate) fn observe_chain(&self, chain_id: u64) {
        self.shared.set_chain(chain_id);
    }

    /// Returns a point-in-time view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock();
        SessionSnapshot {
            state: inner.state,
            account: inner.account,
            active_chain_id: inner.active_chain_id,
        }
    }

    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Returns the connected account.
    #[must_use]
    pub fn account(&self) -> Option<Address> {
        self.shared.inner.lock().account
    }

    /// Returns the active chain as last reported by the wallet.
    #[must_use]
    pub fn active_chain_id(&self) -> Option<u64> {
        self.shared.inner.lock().active_chain_id
    }

    /// Returns the provider this session is bound to.
    #[must_use]
    pub const fn provider(&self) -> &ProviderHandle {
        &self.provider
    }

    fn abort_connect(&self, generation: u64) {
        let mut inner = self.shared.inner.lock();
        if inner.state == SessionState::Connecting && inner.generation == generation {
            inner.clear();
        }
    }

    fn subscribe_provider(&self) -> Option<Subscription> {
        if !self
            .provider
            .capabilities()
            .contains(Capability::EventSubscription)
        {
            return None;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let transport = Arc::clone(self.provider.transport());
        match transport.on(Arc::new(move |event: &ProviderEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.on_provider_event(event);
            }
        })) {
            Ok(id) => Some(Subscription { transport, id }),
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %_e, "provider event subscription failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockWallet, OTHER, PAYER, handle};
    use crate::provider::codes;

    fn session(wallet: &Arc<MockWallet>) -> ConnectionSession {
        ConnectionSession::new(handle(wallet))
    }

    #[tokio::test]
    async fn test_connect_sets_account_chain_and_subscribes() {
        let wallet = Arc::new(MockWallet::new(137));
        let session = session(&wallet);
        let mut listener = session.subscribe();

        assert_eq!(session.connect().await.unwrap(), PAYER);
        assert_eq!(
            session.snapshot(),
            SessionSnapshot {
                state: SessionState::Connected,
                account: Some(PAYER),
                active_chain_id: Some(137),
            }
        );
        assert_eq!(wallet.listener_count(), 1);
        assert_eq!(
            listener.try_recv(),
            Some(SessionEvent::Connected {
                account: PAYER,
                chain_id: Some(137),
            })
        );
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        assert_eq!(session.connect().await, Err(SessionError::AlreadyActive));
        assert_eq!(wallet.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_partial_state() {
        let wallet = Arc::new(MockWallet::new(1));
        wallet.script(
            "eth_requestAccounts",
            Err(ProviderError::rpc(codes::USER_REJECTED, "User rejected")),
        );
        let session = session(&wallet);
        assert_eq!(session.connect().await, Err(SessionError::Rejected));
        assert_eq!(
            session.snapshot(),
            SessionSnapshot {
                state: SessionState::Disconnected,
                account: None,
                active_chain_id: None,
            }
        );
        assert_eq!(wallet.listener_count(), 0);
        assert_eq!(wallet.calls_to("eth_chainId"), 0);

        let empty = Arc::new(MockWallet::new(1).with_accounts(vec![]));
        let session = ConnectionSession::new(handle(&empty));
        assert_eq!(session.connect().await, Err(SessionError::NoAccounts));
        assert_eq!(session.state(), SessionState::Disconnected);

        // a later attempt can still succeed
        let session = ConnectionSession::new(handle(&wallet));
        assert_eq!(session.connect().await.unwrap(), PAYER);
    }

    #[tokio::test]
    async fn test_legacy_provider_connects_without_subscription() {
        let wallet = Arc::new(MockWallet::legacy(1));
        let session = session(&wallet);
        assert_eq!(session.connect().await.unwrap(), PAYER);
        assert_eq!(wallet.calls(), vec!["enable", "eth_chainId"]);
        assert_eq!(wallet.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_query_failure_does_not_block_connect() {
        let wallet = Arc::new(MockWallet::new(1));
        wallet.script("eth_chainId", Err(ProviderError::Timeout));
        let session = session(&wallet);
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.active_chain_id(), None);
    }

    #[tokio::test]
    async fn test_empty_accounts_event_tears_down_and_unsubscribes() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        let mut listener = session.subscribe();

        wallet.emit(&ProviderEvent::AccountsChanged(vec![]));

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.account(), None);
        assert_eq!(wallet.listener_count(), 0);
        assert_eq!(
            listener.try_recv(),
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::AccountsCleared,
            })
        );
    }

    #[tokio::test]
    async fn test_provider_disconnect_tears_down() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        wallet.emit(&ProviderEvent::Disconnect {
            code: codes::DISCONNECTED,
            message: "disconnected".into(),
        });
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(wallet.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_changed_updates_only_chain() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        let mut listener = session.subscribe();

        wallet.emit(&ProviderEvent::ChainChanged(137));

        assert_eq!(
            session.snapshot(),
            SessionSnapshot {
                state: SessionState::Connected,
                account: Some(PAYER),
                active_chain_id: Some(137),
            }
        );
        assert_eq!(
            listener.try_recv(),
            Some(SessionEvent::ChainChanged { chain_id: 137 })
        );
    }

    #[tokio::test]
    async fn test_account_switch_updates_account() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        let mut listener = session.subscribe();

        wallet.emit(&ProviderEvent::AccountsChanged(vec![PAYER]));
        assert_eq!(listener.try_recv(), None);

        wallet.emit(&ProviderEvent::AccountsChanged(vec![OTHER, PAYER]));
        assert_eq!(session.account(), Some(OTHER));
        assert_eq!(
            listener.try_recv(),
            Some(SessionEvent::AccountChanged { account: OTHER })
        );
    }

    #[tokio::test]
    async fn test_disconnect_clears_and_unsubscribes() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        let mut listener = session.subscribe();

        session.disconnect();

        assert_eq!(session.account(), None);
        assert_eq!(wallet.listener_count(), 0);
        assert_eq!(
            listener.try_recv(),
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::UserRequested,
            })
        );

        // events after teardown are not observed
        wallet.emit(&ProviderEvent::ChainChanged(5));
        assert_eq!(session.active_chain_id(), None);
    }

    #[tokio::test]
    async fn test_dropping_session_releases_subscription() {
        let wallet = Arc::new(MockWallet::new(1));
        let session = session(&wallet);
        session.connect().await.unwrap();
        assert_eq!(wallet.listener_count(), 1);
        drop(session);
        assert_eq!(wallet.listener_count(), 0);
    }
}
