//! Scripted wallet provider used by the crate's tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, address};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::provider::{
    Capability, EventListener, ListenerId, ProviderError, ProviderEvent, ProviderHandle,
    VendorTag, WalletTransport, codes, parse_quantity,
};

pub const PAYER: Address = address!("00000000000000000000000000000000000000aa");
pub const OTHER: Address = address!("00000000000000000000000000000000000000bb");
pub const RECIPIENT: &str = "0x00000000000000000000000000000000000000cc";

pub fn tx_hash() -> String {
    format!("0x{}", "dead".repeat(16))
}

#[derive(Debug, Default)]
struct State {
    chain_id: u64,
    accounts: Vec<Address>,
    known_chains: HashSet<u64>,
    calls: Vec<(String, Value)>,
    scripted: HashMap<String, VecDeque<Result<Value, ProviderError>>>,
    delays: HashMap<String, Duration>,
}

/// An in-memory wallet answering the calls the payment flow makes.
///
/// Scripted results take precedence over the default behaviour, one per call.
pub struct MockWallet {
    capabilities: Vec<Capability>,
    state: Mutex<State>,
    listeners: Mutex<Vec<(ListenerId, EventListener)>>,
    next_listener: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockWallet {
    /// Modern-dialect wallet with event support on `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self {
            capabilities: vec![Capability::RequestRpc, Capability::EventSubscription],
            state: Mutex::new(State {
                chain_id,
                accounts: vec![PAYER],
                known_chains: HashSet::from([chain_id]),
                ..State::default()
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Legacy-dialect wallet without events.
    pub fn legacy(chain_id: u64) -> Self {
        Self::new(chain_id).with_capabilities(&[Capability::LegacyEnable])
    }

    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn with_accounts(self, accounts: Vec<Address>) -> Self {
        self.state.lock().accounts = accounts;
        self
    }

    pub fn with_known_chain(self, chain_id: u64) -> Self {
        self.state.lock().known_chains.insert(chain_id);
        self
    }

    pub fn with_delay(self, method: &str, delay: Duration) -> Self {
        self.state.lock().delays.insert(method.to_owned(), delay);
        self
    }

    /// Queues a result for the next call of `method`.
    pub fn script(&self, method: &str, result: Result<Value, ProviderError>) {
        self.state
            .lock()
            .scripted
            .entry(method.to_owned())
            .or_default()
            .push_back(result);
    }

    pub fn chain_id(&self) -> u64 {
        self.state.lock().chain_id
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Delivers an event to every registered listener.
    pub fn emit(&self, event: &ProviderEvent) {
        let listeners: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push((method.to_owned(), params.clone()));
            state.delays.get(method).copied()
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.answer(method, &params);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        let scripted = self
            .state
            .lock()
            .scripted
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(result) = scripted {
            return result;
        }
        match method {
            "eth_requestAccounts" | "enable" => Ok(self.accounts_json()),
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id()))),
            "wallet_switchEthereumChain" => {
                let target = requested_chain(params)?;
                let known = self.state.lock().known_chains.contains(&target);
                if !known {
                    return Err(ProviderError::rpc(
                        codes::UNRECOGNIZED_CHAIN,
                        "Unrecognized chain ID",
                    ));
                }
                self.activate(target);
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let target = requested_chain(params)?;
                self.state.lock().known_chains.insert(target);
                self.activate(target);
                Ok(Value::Null)
            }
            "eth_estimateGas" => Ok(json!("0x5208")),
            "eth_sendTransaction" => Ok(json!(tx_hash())),
            "eth_getTransactionReceipt" => Ok(json!({
                "transactionHash": params[0],
                "blockNumber": "0x1",
                "status": "0x1",
            })),
            _ => Err(ProviderError::rpc(
                codes::UNSUPPORTED_METHOD,
                format!("method {method} not supported"),
            )),
        }
    }

    fn accounts_json(&self) -> Value {
        json!(self.state.lock().accounts)
    }

    fn activate(&self, chain_id: u64) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.chain_id != chain_id;
            state.chain_id = chain_id;
            changed
        };
        if changed {
            self.emit(&ProviderEvent::ChainChanged(chain_id));
        }
    }
}

impl fmt::Debug for MockWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockWallet")
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

fn requested_chain(params: &Value) -> Result<u64, ProviderError> {
    parse_quantity(&params[0]["chainId"])
}

#[async_trait]
impl WalletTransport for MockWallet {
    fn supports_request(&self) -> bool {
        self.capabilities.contains(&Capability::RequestRpc)
    }

    fn supports_enable(&self) -> bool {
        self.capabilities.contains(&Capability::LegacyEnable)
    }

    fn supports_events(&self) -> bool {
        self.capabilities.contains(&Capability::EventSubscription)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.dispatch(method, params).await
    }

    async fn enable(&self) -> Result<Value, ProviderError> {
        self.dispatch("enable", Value::Null).await
    }

    async fn send_legacy(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.dispatch(method, params).await
    }

    fn on(&self, listener: EventListener) -> Result<ListenerId, ProviderError> {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        Ok(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Locates a single mock wallet as a MetaMask-like provider.
pub fn handle(wallet: &Arc<MockWallet>) -> ProviderHandle {
    ProviderHandle::new(VendorTag::MetaMaskLike, Arc::clone(wallet) as Arc<dyn WalletTransport>)
}
