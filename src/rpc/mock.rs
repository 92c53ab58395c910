//! Scripted chain client for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::backend::pool::ClientFactory;
use crate::backend::registry::BackendDescriptor;
use crate::error::{Error, Result};

use super::client::ChainClient;

/// A failure the mock can be told to produce
#[derive(Debug, Clone)]
pub enum MockFailure {
    Timeout,
    Http(u16),
    Message(String),
}

impl MockFailure {
    fn to_error(&self) -> Error {
        match self {
            MockFailure::Timeout => Error::RpcTimeout(8000),
            MockFailure::Http(status) => Error::Http {
                status: *status,
                body: "Forbidden".to_string(),
            },
            MockFailure::Message(msg) => Error::Rpc(msg.clone()),
        }
    }
}

/// Shared across mock clients to observe how many balance calls overlap
#[derive(Default)]
pub struct ConcurrencyGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) -> Instant {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Instant::now()
    }

    fn exit(&self, started: Instant) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push((started, Instant::now()));
    }

    /// Highest number of calls seen in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Groups of calls separated by at least `gap` with nothing in flight
    pub fn bursts(&self, gap: Duration) -> usize {
        let mut spans = self.spans.lock().unwrap().clone();
        spans.sort_by_key(|(start, _)| *start);

        let mut bursts = 0;
        let mut busy_until: Option<Instant> = None;
        for (start, end) in spans {
            match busy_until {
                Some(until) if start < until + gap => busy_until = Some(until.max(end)),
                _ => {
                    bursts += 1;
                    busy_until = Some(end);
                }
            }
        }
        bursts
    }
}

#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Value(T),
    Fail(MockFailure),
}

pub struct MockChainClient {
    balance: Mutex<U256>,
    balance_script: Mutex<VecDeque<Scripted<U256>>>,
    nonce: u64,
    gas_price: u128,
    liveness_failure: Option<MockFailure>,
    liveness_delay: Duration,
    send_failure: Option<MockFailure>,
    /// Drain the balance to zero after a successful send
    drain_on_send: bool,
    balance_delay: Duration,
    gauge: Option<Arc<ConcurrencyGauge>>,
    pub calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(U256::ZERO),
            balance_script: Mutex::new(VecDeque::new()),
            nonce: 0,
            gas_price: 1_000_000_000,
            liveness_failure: None,
            liveness_delay: Duration::ZERO,
            send_failure: None,
            drain_on_send: false,
            balance_delay: Duration::ZERO,
            gauge: None,
            calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_balance(self, balance: U256) -> Self {
        *self.balance.lock().unwrap() = balance;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Responses consumed in order before falling back to the fixed balance
    pub fn script_balance(self, script: Vec<Scripted<U256>>) -> Self {
        *self.balance_script.lock().unwrap() = script.into();
        self
    }

    pub fn failing_liveness(mut self, failure: MockFailure) -> Self {
        self.liveness_failure = Some(failure);
        self
    }

    pub fn with_liveness_delay(mut self, delay: Duration) -> Self {
        self.liveness_delay = delay;
        self
    }

    pub fn failing_send(mut self, failure: MockFailure) -> Self {
        self.send_failure = Some(failure);
        self
    }

    pub fn draining(mut self) -> Self {
        self.drain_on_send = true;
        self
    }

    /// Hold every balance call open for `delay`
    pub fn with_balance_delay(mut self, delay: Duration) -> Self {
        self.balance_delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> Result<u64> {
        if !self.liveness_delay.is_zero() {
            tokio::time::sleep(self.liveness_delay).await;
        }
        match &self.liveness_failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(1_000),
        }
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let started = self.gauge.as_ref().map(|g| g.enter());
        if !self.balance_delay.is_zero() {
            tokio::time::sleep(self.balance_delay).await;
        }
        if let (Some(gauge), Some(started)) = (&self.gauge, started) {
            gauge.exit(started);
        }

        let next = self.balance_script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Value(v)) => Ok(v),
            Some(Scripted::Fail(f)) => Err(f.to_error()),
            None => Ok(*self.balance.lock().unwrap()),
        }
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.gas_price)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.send_failure {
            return Err(failure.to_error());
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(raw.to_vec());
        if self.drain_on_send {
            *self.balance.lock().unwrap() = U256::ZERO;
        }
        Ok(format!("0x{:064x}", sent.len()))
    }
}

/// Factory handing out pre-built mock clients by backend id
#[derive(Default)]
pub struct MockFactory {
    clients: HashMap<String, Arc<MockChainClient>>,
    connect_failures: Mutex<HashMap<String, VecDeque<MockFailure>>>,
    pub created: Mutex<HashMap<String, usize>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, client: MockChainClient) -> Self {
        self.clients.insert(id.to_string(), Arc::new(client));
        self
    }

    /// Failures returned by the next connects to `id`, in order
    pub fn failing_connects(self, id: &str, failures: Vec<MockFailure>) -> Self {
        self.connect_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), failures.into());
        self
    }

    pub fn client(&self, id: &str) -> Arc<MockChainClient> {
        self.clients[id].clone()
    }

    pub fn created(&self, id: &str) -> usize {
        self.created.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl ClientFactory for MockFactory {
    fn connect(&self, backend: &BackendDescriptor) -> Result<Arc<dyn ChainClient>> {
        *self
            .created
            .lock()
            .unwrap()
            .entry(backend.id.clone())
            .or_insert(0) += 1;

        let scripted = self
            .connect_failures
            .lock()
            .unwrap()
            .get_mut(&backend.id)
            .and_then(|queue| queue.pop_front());
        if let Some(failure) = scripted {
            return Err(failure.to_error());
        }

        match self.clients.get(&backend.id) {
            Some(client) => Ok(client.clone() as Arc<dyn ChainClient>),
            None => Err(Error::RpcConnection(format!(
                "dns error: failed to lookup address information: Name or service not known ({})",
                backend.rpc_url
            ))),
        }
    }
}
