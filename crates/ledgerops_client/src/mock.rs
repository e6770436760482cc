//! In-process node and clock doubles for tests.
//!
//! [`MockLedger`] keeps contract storage, account counters and broadcast
//! history in memory. Contract behavior is supplied per code blob through
//! [`ContractHandler`]s, so test suites can model just enough of an external
//! contract to exercise a scenario. [`ManualClock`] makes poll loops run in
//! virtual time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::error::OpError;
use crate::rpc::{BroadcastReceipt, LedgerRpc, SignedOperation};
use crate::status::ConfirmationStatus;
use crate::types::{Address, ContractCode, OperationHash, OperationKind, StorageValue, Value};

const BASE58_DIGITS: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

// ---------------------------------------------------------------------------
// Contract handlers
// ---------------------------------------------------------------------------

/// One entrypoint call as seen by a simulated contract.
#[derive(Debug)]
pub struct CallContext<'a> {
    pub sender: &'a Address,
    pub contract: &'a Address,
    pub entrypoint: &'a str,
    pub arguments: &'a [Value],
    pub amount: u64,
}

/// Simulated contract logic. Returning `Err(reason)` aborts the call; the
/// operation is then reported as failed with that reason and storage is
/// left untouched.
pub trait ContractHandler: Send + Sync {
    fn call(&self, ctx: &CallContext<'_>, storage: &mut StorageValue) -> Result<(), String>;
}

impl<F> ContractHandler for F
where
    F: Fn(&CallContext<'_>, &mut StorageValue) -> Result<(), String> + Send + Sync,
{
    fn call(&self, ctx: &CallContext<'_>, storage: &mut StorageValue) -> Result<(), String> {
        self(ctx, storage)
    }
}

// ---------------------------------------------------------------------------
// MockLedger
// ---------------------------------------------------------------------------

struct Contract {
    storage: StorageValue,
    handler: Option<Arc<dyn ContractHandler>>,
}

struct Tracked {
    /// Scripted statuses, consumed one per poll. The last one repeats.
    script: VecDeque<ConfirmationStatus>,
    failure: Option<String>,
    pending_polls: u32,
    depth: Option<u32>,
    polls: u32,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<Address, u64>,
    balances: HashMap<Address, u64>,
    contracts: HashMap<Address, Contract>,
    codes: Vec<(ContractCode, Arc<dyn ContractHandler>)>,
    operations: HashMap<String, Tracked>,
    broadcasts: Vec<SignedOperation>,
    next_operation: u64,
    next_contract: u64,
    inclusion_latency: u32,
    refuse_next: Option<String>,
    unreachable: bool,
}

/// In-memory [`LedgerRpc`].
///
/// Every status poll of an accepted operation advances it one step: it
/// stays pending for the configured inclusion latency, then reports depth
/// 0, 1, 2, ...
#[derive(Default)]
pub struct MockLedger {
    inner: Mutex<Inner>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `handler` for every contract originated with `code`.
    pub fn register_code<F>(&self, code: ContractCode, handler: F)
    where
        F: Fn(&CallContext<'_>, &mut StorageValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register_handler(code, Arc::new(handler));
    }

    pub fn register_handler(&self, code: ContractCode, handler: Arc<dyn ContractHandler>) {
        self.inner.lock().codes.push((code, handler));
    }

    /// Polls that report `Pending` before an operation is included.
    pub fn set_inclusion_latency(&self, polls: u32) {
        self.inner.lock().inclusion_latency = polls;
    }

    /// Refuse the next broadcast with `message`.
    pub fn refuse_next_broadcast(&self, message: impl Into<String>) {
        self.inner.lock().refuse_next = Some(message.into());
    }

    /// Make every call fail as if the node were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    /// Replace the status sequence reported for `hash`.
    pub fn script_status(&self, hash: &OperationHash, statuses: Vec<ConfirmationStatus>) {
        let mut inner = self.inner.lock();
        let tracked = inner
            .operations
            .entry(hash.to_string())
            .or_insert_with(|| Tracked::new(0, None));
        tracked.script = statuses.into();
    }

    /// Put a contract in place without an origination.
    pub fn deploy(&self, address: Address, storage: StorageValue) {
        self.inner.lock().contracts.insert(
            address,
            Contract {
                storage,
                handler: None,
            },
        );
    }

    pub fn broadcasts(&self) -> Vec<SignedOperation> {
        self.inner.lock().broadcasts.clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.inner.lock().broadcasts.len()
    }

    pub fn status_polls(&self, hash: &OperationHash) -> u32 {
        self.inner
            .lock()
            .operations
            .get(hash.as_str())
            .map_or(0, |t| t.polls)
    }

    /// Native units received through plain transfers.
    pub fn balance(&self, address: &Address) -> u64 {
        self.inner
            .lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(inner: &Inner) -> Result<(), OpError> {
        if inner.unreachable {
            return Err(OpError::Transport("connection failed: node unreachable".into()));
        }
        Ok(())
    }
}

impl Tracked {
    fn new(pending_polls: u32, failure: Option<String>) -> Self {
        Self {
            script: VecDeque::new(),
            failure,
            pending_polls,
            depth: None,
            polls: 0,
        }
    }

    fn poll(&mut self) -> ConfirmationStatus {
        self.polls += 1;
        if let Some(next) = self.script.pop_front() {
            if self.script.is_empty() {
                self.script.push_back(next.clone());
            }
            return next;
        }
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            return ConfirmationStatus::Pending;
        }
        if let Some(reason) = &self.failure {
            return ConfirmationStatus::Failed {
                reason: reason.clone(),
            };
        }
        let depth = self.depth.map_or(0, |d| d + 1);
        self.depth = Some(depth);
        ConfirmationStatus::Included { depth }
    }
}

impl Inner {
    fn next_contract_address(&mut self) -> Result<Address, OpError> {
        self.next_contract += 1;
        let mut n = self.next_contract;
        let mut digits = Vec::new();
        while n > 0 {
            digits.push(BASE58_DIGITS[(n % 58) as usize]);
            n /= 58;
        }
        digits.reverse();
        let body = String::from_utf8_lossy(&digits);
        Address::parse(format!("KT1{body:1>33}"))
    }

    /// Apply an accepted operation; returns the originated address and the
    /// contract's abort reason, if any.
    fn execute(
        &mut self,
        signed: &SignedOperation,
    ) -> Result<(Option<Address>, Option<String>), OpError> {
        let envelope = &signed.operation;
        let sender = &envelope.source;
        let amount = envelope.operation.amount;

        match &envelope.operation.kind {
            OperationKind::Originate { code, storage } => {
                let address = self.next_contract_address()?;
                let handler = self
                    .codes
                    .iter()
                    .find(|(c, _)| c == code)
                    .map(|(_, h)| Arc::clone(h));
                self.contracts.insert(
                    address.clone(),
                    Contract {
                        storage: storage.clone(),
                        handler,
                    },
                );
                *self.balances.entry(address.clone()).or_default() += amount;
                Ok((Some(address), None))
            }
            OperationKind::Invoke {
                target,
                entrypoint,
                arguments,
            } => {
                if !target.is_contract() {
                    *self.balances.entry(target.clone()).or_default() += amount;
                    return Ok((None, None));
                }
                let contract = self.contracts.get_mut(target).ok_or_else(|| {
                    OpError::Submission(format!("contract {target} does not exist"))
                })?;
                let Some(handler) = contract.handler.clone() else {
                    *self.balances.entry(target.clone()).or_default() += amount;
                    return Ok((None, None));
                };

                let ctx = CallContext {
                    sender,
                    contract: target,
                    entrypoint,
                    arguments,
                    amount,
                };
                let mut scratch = contract.storage.clone();
                match handler.call(&ctx, &mut scratch) {
                    Ok(()) => {
                        contract.storage = scratch;
                        *self.balances.entry(target.clone()).or_default() += amount;
                        Ok((None, None))
                    }
                    Err(reason) => Ok((None, Some(reason))),
                }
            }
        }
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn counter(&self, account: &Address) -> Result<u64, OpError> {
        let inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        Ok(inner.counters.get(account).copied().unwrap_or(0))
    }

    async fn broadcast(&self, operation: &SignedOperation) -> Result<BroadcastReceipt, OpError> {
        let mut inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        if let Some(message) = inner.refuse_next.take() {
            return Err(OpError::Submission(message));
        }

        let source = operation.operation.source.clone();
        let expected = inner.counters.get(&source).copied().unwrap_or(0) + 1;
        if operation.operation.counter != expected {
            let message = if operation.operation.counter < expected {
                "counter_in_the_past"
            } else {
                "counter_in_the_future"
            };
            return Err(OpError::Submission(message.into()));
        }

        let (originated, failure) = inner.execute(operation)?;
        inner.counters.insert(source, expected);
        inner.next_operation += 1;
        let hash = format!("oo{:0>49}", inner.next_operation);
        let latency = inner.inclusion_latency;
        inner
            .operations
            .insert(hash.clone(), Tracked::new(latency, failure));
        inner.broadcasts.push(operation.clone());
        debug!(hash = %hash, "mock ledger accepted operation");

        Ok(BroadcastReceipt {
            hash,
            originated_contracts: originated.into_iter().map(String::from).collect(),
        })
    }

    async fn operation_status(&self, hash: &OperationHash) -> Result<ConfirmationStatus, OpError> {
        let mut inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        match inner.operations.get_mut(hash.as_str()) {
            Some(tracked) => Ok(tracked.poll()),
            None => Ok(ConfirmationStatus::Pending),
        }
    }

    async fn contract_storage(&self, address: &Address) -> Result<StorageValue, OpError> {
        let inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        inner
            .contracts
            .get(address)
            .map(|c| c.storage.clone())
            .ok_or_else(|| OpError::NotFound(address.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Virtual clock: `sleep` advances time instantly.
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Virtual time passed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
