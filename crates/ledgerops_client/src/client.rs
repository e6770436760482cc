//! Operation submission and confirmation tracking.

use std::sync::Arc;
use std::time::Duration;

use ledgerops_core::LedgerConfig;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::OpError;
use crate::rpc::{HttpRpc, LedgerRpc, SignedOperation};
use crate::signer::{SerializedSigner, Signer};
use crate::status::{Confirmed, OperationState, OperationTracker};
use crate::types::{
    Address, ContractCode, OperationDescriptor, OperationHash, StorageValue, SubmissionResult,
    Value,
};

/// Entrypoint used for plain native-currency transfers.
pub const DEFAULT_ENTRYPOINT: &str = "default";

/// Confirmation defaults applied by [`LedgerClient::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub confirmation_depth: u32,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for ClientConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            confirmation_depth: config.confirmation_depth,
            poll_interval: config.poll_interval(),
            timeout: config.polling_timeout(),
        }
    }
}

/// Submits operations for one signer and tracks them to a confirmation
/// depth. Holds no per-operation state; concurrent calls are independent
/// apart from the signer's counter lock.
pub struct LedgerClient {
    rpc: Arc<dyn LedgerRpc>,
    signer: SerializedSigner,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
}

impl LedgerClient {
    pub fn new(rpc: Arc<dyn LedgerRpc>, signer: SerializedSigner, config: ClientConfig) -> Self {
        Self {
            rpc,
            signer,
            clock: Arc::new(TokioClock),
            config,
        }
    }

    /// HTTP client for the node named in `config`.
    pub fn from_config(config: &LedgerConfig, signer: Arc<dyn Signer>) -> Result<Self, OpError> {
        config
            .validate()
            .map_err(|e| OpError::InvalidOperation(format!("{e:#}")))?;
        let rpc = HttpRpc::with_timeout(&config.rpc_url, config.request_timeout())?;
        Ok(Self::new(
            Arc::new(rpc),
            SerializedSigner::new(signer),
            ClientConfig::from(config),
        ))
    }

    /// Replace the time source (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Same node and config, acting for a different signer.
    pub fn for_signer(&self, signer: SerializedSigner) -> Self {
        Self {
            rpc: Arc::clone(&self.rpc),
            signer,
            clock: Arc::clone(&self.clock),
            config: self.config,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -- Submission ---------------------------------------------------------

    /// Deploy `code` with `initial_storage`. The storage is not checked
    /// against the code's schema.
    pub async fn originate(
        &self,
        code: ContractCode,
        initial_storage: StorageValue,
    ) -> Result<SubmissionResult, OpError> {
        self.submit(&OperationDescriptor::originate(code, initial_storage))
            .await
    }

    /// Call `entrypoint` on `target`.
    pub async fn invoke(
        &self,
        target: &Address,
        entrypoint: &str,
        arguments: Vec<Value>,
        amount: u64,
    ) -> Result<SubmissionResult, OpError> {
        self.submit(&OperationDescriptor::invoke(
            target.clone(),
            entrypoint,
            arguments,
            amount,
        ))
        .await
    }

    /// Move `amount` native units to `to`.
    pub async fn transfer(&self, to: &Address, amount: u64) -> Result<SubmissionResult, OpError> {
        self.invoke(to, DEFAULT_ENTRYPOINT, Vec::new(), amount)
            .await
    }

    /// Validate, sign and broadcast one operation. Exactly one broadcast is
    /// attempted; failures are returned, never retried.
    pub async fn submit(
        &self,
        descriptor: &OperationDescriptor,
    ) -> Result<SubmissionResult, OpError> {
        descriptor.validate()?;
        let mut tracker = OperationTracker::new(self.config.confirmation_depth);

        let receipt = {
            // Counter read, signature and broadcast happen under one lock so
            // concurrent submissions for this signer never reuse a counter.
            let session = self.signer.session().await;
            let source = session.address();
            let counter = self.rpc.counter(&source).await? + 1;
            let envelope = descriptor.envelope(source, counter);
            let bytes = envelope.canonical_bytes()?;
            let signature = session.sign(&bytes).await?;
            tracker.mark_signed();

            debug!(
                source = %envelope.source,
                counter,
                entrypoint = descriptor.entrypoint().unwrap_or("<origination>"),
                "broadcasting signed operation"
            );
            self.rpc
                .broadcast(&SignedOperation::new(envelope, signature))
                .await?
        };
        tracker.mark_broadcast();

        let operation_hash = OperationHash::new(receipt.hash)?;
        let originated_address = if descriptor.is_origination() {
            let raw = receipt.originated_contracts.into_iter().next().ok_or_else(|| {
                OpError::Transport(format!(
                    "node did not report a contract address for origination {operation_hash}"
                ))
            })?;
            let address = Address::parse(raw).map_err(|e| {
                OpError::Transport(format!("node reported a malformed contract address: {e}"))
            })?;
            Some(address)
        } else {
            None
        };

        info!(
            hash = %operation_hash,
            state = %tracker.state(),
            originated = ?originated_address.as_ref().map(Address::as_str),
            "operation broadcast"
        );
        Ok(SubmissionResult {
            operation_hash,
            originated_address,
        })
    }

    // -- Confirmation -------------------------------------------------------

    /// Poll the node every `poll_interval` until the operation has
    /// `required_depth` blocks on top of it, the node reports it failed, or
    /// `timeout` elapses. Safe to call again for the same hash; nothing is
    /// ever rebroadcast.
    pub async fn await_confirmation(
        &self,
        op_hash: &OperationHash,
        required_depth: u32,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Confirmed, OpError> {
        if poll_interval.is_zero() {
            return Err(OpError::InvalidOperation("poll interval must be positive".into()));
        }
        if timeout.is_zero() {
            return Err(OpError::InvalidOperation("timeout must be positive".into()));
        }

        let started = self.clock.now();
        let mut tracker = OperationTracker::broadcast(required_depth);

        loop {
            let status = self.rpc.operation_status(op_hash).await?;
            match tracker.observe(&status) {
                OperationState::Confirmed { depth } => {
                    info!(hash = %op_hash, depth = *depth, "operation confirmed");
                    return Ok(Confirmed {
                        operation_hash: op_hash.clone(),
                        depth: *depth,
                    });
                }
                OperationState::Rejected { reason } => {
                    warn!(hash = %op_hash, reason = %reason, "operation rejected by contract");
                    return Err(OpError::Rejection {
                        reason: reason.clone(),
                    });
                }
                state => {
                    debug!(hash = %op_hash, state = %state, required_depth, "waiting for confirmation");
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= timeout {
                let last_depth = tracker.max_depth();
                tracker.mark_timed_out();
                warn!(hash = %op_hash, ?elapsed, ?last_depth, "confirmation timed out");
                return Err(OpError::Timeout {
                    op_hash: op_hash.to_string(),
                    elapsed,
                    last_depth,
                });
            }
            self.clock.sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// [`Self::await_confirmation`] with the client's configured depth,
    /// interval and timeout.
    pub async fn confirm(&self, submission: &SubmissionResult) -> Result<Confirmed, OpError> {
        self.await_confirmation(
            &submission.operation_hash,
            self.config.confirmation_depth,
            self.config.poll_interval,
            self.config.timeout,
        )
        .await
    }

    /// Submit and wait for the configured confirmation depth.
    pub async fn submit_and_confirm(
        &self,
        descriptor: &OperationDescriptor,
    ) -> Result<(SubmissionResult, Confirmed), OpError> {
        let submission = self.submit(descriptor).await?;
        let confirmed = self.confirm(&submission).await?;
        Ok((submission, confirmed))
    }

    // -- Queries ------------------------------------------------------------

    /// Current storage of the contract at `target`.
    pub async fn query_storage(&self, target: &Address) -> Result<StorageValue, OpError> {
        self.rpc.contract_storage(target).await
    }
}
