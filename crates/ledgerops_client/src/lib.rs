// Operation client: sign, broadcast and confirm ledger operations.

pub mod client;
pub mod clock;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rpc;
pub mod signer;
pub mod status;
pub mod types;

// Re-export primary types for convenient access.
pub use client::{ClientConfig, DEFAULT_ENTRYPOINT, LedgerClient};
pub use clock::{Clock, TokioClock};
pub use error::{ErrorClass, OpError, RetryPolicy};
pub use rpc::{BroadcastReceipt, HttpRpc, LedgerRpc, SignedOperation, StatusReport};
pub use signer::{InMemorySigner, SerializedSigner, Signature, Signer, SignerError, SigningSession};
pub use status::{ConfirmationStatus, Confirmed, OperationState, OperationTracker};
pub use types::{
    Address, ContractCode, OperationDescriptor, OperationEnvelope, OperationHash, OperationKind,
    StorageValue, SubmissionResult, Value,
};
