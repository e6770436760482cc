//! Node RPC boundary: the [`LedgerRpc`] trait and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OpError;
use crate::signer::Signature;
use crate::status::ConfirmationStatus;
use crate::types::{Address, OperationEnvelope, OperationHash, StorageValue};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 300;

/// An envelope together with its signature, as sent to `/broadcast`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub operation: OperationEnvelope,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl SignedOperation {
    pub fn new(operation: OperationEnvelope, signature: Signature) -> Self {
        Self {
            operation,
            signature: signature.0,
        }
    }
}

/// Node answer to a successful broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub hash: String,
    #[serde(default)]
    pub originated_contracts: Vec<String>,
}

/// Raw answer of `/operations/{hash}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub included: bool,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn status(self) -> ConfirmationStatus {
        ConfirmationStatus::from_parts(self.included, self.depth, self.error)
    }
}

#[derive(Debug, Deserialize)]
struct CounterResponse {
    counter: u64,
}

/// Operations the client needs from a node.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Last replay counter used by `account`.
    async fn counter(&self, account: &Address) -> Result<u64, OpError>;

    /// Inject a signed operation. Node-side refusals map to
    /// [`OpError::Submission`].
    async fn broadcast(&self, operation: &SignedOperation) -> Result<BroadcastReceipt, OpError>;

    /// Inclusion status of an operation. Unknown hashes are `Pending`.
    async fn operation_status(&self, hash: &OperationHash) -> Result<ConfirmationStatus, OpError>;

    /// Current storage of a contract; [`OpError::NotFound`] if none is deployed.
    async fn contract_storage(&self, address: &Address) -> Result<StorageValue, OpError>;
}

// ---------------------------------------------------------------------------
// HttpRpc
// ---------------------------------------------------------------------------

/// [`LedgerRpc`] over the node's HTTP JSON interface.
pub struct HttpRpc {
    base_url: String,
    client: Client,
}

impl HttpRpc {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OpError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OpError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OpError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_reqwest_error(e: reqwest::Error) -> OpError {
        if e.is_timeout() {
            OpError::Transport(format!("request timed out: {e}"))
        } else if e.is_connect() {
            OpError::Transport(format!("connection failed: {e}"))
        } else if e.is_decode() {
            OpError::Transport(format!("unreadable node response: {e}"))
        } else {
            OpError::Transport(e.to_string())
        }
    }

    /// Server errors are transport failures; client errors are left to the
    /// caller to classify.
    fn server_error(status: StatusCode, body: &str) -> Option<OpError> {
        status.is_server_error().then(|| {
            OpError::Transport(format!("node error {status}: {}", truncate_error(body)))
        })
    }

    /// GET `url` as JSON; `None` when the node answers 404.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, OpError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if let Some(err) = Self::server_error(status, &text) {
                return Err(err);
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            return Err(OpError::Transport(format!(
                "unexpected node response {status}: {}",
                truncate_error(&text)
            )));
        }
        let body = resp.json().await.map_err(Self::map_reqwest_error)?;
        Ok(Some(body))
    }
}

#[async_trait]
impl LedgerRpc for HttpRpc {
    async fn counter(&self, account: &Address) -> Result<u64, OpError> {
        let url = self.url(&format!("/accounts/{account}/counter"));
        debug!(url = %url, "fetching account counter");
        match self.get_json::<CounterResponse>(&url).await? {
            Some(body) => Ok(body.counter),
            // An account the node has never seen has not used any counter.
            None => Ok(0),
        }
    }

    async fn broadcast(&self, operation: &SignedOperation) -> Result<BroadcastReceipt, OpError> {
        let url = self.url("/broadcast");
        debug!(
            url = %url,
            source = %operation.operation.source,
            counter = operation.operation.counter,
            "broadcasting operation"
        );

        let resp = self
            .client
            .post(&url)
            .json(operation)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if let Some(err) = Self::server_error(status, &text) {
                return Err(err);
            }
            return Err(OpError::Submission(node_message(&text)));
        }

        resp.json().await.map_err(Self::map_reqwest_error)
    }

    async fn operation_status(&self, hash: &OperationHash) -> Result<ConfirmationStatus, OpError> {
        let url = self.url(&format!("/operations/{hash}/status"));
        match self.get_json::<StatusReport>(&url).await? {
            Some(report) => Ok(report.status()),
            None => Ok(ConfirmationStatus::Pending),
        }
    }

    async fn contract_storage(&self, address: &Address) -> Result<StorageValue, OpError> {
        let url = self.url(&format!("/contracts/{address}/storage"));
        debug!(url = %url, "fetching contract storage");
        match self.get_json::<StorageValue>(&url).await? {
            Some(storage) => Ok(storage),
            None => Err(OpError::NotFound(address.to_string())),
        }
    }
}

/// Pull a human-readable message out of a node error body. Accepts
/// `{"error": "..."}`, `{"message": "..."}` or plain text.
fn node_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(msg), ..
        })
        | Ok(ErrorBody {
            message: Some(msg), ..
        }) => msg,
        _ if body.trim().is_empty() => "node refused the operation".into(),
        _ => truncate_error(body.trim()),
    }
}

fn truncate_error(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    }
}
