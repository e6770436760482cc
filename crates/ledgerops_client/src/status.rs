//! Confirmation status as reported by the node, and the per-operation
//! lifecycle derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::OperationHash;

/// What the node currently knows about one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Not yet included (or not yet known to the node).
    Pending,
    /// Included, with `depth` blocks built on top of the including block.
    Included { depth: u32 },
    /// The operation failed application-level execution.
    Failed { reason: String },
}

impl ConfirmationStatus {
    /// Fold the raw `{included, depth, error}` triple into a status. An error
    /// wins over inclusion.
    pub fn from_parts(included: bool, depth: u32, error: Option<String>) -> Self {
        match error {
            Some(reason) => Self::Failed { reason },
            None if included => Self::Included { depth },
            None => Self::Pending,
        }
    }

    /// Whether polling can stop for the given required depth.
    pub fn is_terminal(&self, required_depth: u32) -> bool {
        match self {
            Self::Pending => false,
            Self::Included { depth } => *depth >= required_depth,
            Self::Failed { .. } => true,
        }
    }
}

/// Terminal success of a confirmation wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmed {
    pub operation_hash: OperationHash,
    /// Depth observed when the wait ended; at least the required depth.
    pub depth: u32,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationState {
    Constructed,
    Signed,
    Broadcast,
    Pending,
    Included { depth: u32 },
    Confirmed { depth: u32 },
    Rejected { reason: String },
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::Rejected { .. } | Self::TimedOut
        )
    }

    fn depth(&self) -> Option<u32> {
        match self {
            Self::Included { depth } | Self::Confirmed { depth } => Some(*depth),
            _ => None,
        }
    }

    fn can_transition_to(&self, next: &OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Constructed, Signed) => true,
            (Signed, Broadcast) => true,
            (Broadcast | Pending, Pending) => true,
            (Broadcast | Pending, Included { .. } | Confirmed { .. }) => true,
            (Included { depth: from }, Included { depth: to } | Confirmed { depth: to }) => {
                to >= from
            }
            (Broadcast | Pending | Included { .. }, Rejected { .. } | TimedOut) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructed => f.write_str("constructed"),
            Self::Signed => f.write_str("signed"),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Pending => f.write_str("pending"),
            Self::Included { depth } => write!(f, "included({depth})"),
            Self::Confirmed { depth } => write!(f, "confirmed({depth})"),
            Self::Rejected { .. } => f.write_str("rejected"),
            Self::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// Drives [`OperationState`] forward, refusing backward moves and anything
/// out of a terminal state.
#[derive(Debug, Clone)]
pub struct OperationTracker {
    state: OperationState,
    required_depth: u32,
    observed_depths: Vec<u32>,
}

impl OperationTracker {
    pub fn new(required_depth: u32) -> Self {
        Self {
            state: OperationState::Constructed,
            required_depth,
            observed_depths: Vec::new(),
        }
    }

    /// Tracker for an operation that is already on the wire.
    pub fn broadcast(required_depth: u32) -> Self {
        Self {
            state: OperationState::Broadcast,
            ..Self::new(required_depth)
        }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn required_depth(&self) -> u32 {
        self.required_depth
    }

    /// Highest depth seen so far.
    pub fn max_depth(&self) -> Option<u32> {
        self.state.depth()
    }

    /// Depths in the order they were accepted; never decreasing.
    pub fn observed_depths(&self) -> &[u32] {
        &self.observed_depths
    }

    pub fn mark_signed(&mut self) -> bool {
        self.advance(OperationState::Signed)
    }

    pub fn mark_broadcast(&mut self) -> bool {
        self.advance(OperationState::Broadcast)
    }

    pub fn mark_timed_out(&mut self) -> bool {
        self.advance(OperationState::TimedOut)
    }

    /// Fold one status report into the lifecycle and return the resulting
    /// state. Regressions reported by the node (a lower depth, or pending
    /// after inclusion) leave the state unchanged.
    pub fn observe(&mut self, status: &ConfirmationStatus) -> &OperationState {
        let next = match status {
            ConfirmationStatus::Pending => match self.state {
                OperationState::Included { .. } => {
                    warn!(state = %self.state, "node reported an included operation as pending");
                    return &self.state;
                }
                _ => OperationState::Pending,
            },
            ConfirmationStatus::Included { depth } => {
                if let Some(max) = self.max_depth() {
                    if *depth < max {
                        warn!(reported = depth, max, "node reported a lower depth than already seen");
                        return &self.state;
                    }
                }
                if *depth >= self.required_depth {
                    OperationState::Confirmed { depth: *depth }
                } else {
                    OperationState::Included { depth: *depth }
                }
            }
            ConfirmationStatus::Failed { reason } => OperationState::Rejected {
                reason: reason.clone(),
            },
        };
        if self.advance(next) {
            if let Some(depth) = self.state.depth() {
                if self.observed_depths.last() != Some(&depth) {
                    self.observed_depths.push(depth);
                }
            }
        }
        &self.state
    }

    fn advance(&mut self, next: OperationState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(&next) {
            warn!(from = %self.state, to = %next, "ignoring illegal operation state transition");
            return false;
        }
        self.state = next;
        true
    }
}
