//! Typed entrypoint calls for the known contracts.
//!
//! Every call type lowers to a [`ContractCall`] (entrypoint name, argument
//! values and attached amount) and can be decoded back from one, so the same
//! encoding serves the operation client and contract simulations.

use ledgerops_client::{
    Address, Confirmed, LedgerClient, OpError, OperationDescriptor, SubmissionResult, Value,
};

use crate::error::DecodeError;
use crate::storage::{OperatorKey, ProposalKind};

/// Entrypoint name, arguments and native amount of one contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub entrypoint: String,
    pub arguments: Vec<Value>,
    pub amount: u64,
}

impl ContractCall {
    pub fn new(entrypoint: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            arguments,
            amount: 0,
        }
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    pub fn descriptor(&self, target: &Address) -> OperationDescriptor {
        OperationDescriptor::invoke(
            target.clone(),
            self.entrypoint.clone(),
            self.arguments.clone(),
            self.amount,
        )
    }

    /// Sign and broadcast this call against `target`.
    pub async fn send(
        &self,
        client: &LedgerClient,
        target: &Address,
    ) -> Result<SubmissionResult, OpError> {
        client.submit(&self.descriptor(target)).await
    }

    /// Send and wait for the client's configured confirmation depth.
    pub async fn send_and_confirm(
        &self,
        client: &LedgerClient,
        target: &Address,
    ) -> Result<(SubmissionResult, Confirmed), OpError> {
        client.submit_and_confirm(&self.descriptor(target)).await
    }
}

/// A typed call of one contract's entrypoints.
pub trait Entrypoint: Sized {
    fn to_call(&self) -> ContractCall;

    fn decode(entrypoint: &str, arguments: &[Value], amount: u64) -> Result<Self, DecodeError>;
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTx {
    pub to: Address,
    pub token_id: u64,
    pub amount: u64,
}

/// FA2 transfer batch: every `txs` entry moves tokens out of `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub from: Address,
    pub txs: Vec<TransferTx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorUpdate {
    Add(OperatorKey),
    Remove(OperatorKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEntrypoint {
    /// Admin only.
    Mint { to: Address, amount: u64 },
    Transfer(Vec<TransferBatch>),
    UpdateOperators(Vec<OperatorUpdate>),
    /// Admin only. Grants or revokes the right to send transfers.
    AllowAddress { address: Address, allowed: bool },
    /// Admin only. Proposes a new admin, who must confirm.
    SetAdmin(Address),
    ConfirmAdmin,
    /// Admin only.
    Pause(bool),
}

impl Entrypoint for TokenEntrypoint {
    fn to_call(&self) -> ContractCall {
        match self {
            Self::Mint { to, amount } => {
                ContractCall::new("mint", vec![Value::from(to), Value::Nat(*amount)])
            }
            Self::Transfer(batches) => ContractCall::new(
                "transfer",
                vec![Value::List(batches.iter().map(TransferBatch::to_value).collect())],
            ),
            Self::UpdateOperators(updates) => ContractCall::new(
                "update_operators",
                vec![Value::List(updates.iter().map(OperatorUpdate::to_value).collect())],
            ),
            Self::AllowAddress { address, allowed } => ContractCall::new(
                "allow_address",
                vec![Value::from(address), Value::Bool(*allowed)],
            ),
            Self::SetAdmin(admin) => ContractCall::new("set_admin", vec![Value::from(admin)]),
            Self::ConfirmAdmin => ContractCall::new("confirm_admin", Vec::new()),
            Self::Pause(paused) => ContractCall::new("pause", vec![Value::Bool(*paused)]),
        }
    }

    fn decode(entrypoint: &str, arguments: &[Value], _amount: u64) -> Result<Self, DecodeError> {
        let call = match entrypoint {
            "mint" => {
                let args = Args::new(entrypoint, arguments, "(address, nat)", 2)?;
                Self::Mint {
                    to: args.address(0)?,
                    amount: args.nat(1)?,
                }
            }
            "transfer" => {
                let args = Args::new(entrypoint, arguments, "a list of transfer batches", 1)?;
                let batches = args
                    .list(0)?
                    .iter()
                    .map(|v| TransferBatch::from_value(v).ok_or_else(|| args.error()))
                    .collect::<Result<_, _>>()?;
                Self::Transfer(batches)
            }
            "update_operators" => {
                let args = Args::new(entrypoint, arguments, "a list of operator updates", 1)?;
                let updates = args
                    .list(0)?
                    .iter()
                    .map(|v| OperatorUpdate::from_value(v).ok_or_else(|| args.error()))
                    .collect::<Result<_, _>>()?;
                Self::UpdateOperators(updates)
            }
            "allow_address" => {
                let args = Args::new(entrypoint, arguments, "(address, bool)", 2)?;
                Self::AllowAddress {
                    address: args.address(0)?,
                    allowed: args.bool(1)?,
                }
            }
            "set_admin" => {
                Self::SetAdmin(Args::new(entrypoint, arguments, "an address", 1)?.address(0)?)
            }
            "confirm_admin" => {
                Args::new(entrypoint, arguments, "no arguments", 0)?;
                Self::ConfirmAdmin
            }
            "pause" => Self::Pause(Args::new(entrypoint, arguments, "a bool", 1)?.bool(0)?),
            other => return Err(DecodeError::UnknownEntrypoint(other.to_string())),
        };
        Ok(call)
    }
}

impl TransferBatch {
    fn to_value(&self) -> Value {
        Value::record([
            ("from_", Value::from(&self.from)),
            (
                "txs",
                Value::List(
                    self.txs
                        .iter()
                        .map(|tx| {
                            Value::record([
                                ("to_", Value::from(&tx.to)),
                                ("token_id", Value::Nat(tx.token_id)),
                                ("amount", Value::Nat(tx.amount)),
                            ])
                        })
                        .collect(),
                ),
            ),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let txs = value
            .field("txs")?
            .as_list()?
            .iter()
            .map(|tx| {
                Some(TransferTx {
                    to: tx.field("to_")?.as_address()?.clone(),
                    token_id: tx.field("token_id")?.as_nat()?,
                    amount: tx.field("amount")?.as_nat()?,
                })
            })
            .collect::<Option<_>>()?;
        Some(Self {
            from: value.field("from_")?.as_address()?.clone(),
            txs,
        })
    }
}

impl OperatorUpdate {
    fn to_value(&self) -> Value {
        match self {
            Self::Add(key) => Value::record([("add_operator", key.to_value())]),
            Self::Remove(key) => Value::record([("remove_operator", key.to_value())]),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        if let Some(key) = value.field("add_operator") {
            return OperatorKey::from_value(key).ok().map(Self::Add);
        }
        let key = value.field("remove_operator")?;
        OperatorKey::from_value(key).ok().map(Self::Remove)
    }
}

// ---------------------------------------------------------------------------
// Crowdsale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrowdsaleEntrypoint {
    /// Admin only. Grants each address an allowance in lots.
    WhitelistAdd(Vec<(Address, u64)>),
    /// Admin only.
    WhitelistRemove(Vec<Address>),
    /// Buy `lots` lots, paying `amount` native units.
    Buy { lots: u64, amount: u64 },
    /// Admin only.
    Pause(bool),
}

impl CrowdsaleEntrypoint {
    /// Purchase of `lots` lots at `lot_price` each; `None` on overflow.
    pub fn buy(lots: u64, lot_price: u64) -> Option<Self> {
        Some(Self::Buy {
            lots,
            amount: lots.checked_mul(lot_price)?,
        })
    }
}

impl Entrypoint for CrowdsaleEntrypoint {
    fn to_call(&self) -> ContractCall {
        match self {
            Self::WhitelistAdd(entries) => ContractCall::new(
                "whitelist_add",
                vec![Value::List(
                    entries
                        .iter()
                        .map(|(address, allowance)| {
                            Value::pair(Value::from(address), Value::Nat(*allowance))
                        })
                        .collect(),
                )],
            ),
            Self::WhitelistRemove(addresses) => ContractCall::new(
                "whitelist_remove",
                vec![Value::List(addresses.iter().map(Value::from).collect())],
            ),
            Self::Buy { lots, amount } => {
                ContractCall::new("buy", vec![Value::Nat(*lots)]).with_amount(*amount)
            }
            Self::Pause(paused) => ContractCall::new("pause", vec![Value::Bool(*paused)]),
        }
    }

    fn decode(entrypoint: &str, arguments: &[Value], amount: u64) -> Result<Self, DecodeError> {
        let call = match entrypoint {
            "whitelist_add" => {
                let args = Args::new(entrypoint, arguments, "a list of (address, nat)", 1)?;
                let entries = args
                    .list(0)?
                    .iter()
                    .map(|v| {
                        let (address, allowance) = v.as_pair().ok_or_else(|| args.error())?;
                        match (address.as_address(), allowance.as_nat()) {
                            (Some(a), Some(n)) => Ok((a.clone(), n)),
                            _ => Err(args.error()),
                        }
                    })
                    .collect::<Result<_, _>>()?;
                Self::WhitelistAdd(entries)
            }
            "whitelist_remove" => {
                let args = Args::new(entrypoint, arguments, "a list of addresses", 1)?;
                let addresses = args
                    .list(0)?
                    .iter()
                    .map(|v| v.as_address().cloned().ok_or_else(|| args.error()))
                    .collect::<Result<_, _>>()?;
                Self::WhitelistRemove(addresses)
            }
            "buy" => Self::Buy {
                lots: Args::new(entrypoint, arguments, "a nat", 1)?.nat(0)?,
                amount,
            },
            "pause" => Self::Pause(Args::new(entrypoint, arguments, "a bool", 1)?.bool(0)?),
            other => return Err(DecodeError::UnknownEntrypoint(other.to_string())),
        };
        Ok(call)
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEntrypoint {
    /// Open a proposal. Signees only.
    Propose(ProposalKind),
    Vote { proposal_id: u64, approve: bool },
    /// Run an approved proposal.
    Execute(u64),
}

impl WalletEntrypoint {
    pub fn send_funds_proposal(to: Address, amount: u64) -> Self {
        Self::Propose(ProposalKind::SendFunds { to, amount })
    }

    pub fn add_signee_proposal(signee: Address) -> Self {
        Self::Propose(ProposalKind::AddSignee(signee))
    }

    pub fn remove_signee_proposal(signee: Address) -> Self {
        Self::Propose(ProposalKind::RemoveSignee(signee))
    }

    pub fn set_vote_threshold_proposal(threshold: u64) -> Self {
        Self::Propose(ProposalKind::SetThreshold(threshold))
    }

    pub fn vote(proposal_id: u64, approve: bool) -> Self {
        Self::Vote {
            proposal_id,
            approve,
        }
    }

    pub fn execute(proposal_id: u64) -> Self {
        Self::Execute(proposal_id)
    }
}

impl Entrypoint for WalletEntrypoint {
    fn to_call(&self) -> ContractCall {
        match self {
            Self::Propose(ProposalKind::SendFunds { to, amount }) => ContractCall::new(
                "send_funds_proposal",
                vec![Value::from(to), Value::Nat(*amount)],
            ),
            Self::Propose(ProposalKind::AddSignee(signee)) => {
                ContractCall::new("add_signee_proposal", vec![Value::from(signee)])
            }
            Self::Propose(ProposalKind::RemoveSignee(signee)) => {
                ContractCall::new("remove_signee_proposal", vec![Value::from(signee)])
            }
            Self::Propose(ProposalKind::SetThreshold(threshold)) => {
                ContractCall::new("set_vote_threshold_proposal", vec![Value::Nat(*threshold)])
            }
            Self::Vote {
                proposal_id,
                approve,
            } => ContractCall::new("vote", vec![Value::Nat(*proposal_id), Value::Bool(*approve)]),
            Self::Execute(proposal_id) => {
                ContractCall::new("execute", vec![Value::Nat(*proposal_id)])
            }
        }
    }

    fn decode(entrypoint: &str, arguments: &[Value], _amount: u64) -> Result<Self, DecodeError> {
        let call = match entrypoint {
            "send_funds_proposal" => {
                let args = Args::new(entrypoint, arguments, "(address, nat)", 2)?;
                Self::send_funds_proposal(args.address(0)?, args.nat(1)?)
            }
            "add_signee_proposal" => Self::add_signee_proposal(
                Args::new(entrypoint, arguments, "an address", 1)?.address(0)?,
            ),
            "remove_signee_proposal" => Self::remove_signee_proposal(
                Args::new(entrypoint, arguments, "an address", 1)?.address(0)?,
            ),
            "set_vote_threshold_proposal" => Self::set_vote_threshold_proposal(
                Args::new(entrypoint, arguments, "a nat", 1)?.nat(0)?,
            ),
            "vote" => {
                let args = Args::new(entrypoint, arguments, "(nat, bool)", 2)?;
                Self::vote(args.nat(0)?, args.bool(1)?)
            }
            "execute" => Self::execute(Args::new(entrypoint, arguments, "a nat", 1)?.nat(0)?),
            other => return Err(DecodeError::UnknownEntrypoint(other.to_string())),
        };
        Ok(call)
    }
}

// ---------------------------------------------------------------------------
// Argument decoding
// ---------------------------------------------------------------------------

struct Args<'a> {
    entrypoint: &'a str,
    values: &'a [Value],
    expected: &'static str,
}

impl<'a> Args<'a> {
    fn new(
        entrypoint: &'a str,
        values: &'a [Value],
        expected: &'static str,
        arity: usize,
    ) -> Result<Self, DecodeError> {
        let args = Self {
            entrypoint,
            values,
            expected,
        };
        if values.len() != arity {
            return Err(args.error());
        }
        Ok(args)
    }

    fn error(&self) -> DecodeError {
        DecodeError::Arguments {
            entrypoint: self.entrypoint.to_string(),
            expected: self.expected,
        }
    }

    fn address(&self, idx: usize) -> Result<Address, DecodeError> {
        self.values[idx]
            .as_address()
            .cloned()
            .ok_or_else(|| self.error())
    }

    fn nat(&self, idx: usize) -> Result<u64, DecodeError> {
        self.values[idx].as_nat().ok_or_else(|| self.error())
    }

    fn bool(&self, idx: usize) -> Result<bool, DecodeError> {
        self.values[idx].as_bool().ok_or_else(|| self.error())
    }

    fn list(&self, idx: usize) -> Result<&'a [Value], DecodeError> {
        self.values[idx].as_list().ok_or_else(|| self.error())
    }
}
