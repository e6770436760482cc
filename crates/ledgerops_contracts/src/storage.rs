//! Typed storage for the token, crowdsale and multisig wallet contracts.
//!
//! Each storage type converts to the generic [`Value`] tree the operation
//! client exchanges with the node, and decodes back from a queried storage
//! value. Encodings are records keyed by field name; sets are lists, and
//! maps are [`Value::Map`] entries in key order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use ledgerops_client::{Address, StorageValue, Value};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Token id of the single FA2 token the token contract manages.
pub const TOKEN_ID: u64 = 0;
pub const TOKEN_NAME: &str = "SomeToken";
pub const TOKEN_SYMBOL: &str = "SOME";
pub const TOKEN_DECIMALS: u32 = 6;

const CONTRACT_METADATA: &str =
    r#"{"version":"1.0","name":"SomeToken","interfaces":["TZIP-012","TZIP-016"]}"#;

pub const CROWDSALE_SUPPLY: u64 = 100;
pub const CROWDSALE_LOT_SIZE: u64 = 333_000;
pub const CROWDSALE_LOT_PRICE: u64 = 3_330_000;

pub const WALLET_THRESHOLD: u64 = 1;
pub const WALLET_DURATION_SECS: u64 = 3600;

// ---------------------------------------------------------------------------
// Contract kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Token,
    Crowdsale,
    Wallet,
}

impl ContractKind {
    pub const ALL: [ContractKind; 3] = [Self::Token, Self::Crowdsale, Self::Wallet];

    /// Key under which deployments of this kind are recorded.
    pub fn key(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Crowdsale => "crowdsale",
            Self::Wallet => "wallet",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Token => "Token",
            Self::Crowdsale => "Crowdsale",
            Self::Wallet => "Wallet",
        }
    }

    /// File stem of the compiled build artifact.
    pub fn artifact_name(self) -> &'static str {
        match self {
            Self::Token => "Token",
            Self::Crowdsale => "Tokensale",
            Self::Wallet => "Wallet",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContractKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "crowdsale" | "tokensale" => Ok(Self::Crowdsale),
            "wallet" | "multisig" => Ok(Self::Wallet),
            other => Err(DecodeError::UnknownContract(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// One operator permission: `operator` may move `owner`'s tokens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperatorKey {
    pub owner: Address,
    pub operator: Address,
    pub token_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub token_id: u64,
    pub token_info: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStorage {
    pub admin: Address,
    pub pending_admin: Option<Address>,
    pub paused: bool,
    /// Balance per holder, in the token's smallest unit.
    pub ledger: BTreeMap<Address, u64>,
    pub operators: BTreeSet<OperatorKey>,
    /// Holders allowed to send transfers.
    pub allowed: BTreeSet<Address>,
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub token_metadata: BTreeMap<u64, TokenInfo>,
}

impl TokenStorage {
    /// Fresh storage administered by `admin`, with the standard contract and
    /// token metadata and an empty ledger.
    pub fn new(admin: Address) -> Self {
        let metadata = BTreeMap::from([
            (String::new(), b"tezos-storage:contents".to_vec()),
            ("contents".to_string(), CONTRACT_METADATA.as_bytes().to_vec()),
        ]);
        let token_info = BTreeMap::from([
            ("name".to_string(), TOKEN_NAME.as_bytes().to_vec()),
            ("symbol".to_string(), TOKEN_SYMBOL.as_bytes().to_vec()),
            (
                "decimals".to_string(),
                TOKEN_DECIMALS.to_string().into_bytes(),
            ),
        ]);
        Self {
            admin,
            pending_admin: None,
            paused: false,
            ledger: BTreeMap::new(),
            operators: BTreeSet::new(),
            allowed: BTreeSet::new(),
            metadata,
            token_metadata: BTreeMap::from([(
                TOKEN_ID,
                TokenInfo {
                    token_id: TOKEN_ID,
                    token_info,
                },
            )]),
        }
    }

    pub fn with_balance(mut self, holder: Address, amount: u64) -> Self {
        self.ledger.insert(holder, amount);
        self
    }

    pub fn balance(&self, holder: &Address) -> u64 {
        self.ledger.get(holder).copied().unwrap_or(0)
    }

    /// Sum of all balances. Widened so balances read back from a node
    /// cannot overflow the total.
    pub fn total_supply(&self) -> u128 {
        self.ledger.values().map(|&balance| u128::from(balance)).sum()
    }

    pub fn is_operator(&self, owner: &Address, operator: &Address, token_id: u64) -> bool {
        self.operators.contains(&OperatorKey {
            owner: owner.clone(),
            operator: operator.clone(),
            token_id,
        })
    }

    pub fn to_value(&self) -> StorageValue {
        Value::record([
            ("admin", Value::from(&self.admin)),
            ("pending_admin", optional_address(self.pending_admin.as_ref())),
            ("paused", Value::Bool(self.paused)),
            ("ledger", nat_map(&self.ledger)),
            (
                "operators",
                Value::List(self.operators.iter().map(OperatorKey::to_value).collect()),
            ),
            ("allowed", address_list(&self.allowed)),
            ("metadata", bytes_map(&self.metadata)),
            (
                "token_metadata",
                Value::Map(
                    self.token_metadata
                        .iter()
                        .map(|(id, info)| (Value::Nat(*id), info.to_value()))
                        .collect(),
                ),
            ),
        ])
    }

    pub fn from_value(value: &StorageValue) -> Result<Self, DecodeError> {
        let f = Fields::new("Token", value)?;
        let operators = f
            .list("operators")?
            .iter()
            .map(|v| {
                OperatorKey::from_value(v)
                    .map_err(|_| f.malformed("operators", "a list of operator records"))
            })
            .collect::<Result<_, _>>()?;
        let token_metadata = f
            .map("token_metadata")?
            .iter()
            .map(|(k, v)| {
                let id = k
                    .as_nat()
                    .ok_or_else(|| f.malformed("token_metadata", "keyed by nat"))?;
                let info = TokenInfo::from_value(v)
                    .map_err(|_| f.malformed("token_metadata", "a map of token info records"))?;
                Ok((id, info))
            })
            .collect::<Result<_, DecodeError>>()?;

        Ok(Self {
            admin: f.address("admin")?,
            pending_admin: f.optional_address("pending_admin")?,
            paused: f.bool("paused")?,
            ledger: f.nat_map("ledger")?,
            operators,
            allowed: f.address_set("allowed")?,
            metadata: f.bytes_map("metadata")?,
            token_metadata,
        })
    }
}

impl OperatorKey {
    pub fn to_value(&self) -> Value {
        Value::record([
            ("owner", Value::from(&self.owner)),
            ("operator", Value::from(&self.operator)),
            ("token_id", Value::Nat(self.token_id)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let f = Fields::new("Token operator", value)?;
        Ok(Self {
            owner: f.address("owner")?,
            operator: f.address("operator")?,
            token_id: f.nat("token_id")?,
        })
    }
}

impl TokenInfo {
    fn to_value(&self) -> Value {
        Value::record([
            ("token_id", Value::Nat(self.token_id)),
            ("token_info", bytes_map(&self.token_info)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let f = Fields::new("Token metadata", value)?;
        Ok(Self {
            token_id: f.nat("token_id")?,
            token_info: f.bytes_map("token_info")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Crowdsale
// ---------------------------------------------------------------------------

/// Lot-based token sale. `supply` lots of `lot_size` tokens, each sold for
/// `lot_price` native units; buyers must be whitelisted with a lot
/// allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrowdsaleStorage {
    pub admin: Address,
    pub pending_admin: Option<Address>,
    pub owner: Address,
    pub token: Address,
    pub supply: u64,
    pub lot_size: u64,
    pub lot_price: u64,
    pub sold: u64,
    /// Remaining lot allowance per buyer.
    pub whitelisted: BTreeMap<Address, u64>,
    pub paused: bool,
}

impl CrowdsaleStorage {
    pub fn new(admin: Address, token: Address) -> Self {
        Self {
            owner: admin.clone(),
            admin,
            pending_admin: None,
            token,
            supply: CROWDSALE_SUPPLY,
            lot_size: CROWDSALE_LOT_SIZE,
            lot_price: CROWDSALE_LOT_PRICE,
            sold: 0,
            whitelisted: BTreeMap::new(),
            paused: false,
        }
    }

    pub fn allowance(&self, buyer: &Address) -> u64 {
        self.whitelisted.get(buyer).copied().unwrap_or(0)
    }

    /// Lots still for sale.
    pub fn remaining(&self) -> u64 {
        self.supply.saturating_sub(self.sold)
    }

    pub fn to_value(&self) -> StorageValue {
        Value::record([
            ("admin", Value::from(&self.admin)),
            ("pending_admin", optional_address(self.pending_admin.as_ref())),
            ("owner", Value::from(&self.owner)),
            ("token", Value::from(&self.token)),
            ("supply", Value::Nat(self.supply)),
            ("lot_size", Value::Nat(self.lot_size)),
            ("lot_price", Value::Nat(self.lot_price)),
            ("sold", Value::Nat(self.sold)),
            ("whitelisted", nat_map(&self.whitelisted)),
            ("paused", Value::Bool(self.paused)),
        ])
    }

    pub fn from_value(value: &StorageValue) -> Result<Self, DecodeError> {
        let f = Fields::new("Crowdsale", value)?;
        Ok(Self {
            admin: f.address("admin")?,
            pending_admin: f.optional_address("pending_admin")?,
            owner: f.address("owner")?,
            token: f.address("token")?,
            supply: f.nat("supply")?,
            lot_size: f.nat("lot_size")?,
            lot_price: f.nat("lot_price")?,
            sold: f.nat("sold")?,
            whitelisted: f.nat_map("whitelisted")?,
            paused: f.bool("paused")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// What a multisig proposal does once executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalKind {
    SendFunds { to: Address, amount: u64 },
    AddSignee(Address),
    RemoveSignee(Address),
    SetThreshold(u64),
}

impl ProposalKind {
    pub fn to_value(&self) -> Value {
        match self {
            Self::SendFunds { to, amount } => Value::record([(
                "send_funds",
                Value::pair(Value::from(to), Value::Nat(*amount)),
            )]),
            Self::AddSignee(signee) => Value::record([("add_signee", Value::from(signee))]),
            Self::RemoveSignee(signee) => Value::record([("remove_signee", Value::from(signee))]),
            Self::SetThreshold(threshold) => {
                Value::record([("set_threshold", Value::Nat(*threshold))])
            }
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let malformed = || DecodeError::Malformed {
            contract: "Wallet",
            field: "kind",
            expected: "a proposal kind",
        };
        let Value::Record(fields) = value else {
            return Err(malformed());
        };
        let mut entries = fields.iter();
        let (Some((tag, inner)), None) = (entries.next(), entries.next()) else {
            return Err(malformed());
        };
        let kind = match tag.as_str() {
            "send_funds" => {
                let (to, amount) = inner.as_pair().ok_or_else(malformed)?;
                Self::SendFunds {
                    to: to.as_address().cloned().ok_or_else(malformed)?,
                    amount: amount.as_nat().ok_or_else(malformed)?,
                }
            }
            "add_signee" => Self::AddSignee(inner.as_address().cloned().ok_or_else(malformed)?),
            "remove_signee" => {
                Self::RemoveSignee(inner.as_address().cloned().ok_or_else(malformed)?)
            }
            "set_threshold" => Self::SetThreshold(inner.as_nat().ok_or_else(malformed)?),
            _ => return Err(malformed()),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub kind: ProposalKind,
    pub proposer: Address,
    pub approvals: BTreeSet<Address>,
    pub executed: bool,
}

impl Proposal {
    pub fn new(kind: ProposalKind, proposer: Address) -> Self {
        Self {
            kind,
            proposer,
            approvals: BTreeSet::new(),
            executed: false,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::record([
            ("kind", self.kind.to_value()),
            ("proposer", Value::from(&self.proposer)),
            ("approvals", address_list(&self.approvals)),
            ("executed", Value::Bool(self.executed)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let f = Fields::new("Wallet proposal", value)?;
        Ok(Self {
            kind: ProposalKind::from_value(f.get("kind")?)?,
            proposer: f.address("proposer")?,
            approvals: f.address_set("approvals")?,
            executed: f.bool("executed")?,
        })
    }
}

/// Multisig wallet: signees vote on numbered proposals, and a proposal may
/// be executed once `threshold` signees approved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletStorage {
    pub signees: Vec<Address>,
    pub threshold: u64,
    /// Proposal lifetime in seconds.
    pub duration: u64,
    /// Id of the most recent proposal; 0 before the first one.
    pub proposal_id: u64,
    pub proposals: BTreeMap<u64, Proposal>,
}

impl WalletStorage {
    pub fn new(signees: Vec<Address>) -> Self {
        Self {
            signees,
            threshold: WALLET_THRESHOLD,
            duration: WALLET_DURATION_SECS,
            proposal_id: 0,
            proposals: BTreeMap::new(),
        }
    }

    pub fn is_signee(&self, address: &Address) -> bool {
        self.signees.contains(address)
    }

    pub fn proposal(&self, id: u64) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn to_value(&self) -> StorageValue {
        Value::record([
            ("signees", address_list(&self.signees)),
            ("threshold", Value::Nat(self.threshold)),
            ("duration", Value::Nat(self.duration)),
            ("proposal_id", Value::Nat(self.proposal_id)),
            (
                "proposals",
                Value::Map(
                    self.proposals
                        .iter()
                        .map(|(id, p)| (Value::Nat(*id), p.to_value()))
                        .collect(),
                ),
            ),
        ])
    }

    pub fn from_value(value: &StorageValue) -> Result<Self, DecodeError> {
        let f = Fields::new("Wallet", value)?;
        let signees = f
            .list("signees")?
            .iter()
            .map(|v| {
                v.as_address()
                    .cloned()
                    .ok_or_else(|| f.malformed("signees", "a list of addresses"))
            })
            .collect::<Result<_, _>>()?;
        let proposals = f
            .map("proposals")?
            .iter()
            .map(|(k, v)| {
                let id = k
                    .as_nat()
                    .ok_or_else(|| f.malformed("proposals", "keyed by nat"))?;
                Ok((id, Proposal::from_value(v)?))
            })
            .collect::<Result<_, DecodeError>>()?;

        Ok(Self {
            signees,
            threshold: f.nat("threshold")?,
            duration: f.nat("duration")?,
            proposal_id: f.nat("proposal_id")?,
            proposals,
        })
    }
}

// ---------------------------------------------------------------------------
// ContractStorage
// ---------------------------------------------------------------------------

/// Initial or queried storage of one of the known contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractStorage {
    Token(TokenStorage),
    Crowdsale(CrowdsaleStorage),
    Wallet(WalletStorage),
}

impl ContractStorage {
    pub fn kind(&self) -> ContractKind {
        match self {
            Self::Token(_) => ContractKind::Token,
            Self::Crowdsale(_) => ContractKind::Crowdsale,
            Self::Wallet(_) => ContractKind::Wallet,
        }
    }

    pub fn to_value(&self) -> StorageValue {
        match self {
            Self::Token(s) => s.to_value(),
            Self::Crowdsale(s) => s.to_value(),
            Self::Wallet(s) => s.to_value(),
        }
    }

    /// Decode a queried storage value as `kind`.
    pub fn from_value(kind: ContractKind, value: &StorageValue) -> Result<Self, DecodeError> {
        Ok(match kind {
            ContractKind::Token => Self::Token(TokenStorage::from_value(value)?),
            ContractKind::Crowdsale => Self::Crowdsale(CrowdsaleStorage::from_value(value)?),
            ContractKind::Wallet => Self::Wallet(WalletStorage::from_value(value)?),
        })
    }
}

impl From<TokenStorage> for ContractStorage {
    fn from(s: TokenStorage) -> Self {
        Self::Token(s)
    }
}

impl From<CrowdsaleStorage> for ContractStorage {
    fn from(s: CrowdsaleStorage) -> Self {
        Self::Crowdsale(s)
    }
}

impl From<WalletStorage> for ContractStorage {
    fn from(s: WalletStorage) -> Self {
        Self::Wallet(s)
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn optional_address(address: Option<&Address>) -> Value {
    match address {
        Some(a) => Value::some(Value::from(a)),
        None => Value::none(),
    }
}

fn nat_map(map: &BTreeMap<Address, u64>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::from(k), Value::Nat(*v)))
            .collect(),
    )
}

fn bytes_map(map: &BTreeMap<String, Vec<u8>>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::from(k.as_str()), Value::Bytes(v.clone())))
            .collect(),
    )
}

fn address_list<'a>(items: impl IntoIterator<Item = &'a Address>) -> Value {
    Value::List(items.into_iter().map(Value::from).collect())
}

/// Field access on a record with errors naming the contract and field.
struct Fields<'a> {
    contract: &'static str,
    value: &'a Value,
}

impl<'a> Fields<'a> {
    fn new(contract: &'static str, value: &'a Value) -> Result<Self, DecodeError> {
        match value {
            Value::Record(_) => Ok(Self { contract, value }),
            _ => Err(DecodeError::NotARecord { contract }),
        }
    }

    fn malformed(&self, field: &'static str, expected: &'static str) -> DecodeError {
        DecodeError::Malformed {
            contract: self.contract,
            field,
            expected,
        }
    }

    fn get(&self, field: &'static str) -> Result<&'a Value, DecodeError> {
        self.value.field(field).ok_or(DecodeError::MissingField {
            contract: self.contract,
            field,
        })
    }

    fn address(&self, field: &'static str) -> Result<Address, DecodeError> {
        self.get(field)?
            .as_address()
            .cloned()
            .ok_or_else(|| self.malformed(field, "an address"))
    }

    fn optional_address(&self, field: &'static str) -> Result<Option<Address>, DecodeError> {
        match self.get(field)?.as_option() {
            Some(None) => Ok(None),
            Some(Some(inner)) => inner
                .as_address()
                .cloned()
                .map(Some)
                .ok_or_else(|| self.malformed(field, "an optional address")),
            None => Err(self.malformed(field, "an optional address")),
        }
    }

    fn nat(&self, field: &'static str) -> Result<u64, DecodeError> {
        self.get(field)?
            .as_nat()
            .ok_or_else(|| self.malformed(field, "a nat"))
    }

    fn bool(&self, field: &'static str) -> Result<bool, DecodeError> {
        self.get(field)?
            .as_bool()
            .ok_or_else(|| self.malformed(field, "a bool"))
    }

    fn list(&self, field: &'static str) -> Result<&'a [Value], DecodeError> {
        self.get(field)?
            .as_list()
            .ok_or_else(|| self.malformed(field, "a list"))
    }

    fn map(&self, field: &'static str) -> Result<&'a [(Value, Value)], DecodeError> {
        self.get(field)?
            .as_map()
            .ok_or_else(|| self.malformed(field, "a map"))
    }

    fn address_set(&self, field: &'static str) -> Result<BTreeSet<Address>, DecodeError> {
        self.list(field)?
            .iter()
            .map(|v| {
                v.as_address()
                    .cloned()
                    .ok_or_else(|| self.malformed(field, "a list of addresses"))
            })
            .collect()
    }

    fn nat_map(&self, field: &'static str) -> Result<BTreeMap<Address, u64>, DecodeError> {
        self.map(field)?
            .iter()
            .map(|(k, v)| match (k.as_address(), v.as_nat()) {
                (Some(k), Some(v)) => Ok((k.clone(), v)),
                _ => Err(self.malformed(field, "a map of address to nat")),
            })
            .collect()
    }

    fn bytes_map(&self, field: &'static str) -> Result<BTreeMap<String, Vec<u8>>, DecodeError> {
        self.map(field)?
            .iter()
            .map(|(k, v)| match (k.as_str(), v.as_bytes()) {
                (Some(k), Some(v)) => Ok((k.to_string(), v.to_vec())),
                _ => Err(self.malformed(field, "a map of string to bytes")),
            })
            .collect()
    }
}
