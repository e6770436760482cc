use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OpError;

const ADDRESS_LEN: usize = 36;
const ADDRESS_PREFIXES: [&str; 5] = ["tz1", "tz2", "tz3", "tz4", "KT1"];
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const MAX_ENTRYPOINT_LEN: usize = 31;

// ---------------------------------------------------------------------------
// Address / OperationHash
// ---------------------------------------------------------------------------

/// A ledger account or contract address (`tz1…` implicit accounts, `KT1…`
/// originated contracts).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: impl Into<String>) -> Result<Self, OpError> {
        let raw = raw.into();
        if raw.len() != ADDRESS_LEN {
            return Err(OpError::InvalidOperation(format!(
                "address {raw:?} must be {ADDRESS_LEN} characters"
            )));
        }
        if !ADDRESS_PREFIXES.iter().any(|p| raw.starts_with(p)) {
            return Err(OpError::InvalidOperation(format!(
                "address {raw:?} has an unknown prefix"
            )));
        }
        if !raw[3..].chars().all(|c| BASE58_ALPHABET.contains(c)) {
            return Err(OpError::InvalidOperation(format!(
                "address {raw:?} is not base58"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an originated contract rather than an implicit account.
    pub fn is_contract(&self) -> bool {
        self.0.starts_with("KT1")
    }
}

impl TryFrom<String> for Address {
    type Error = OpError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash the node assigned to a broadcast operation. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationHash(String);

impl OperationHash {
    pub fn new(raw: impl Into<String>) -> Result<Self, OpError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OpError::Transport("node returned an empty operation hash".into()));
        }
        if trimmed.contains('/') || trimmed.contains(char::is_whitespace) {
            return Err(OpError::Transport(format!("malformed operation hash {raw:?}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationHash {
    type Error = OpError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<OperationHash> for String {
    fn from(hash: OperationHash) -> Self {
        hash.0
    }
}

impl fmt::Display for OperationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Typed values
// ---------------------------------------------------------------------------

/// A typed argument or storage value as exchanged with the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Nat(u64),
    String(String),
    Bytes(#[serde(with = "hex")] Vec<u8>),
    Address(Address),
    Option(Option<Box<Value>>),
    Pair(Box<Value>, Box<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(BTreeMap<String, Value>),
}

/// Storage of a deployed contract.
pub type StorageValue = Value;

impl Value {
    pub fn pair(left: Value, right: Value) -> Self {
        Self::Pair(Box::new(left), Box::new(right))
    }

    pub fn some(value: Value) -> Self {
        Self::Option(Some(Box::new(value)))
    }

    pub fn none() -> Self {
        Self::Option(None)
    }

    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_nat(&self) -> Option<u64> {
        match self {
            Self::Nat(n) => Some(*n),
            Self::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Nat(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(a) => Some(a),
            _ => None,
        }
    }

    /// `Some(None)` for an empty option, `None` if this is not an option.
    pub fn as_option(&self) -> Option<Option<&Value>> {
        match self {
            Self::Option(inner) => Some(inner.as_deref()),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&Value, &Value)> {
        match self {
            Self::Pair(l, r) => Some((l, r)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Named field of a record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Self::Record(fields) => fields.get_mut(name),
            _ => None,
        }
    }

    /// Value stored under `key` in a map.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace `key` in a map, keeping the entries sorted by their
    /// serialized key so encodings stay canonical.
    pub fn map_insert(&mut self, key: Value, value: Value) -> Option<Value> {
        let Self::Map(entries) = self else {
            return None;
        };
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        entries.push((key, value));
        entries.sort_by_cached_key(|(k, _)| serde_json::to_string(k).unwrap_or_default());
        None
    }

    pub fn map_remove(&mut self, key: &Value) -> Option<Value> {
        let Self::Map(entries) = self else {
            return None;
        };
        let idx = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(idx).1)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Address> for Value {
    fn from(a: Address) -> Self {
        Self::Address(a)
    }
}

impl From<&Address> for Value {
    fn from(a: &Address) -> Self {
        Self::Address(a.clone())
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Compiled contract code. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractCode(pub serde_json::Value);

impl ContractCode {
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(fields) => fields.is_empty(),
            serde_json::Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// The two legal operation shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    /// Contract creation: no target, no entrypoint.
    Originate {
        code: ContractCode,
        storage: StorageValue,
    },
    /// Call of an existing contract's entrypoint, or a plain transfer when
    /// `entrypoint` is `default` and there are no arguments.
    Invoke {
        target: Address,
        entrypoint: String,
        arguments: Vec<Value>,
    },
}

/// Everything needed to sign and broadcast one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Native-currency units moved with the operation.
    pub amount: u64,
}

impl OperationDescriptor {
    pub fn originate(code: ContractCode, storage: StorageValue) -> Self {
        Self {
            kind: OperationKind::Originate { code, storage },
            amount: 0,
        }
    }

    pub fn invoke(
        target: Address,
        entrypoint: impl Into<String>,
        arguments: Vec<Value>,
        amount: u64,
    ) -> Self {
        Self {
            kind: OperationKind::Invoke {
                target,
                entrypoint: entrypoint.into(),
                arguments,
            },
            amount,
        }
    }

    pub fn is_origination(&self) -> bool {
        matches!(self.kind, OperationKind::Originate { .. })
    }

    /// `None` for originations.
    pub fn target(&self) -> Option<&Address> {
        match &self.kind {
            OperationKind::Invoke { target, .. } => Some(target),
            OperationKind::Originate { .. } => None,
        }
    }

    /// `None` for originations.
    pub fn entrypoint(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::Invoke { entrypoint, .. } => Some(entrypoint),
            OperationKind::Originate { .. } => None,
        }
    }

    pub fn arguments(&self) -> &[Value] {
        match &self.kind {
            OperationKind::Invoke { arguments, .. } => arguments,
            OperationKind::Originate { .. } => &[],
        }
    }

    /// Reject descriptors that are not a consistent origination or
    /// invocation.
    pub fn validate(&self) -> Result<(), OpError> {
        match &self.kind {
            OperationKind::Originate { code, .. } => {
                if code.is_empty() {
                    return Err(OpError::InvalidOperation(
                        "origination requires non-empty contract code".into(),
                    ));
                }
            }
            OperationKind::Invoke { entrypoint, .. } => validate_entrypoint(entrypoint)?,
        }
        Ok(())
    }

    /// Bind the descriptor to a source account and replay counter.
    pub fn envelope(&self, source: Address, counter: u64) -> OperationEnvelope {
        OperationEnvelope {
            source,
            counter,
            operation: self.clone(),
        }
    }
}

fn validate_entrypoint(name: &str) -> Result<(), OpError> {
    if name.is_empty() {
        return Err(OpError::InvalidOperation("entrypoint name is empty".into()));
    }
    if name.len() > MAX_ENTRYPOINT_LEN {
        return Err(OpError::InvalidOperation(format!(
            "entrypoint {name:?} exceeds {MAX_ENTRYPOINT_LEN} characters"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%' | '@'));
    if !valid {
        return Err(OpError::InvalidOperation(format!(
            "entrypoint {name:?} contains invalid characters"
        )));
    }
    Ok(())
}

/// A descriptor bound to its source and counter; the unit that gets signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub source: Address,
    pub counter: u64,
    pub operation: OperationDescriptor,
}

impl OperationEnvelope {
    /// Deterministic byte encoding handed to the signer.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, OpError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Outcome of a successful broadcast. Never mutated after creation; a
/// resubmission yields a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub operation_hash: OperationHash,
    /// Present only for originations.
    pub originated_address: Option<Address>,
}
