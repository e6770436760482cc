use thiserror::Error;

/// A storage value or call that does not have the shape its contract
/// expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{contract} storage is not a record")]
    NotARecord { contract: &'static str },

    #[error("{contract} storage has no field `{field}`")]
    MissingField {
        contract: &'static str,
        field: &'static str,
    },

    #[error("{contract} storage field `{field}` is not {expected}")]
    Malformed {
        contract: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown contract `{0}`")]
    UnknownContract(String),

    #[error("unknown entrypoint `{0}`")]
    UnknownEntrypoint(String),

    #[error("entrypoint `{entrypoint}` expects {expected}")]
    Arguments {
        entrypoint: String,
        expected: &'static str,
    },
}
