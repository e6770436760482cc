// Typed contract layer: storages, entrypoint calls, deployment and whitelisting.

pub mod deploy;
pub mod entrypoints;
pub mod error;
pub mod storage;
pub mod whitelist;

pub use deploy::{ContractArtifact, Deployer, DeploymentRecord, Deployments};
pub use entrypoints::{
    ContractCall, CrowdsaleEntrypoint, Entrypoint, OperatorUpdate, TokenEntrypoint, TransferBatch,
    TransferTx, WalletEntrypoint,
};
pub use error::DecodeError;
pub use storage::{
    ContractKind, ContractStorage, CrowdsaleStorage, OperatorKey, Proposal, ProposalKind,
    TokenInfo, TokenStorage, WalletStorage,
};
pub use whitelist::{DEFAULT_ALLOWANCE, WhitelistEntry, parse_whitelist, whitelist};
