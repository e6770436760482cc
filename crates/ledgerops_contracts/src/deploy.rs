use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use ledgerops_client::{Address, ContractCode, LedgerClient, OperationHash};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{ContractKind, ContractStorage};

/// Compiled contract as produced by the contract build step: a JSON
/// document whose `michelson` field holds the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub code: ContractCode,
}

#[derive(Deserialize)]
struct BuildOutput {
    #[serde(rename = "contractName")]
    contract_name: Option<String>,
    michelson: Option<serde_json::Value>,
}

impl ContractArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract artifact: {}", path.display()))?;
        let fallback = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json(&json, &fallback)
            .with_context(|| format!("Invalid contract artifact: {}", path.display()))
    }

    /// Parse a build JSON document. `fallback_name` is used when the
    /// document does not carry a `contractName`.
    pub fn from_json(json: &str, fallback_name: &str) -> Result<Self> {
        let output: BuildOutput =
            serde_json::from_str(json).context("artifact is not valid JSON")?;
        let code = ContractCode(output.michelson.unwrap_or(serde_json::Value::Null));
        if code.is_empty() {
            bail!("artifact has no `michelson` code");
        }
        Ok(Self {
            name: output.contract_name.unwrap_or_else(|| fallback_name.to_string()),
            code,
        })
    }
}

// ---------------------------------------------------------------------------
// Deployment registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub kind: ContractKind,
    pub address: Address,
    pub operation_hash: OperationHash,
    pub deployed_at: DateTime<Utc>,
}

/// Deployed contracts by name, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    contracts: BTreeMap<String, DeploymentRecord>,
}

impl Deployments {
    pub fn get(&self, name: &str) -> Option<&DeploymentRecord> {
        self.contracts.get(name)
    }

    pub fn address(&self, name: &str) -> Option<&Address> {
        self.get(name).map(|record| &record.address)
    }

    /// Record a deployment, replacing any earlier one under `name`.
    pub fn record(&mut self, name: impl Into<String>, record: DeploymentRecord) {
        let name = name.into();
        info!(name = %name, address = %record.address, "deployment recorded");
        self.contracts.insert(name, record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeploymentRecord)> {
        self.contracts.iter().map(|(name, record)| (name.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize deployments")?;
        std::fs::write(path, json).context("failed to write deployments file")?;
        info!(path = %path.display(), count = self.contracts.len(), "deployments saved");
        Ok(())
    }

    /// Returns an empty registry if the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "deployments file not found, starting empty");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path).context("failed to read deployments file")?;
        let deployments: Self =
            serde_json::from_str(&json).context("failed to deserialize deployments")?;
        Ok(deployments)
    }
}

// ---------------------------------------------------------------------------
// Deployer
// ---------------------------------------------------------------------------

/// Originates contracts and keeps the deployment registry up to date.
pub struct Deployer<'a> {
    client: &'a LedgerClient,
    deployments: Deployments,
    path: Option<PathBuf>,
}

impl<'a> Deployer<'a> {
    pub fn new(client: &'a LedgerClient, deployments: Deployments) -> Self {
        Self {
            client,
            deployments,
            path: None,
        }
    }

    /// Save the registry to `path` after every deployment.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn deployments(&self) -> &Deployments {
        &self.deployments
    }

    pub fn into_deployments(self) -> Deployments {
        self.deployments
    }

    /// Originate `artifact` with `storage`, wait for the client's
    /// confirmation depth and record the new address under `name`.
    pub async fn migrate(
        &mut self,
        name: &str,
        artifact: &ContractArtifact,
        storage: &ContractStorage,
    ) -> Result<DeploymentRecord> {
        info!(name, artifact = %artifact.name, kind = %storage.kind(), "deploying contract");

        let submission = self
            .client
            .originate(artifact.code.clone(), storage.to_value())
            .await?;
        let confirmed = self.client.confirm(&submission).await?;
        let address = submission
            .originated_address
            .context("origination did not report a contract address")?;

        info!(name, address = %address, depth = confirmed.depth, "contract deployed");
        let record = DeploymentRecord {
            kind: storage.kind(),
            address,
            operation_hash: submission.operation_hash,
            deployed_at: Utc::now(),
        };
        self.deployments.record(name, record.clone());
        if let Some(path) = &self.path {
            self.deployments.save_to_file(path)?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_from_build_json() {
        let json = r#"{ "contractName": "Token", "michelson": [{ "prim": "parameter" }] }"#;
        let artifact = ContractArtifact::from_json(json, "fallback").unwrap();
        assert_eq!(artifact.name, "Token");
        assert!(!artifact.code.is_empty());
    }

    #[test]
    fn test_artifact_name_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Wallet.json");
        std::fs::write(&path, r#"{ "michelson": [{ "prim": "code" }] }"#).unwrap();
        let artifact = ContractArtifact::load(&path).unwrap();
        assert_eq!(artifact.name, "Wallet");
    }

    #[test]
    fn test_artifact_without_code_is_rejected() {
        assert!(ContractArtifact::from_json(r#"{ "contractName": "Token" }"#, "x").is_err());
        assert!(ContractArtifact::from_json(r#"{ "michelson": [] }"#, "x").is_err());
        assert!(ContractArtifact::from_json("not json", "x").is_err());
    }

    #[test]
    fn test_deployments_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deployments.json");

        let mut deployments = Deployments::default();
        deployments.record(
            "crowdsale",
            DeploymentRecord {
                kind: ContractKind::Crowdsale,
                address: Address::parse("KT1N1vyj1NLBtoydL5YH7TLnvdLiqqV2JwGB").unwrap(),
                operation_hash: OperationHash::new("ooTestHash").unwrap(),
                deployed_at: Utc::now(),
            },
        );
        deployments.save_to_file(&path).unwrap();

        let loaded = Deployments::load_from_file(&path).unwrap();
        assert_eq!(loaded, deployments);
        assert_eq!(
            loaded.address("crowdsale").map(Address::as_str),
            Some("KT1N1vyj1NLBtoydL5YH7TLnvdLiqqV2JwGB")
        );
        assert!(loaded.get("token").is_none());
    }

    #[test]
    fn test_missing_deployments_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Deployments::load_from_file(&dir.path().join("none.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
