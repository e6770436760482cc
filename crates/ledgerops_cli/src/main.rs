use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use ledgerops_client::{
    Address, HttpRpc, InMemorySigner, LedgerClient, LedgerRpc, OpError, OperationHash, Signer,
};
use ledgerops_contracts::{
    ContractArtifact, ContractKind, ContractStorage, CrowdsaleStorage, DEFAULT_ALLOWANCE, Deployer,
    Deployments, TokenStorage, WalletStorage, parse_whitelist, whitelist,
};
use ledgerops_core::{LedgerConfig, logging};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hex-encoded ed25519 seed of the admin key.
const ENV_SECRET_KEY: &str = "ADMIN_SECRET_KEY";
/// Account address of the admin key.
const ENV_ADDRESS: &str = "ADMIN_ADDRESS";

/// Token units minted to the admin at token origination.
const INITIAL_TOKEN_SUPPLY: u64 = 1_000_000_000_000;

#[derive(Parser, Debug)]
#[command(name = "ledgerops", version, about = "Deploy and operate ledger contracts")]
struct Cli {
    /// Config file [default: ~/.ledgerops/config.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Node RPC URL, overriding the config file
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Originate a contract and record its address
    Migrate {
        #[arg(value_enum)]
        contract: ContractArg,

        /// Compiled build JSON [default: build/<Contract>.json]
        #[arg(long)]
        artifact: Option<PathBuf>,
    },

    /// Whitelist the addresses of a CSV file on the crowdsale
    Whitelist {
        /// Crowdsale address [default: the recorded deployment]
        #[arg(long)]
        crowdsale: Option<Address>,

        /// Rows of `address[,allowance]`, no header
        #[arg(long, default_value = "whitelisted.csv")]
        csv: PathBuf,

        /// Lots granted to rows without an allowance
        #[arg(long, default_value_t = DEFAULT_ALLOWANCE)]
        allowance: u64,
    },

    /// Print the current storage of a contract
    Storage {
        address: Address,

        /// Decode the storage as this contract
        #[arg(long, value_enum)]
        kind: Option<ContractArg>,
    },

    /// Print the confirmation status of an operation
    Status { hash: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContractArg {
    Token,
    Crowdsale,
    Wallet,
}

impl From<ContractArg> for ContractKind {
    fn from(arg: ContractArg) -> Self {
        match arg {
            ContractArg::Token => ContractKind::Token,
            ContractArg::Crowdsale => ContractKind::Crowdsale,
            ContractArg::Wallet => ContractKind::Wallet,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging()
        .inspect_err(|e| eprintln!("File logging unavailable: {e:#}"))
        .ok();
    info!("ledgerops v{VERSION}");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Print a failure with its class so operators can tell a contract
/// rejection from a node or network problem.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<OpError>() {
        Some(op) => {
            error!(class = ?op.class(), retry = ?op.retry_policy(), "{op}");
            eprintln!("error ({:?}): {op}", op.class());
        }
        None => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => LedgerConfig::config_path()?,
    };
    let mut config = LedgerConfig::load_from_path(&config_path)?;
    config.apply_env()?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    config.validate()?;

    match cli.command {
        Command::Migrate { contract, artifact } => {
            migrate(&config, &config_path, contract.into(), artifact).await
        }
        Command::Whitelist {
            crowdsale,
            csv,
            allowance,
        } => run_whitelist(&config, &config_path, crowdsale, &csv, allowance).await,
        Command::Storage { address, kind } => {
            let rpc = HttpRpc::with_timeout(&config.rpc_url, config.request_timeout())?;
            let value = rpc.contract_storage(&address).await?;
            match kind {
                Some(kind) => {
                    let storage = ContractStorage::from_value(kind.into(), &value)?;
                    println!("{storage:#?}");
                }
                None => println!("{}", serde_json::to_string_pretty(&value)?),
            }
            Ok(())
        }
        Command::Status { hash } => {
            let hash = OperationHash::new(hash)?;
            let rpc = HttpRpc::with_timeout(&config.rpc_url, config.request_timeout())?;
            let status = rpc.operation_status(&hash).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn load_signer() -> Result<InMemorySigner> {
    let secret = std::env::var(ENV_SECRET_KEY)
        .with_context(|| format!("{ENV_SECRET_KEY} is not set"))?;
    let address = std::env::var(ENV_ADDRESS).with_context(|| format!("{ENV_ADDRESS} is not set"))?;
    let address = Address::parse(address.trim())?;
    Ok(InMemorySigner::from_secret_hex(secret.trim(), address)?)
}

/// Deployment registry kept next to the config file.
fn deployments_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name("deployments.json")
}

/// Address of an earlier deployment: the registry first, then the config's
/// `deployments` table.
fn resolve_deployment(
    config: &LedgerConfig,
    deployments: &Deployments,
    kind: ContractKind,
) -> Result<Address> {
    if let Some(address) = deployments.address(kind.key()) {
        return Ok(address.clone());
    }
    match config.deployment(kind.key()) {
        Some(raw) => Address::parse(raw)
            .with_context(|| format!("Invalid {kind} address in config: {raw}")),
        None => bail!("No {kind} deployment recorded; deploy it first or pass its address"),
    }
}

async fn migrate(
    config: &LedgerConfig,
    config_path: &Path,
    kind: ContractKind,
    artifact: Option<PathBuf>,
) -> Result<()> {
    let signer = load_signer()?;
    let admin = signer.public_key_hash();
    let client = LedgerClient::from_config(config, Arc::new(signer))?;

    let registry_path = deployments_path(config_path);
    let deployments = Deployments::load_from_file(&registry_path)?;
    let storage: ContractStorage = match kind {
        ContractKind::Token => TokenStorage::new(admin.clone())
            .with_balance(admin, INITIAL_TOKEN_SUPPLY)
            .into(),
        ContractKind::Crowdsale => {
            let token = resolve_deployment(config, &deployments, ContractKind::Token)?;
            CrowdsaleStorage::new(admin, token).into()
        }
        ContractKind::Wallet => WalletStorage::new(vec![admin]).into(),
    };

    let artifact_path = artifact
        .unwrap_or_else(|| PathBuf::from("build").join(format!("{}.json", kind.artifact_name())));
    let artifact = ContractArtifact::load(&artifact_path)?;

    println!("Deploying {kind}");
    let mut deployer = Deployer::new(&client, deployments).persist_to(registry_path);
    let record = deployer.migrate(kind.key(), &artifact, &storage).await?;

    // Record the address in the stored config, without the env/CLI overrides.
    let mut stored = LedgerConfig::load_from_path(config_path)?;
    stored
        .deployments
        .insert(kind.key().to_string(), record.address.to_string());
    stored.save_to_path(config_path)?;

    println!("Address: {}", record.address);
    Ok(())
}

async fn run_whitelist(
    config: &LedgerConfig,
    config_path: &Path,
    crowdsale: Option<Address>,
    csv: &Path,
    allowance: u64,
) -> Result<()> {
    let crowdsale = match crowdsale {
        Some(address) => address,
        None => {
            let deployments = Deployments::load_from_file(&deployments_path(config_path))?;
            resolve_deployment(config, &deployments, ContractKind::Crowdsale)?
        }
    };
    let file = File::open(csv).with_context(|| format!("Failed to open {}", csv.display()))?;
    let entries = parse_whitelist(file, allowance)?;

    let client = LedgerClient::from_config(config, Arc::new(load_signer()?))?;
    println!(
        "Admin: {}, whitelisting {} addresses",
        client.address(),
        entries.len()
    );
    let confirmed = whitelist(&client, &crowdsale, &entries).await?;
    println!("Done! ({} at depth {})", confirmed.operation_hash, confirmed.depth);
    Ok(())
}
