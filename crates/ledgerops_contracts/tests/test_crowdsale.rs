use std::sync::Arc;
use std::time::Duration;

use ledgerops_client::mock::{CallContext, ManualClock, MockLedger};
use ledgerops_client::{
    Address, ClientConfig, ContractCode, InMemorySigner, LedgerClient, OpError, SerializedSigner,
    StorageValue,
};
use ledgerops_contracts::*;

const ADMIN: &str = "tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb";
const ALICE: &str = "tz1MnmtP4uAcgMpeZN6JtyziXeFqqwQG6yn6";
const BOB: &str = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6";

fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

fn artifact(name: &str) -> ContractArtifact {
    let json = serde_json::json!({
        "contractName": name,
        "michelson": [
            { "prim": "parameter", "annots": [format!("%{name}")] },
            { "prim": "storage" },
            { "prim": "code", "args": [[]] }
        ]
    });
    ContractArtifact::from_json(&json.to_string(), name).unwrap()
}

/// Lot sale restricted to whitelisted buyers.
fn crowdsale_contract(ctx: &CallContext<'_>, storage: &mut StorageValue) -> Result<(), String> {
    let mut sale = CrowdsaleStorage::from_value(storage).map_err(|e| e.to_string())?;
    let call = CrowdsaleEntrypoint::decode(ctx.entrypoint, ctx.arguments, ctx.amount)
        .map_err(|e| e.to_string())?;
    let is_admin = *ctx.sender == sale.admin;

    match call {
        CrowdsaleEntrypoint::WhitelistAdd(entries) => {
            if !is_admin {
                return Err("Access denied".into());
            }
            sale.whitelisted.extend(entries);
        }
        CrowdsaleEntrypoint::WhitelistRemove(addresses) => {
            if !is_admin {
                return Err("Access denied".into());
            }
            for address in addresses {
                sale.whitelisted.remove(&address);
            }
        }
        CrowdsaleEntrypoint::Buy { lots, amount } => {
            if sale.paused {
                return Err("Sale paused".into());
            }
            let allowance = sale.allowance(ctx.sender);
            if allowance == 0 {
                return Err("Not whitelisted".into());
            }
            if lots > allowance {
                return Err("Allowance exceeded".into());
            }
            if lots > sale.remaining() {
                return Err("Sold out".into());
            }
            if Some(amount) != lots.checked_mul(sale.lot_price) {
                return Err("Wrong amount".into());
            }
            sale.sold += lots;
            sale.whitelisted.insert(ctx.sender.clone(), allowance - lots);
        }
        CrowdsaleEntrypoint::Pause(paused) => {
            if !is_admin {
                return Err("Access denied".into());
            }
            sale.paused = paused;
        }
    }

    *storage = sale.to_value();
    Ok(())
}

fn client_for(ledger: &Arc<MockLedger>, clock: &Arc<ManualClock>, who: &str) -> LedgerClient {
    LedgerClient::new(
        ledger.clone(),
        SerializedSigner::new(Arc::new(InMemorySigner::generate(addr(who)))),
        ClientConfig {
            confirmation_depth: 2,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        },
    )
    .with_clock(clock.clone())
}

struct Harness {
    admin: LedgerClient,
    alice: LedgerClient,
    crowdsale: Address,
    token: Address,
    registry: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn setup() -> Harness {
    let ledger = Arc::new(MockLedger::new());
    let crowdsale_artifact = artifact("Tokensale");
    ledger.register_code(crowdsale_artifact.code.clone(), crowdsale_contract);
    let clock = Arc::new(ManualClock::new());
    let admin = client_for(&ledger, &clock, ADMIN);
    let alice = client_for(&ledger, &clock, ALICE);

    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("deployments.json");
    let mut deployer = Deployer::new(&admin, Deployments::default()).persist_to(&registry);

    let token = deployer
        .migrate(
            ContractKind::Token.key(),
            &artifact("Token"),
            &TokenStorage::new(addr(ADMIN)).into(),
        )
        .await
        .unwrap()
        .address;
    let crowdsale = deployer
        .migrate(
            ContractKind::Crowdsale.key(),
            &crowdsale_artifact,
            &CrowdsaleStorage::new(addr(ADMIN), token.clone()).into(),
        )
        .await
        .unwrap()
        .address;

    Harness {
        admin,
        alice,
        crowdsale,
        token,
        registry,
        _dir: dir,
    }
}

async fn sale_storage(h: &Harness) -> CrowdsaleStorage {
    CrowdsaleStorage::from_value(&h.admin.query_storage(&h.crowdsale).await.unwrap()).unwrap()
}

async fn buy(h: &Harness, lots: u64, amount: u64) -> Result<(), OpError> {
    CrowdsaleEntrypoint::Buy { lots, amount }
        .to_call()
        .send_and_confirm(&h.alice, &h.crowdsale)
        .await
        .map(|_| ())
}

#[tokio::test]
async fn migrations_are_recorded() {
    let h = setup().await;
    let deployments = Deployments::load_from_file(&h.registry).unwrap();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments.address("token"), Some(&h.token));
    assert_eq!(deployments.address("crowdsale"), Some(&h.crowdsale));
    assert_eq!(
        deployments.get("crowdsale").map(|r| r.kind),
        Some(ContractKind::Crowdsale)
    );

    let sale = sale_storage(&h).await;
    assert_eq!(sale.token, h.token);
    assert_eq!(sale.owner, addr(ADMIN));
    assert_eq!(sale.supply, 100);
    assert_eq!(sale.sold, 0);
}

#[tokio::test]
async fn csv_whitelist_is_applied_in_one_batch() {
    let h = setup().await;
    let csv = format!("{ALICE}\n{BOB},5\n");
    let entries = parse_whitelist(csv.as_bytes(), DEFAULT_ALLOWANCE).unwrap();

    let confirmed = whitelist(&h.admin, &h.crowdsale, &entries).await.unwrap();
    assert!(confirmed.depth >= 1);

    let sale = sale_storage(&h).await;
    assert_eq!(sale.allowance(&addr(ALICE)), 2);
    assert_eq!(sale.allowance(&addr(BOB)), 5);
}

#[tokio::test]
async fn empty_whitelist_is_not_sent() {
    let h = setup().await;
    let err = whitelist(&h.admin, &h.crowdsale, &[]).await.unwrap_err();
    assert!(matches!(err, OpError::InvalidOperation(_)));
}

#[tokio::test]
async fn only_admin_may_whitelist() {
    let h = setup().await;
    let entries = vec![WhitelistEntry {
        address: addr(ALICE),
        allowance: 100,
    }];
    let err = whitelist(&h.alice, &h.crowdsale, &entries).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Access denied"));
}

#[tokio::test]
async fn whitelisted_buyer_spends_allowance() {
    let h = setup().await;
    let err = buy(&h, 1, 3_330_000).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Not whitelisted"));

    let entries = vec![WhitelistEntry {
        address: addr(ALICE),
        allowance: DEFAULT_ALLOWANCE,
    }];
    whitelist(&h.admin, &h.crowdsale, &entries).await.unwrap();

    let err = buy(&h, 1, 1).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Wrong amount"));

    let purchase = CrowdsaleEntrypoint::buy(2, 3_330_000).unwrap();
    purchase
        .to_call()
        .send_and_confirm(&h.alice, &h.crowdsale)
        .await
        .unwrap();
    let sale = sale_storage(&h).await;
    assert_eq!(sale.sold, 2);
    assert_eq!(sale.allowance(&addr(ALICE)), 0);
    assert_eq!(sale.remaining(), 98);

    let err = buy(&h, 1, 3_330_000).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Not whitelisted"));
}

#[tokio::test]
async fn paused_sale_refuses_buyers() {
    let h = setup().await;
    whitelist(
        &h.admin,
        &h.crowdsale,
        &[WhitelistEntry {
            address: addr(ALICE),
            allowance: 3,
        }],
    )
    .await
    .unwrap();
    CrowdsaleEntrypoint::Pause(true)
        .to_call()
        .send_and_confirm(&h.admin, &h.crowdsale)
        .await
        .unwrap();

    let err = buy(&h, 1, 3_330_000).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Sale paused"));

    CrowdsaleEntrypoint::WhitelistRemove(vec![addr(ALICE)])
        .to_call()
        .send_and_confirm(&h.admin, &h.crowdsale)
        .await
        .unwrap();
    assert_eq!(sale_storage(&h).await.allowance(&addr(ALICE)), 0);
}
