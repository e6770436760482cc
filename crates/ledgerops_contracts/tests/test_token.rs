use std::sync::Arc;
use std::time::Duration;

use ledgerops_client::mock::{CallContext, ManualClock, MockLedger};
use ledgerops_client::{
    Address, ClientConfig, ContractCode, ErrorClass, InMemorySigner, LedgerClient, OpError,
    RetryPolicy, SerializedSigner, StorageValue, Value,
};
use ledgerops_contracts::storage::TOKEN_ID;
use ledgerops_contracts::*;

const ALICE: &str = "tz1MnmtP4uAcgMpeZN6JtyziXeFqqwQG6yn6";
const BOB: &str = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6";

const INITIAL_SUPPLY: u64 = 1_000_000_000;
const TOKENS_TO_TRANSFER: u64 = 10_000_000;

fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

fn token_code() -> ContractCode {
    ContractCode(serde_json::json!([
        { "prim": "parameter", "args": [{ "prim": "or" }] },
        { "prim": "storage", "args": [{ "prim": "pair" }] },
        { "prim": "code", "args": [[]] }
    ]))
}

/// Minimal FA2 token with an admin and a transfer allow-list.
fn token_contract(ctx: &CallContext<'_>, storage: &mut StorageValue) -> Result<(), String> {
    let mut token = TokenStorage::from_value(storage).map_err(|e| e.to_string())?;
    let call = TokenEntrypoint::decode(ctx.entrypoint, ctx.arguments, ctx.amount)
        .map_err(|e| e.to_string())?;
    let is_admin = *ctx.sender == token.admin;
    let admin_only = || {
        if is_admin {
            Ok(())
        } else {
            Err("Access denied".to_string())
        }
    };

    match call {
        TokenEntrypoint::Mint { to, amount } => {
            admin_only()?;
            *token.ledger.entry(to).or_default() += amount;
        }
        TokenEntrypoint::Transfer(batches) => {
            if token.paused {
                return Err("Contract paused".into());
            }
            for batch in batches {
                if !token.allowed.contains(&batch.from) {
                    return Err("TX Disallowed".into());
                }
                for tx in batch.txs {
                    if batch.from != *ctx.sender
                        && !token.is_operator(&batch.from, ctx.sender, tx.token_id)
                    {
                        return Err("FA2_NOT_OPERATOR".into());
                    }
                    let balance = token.balance(&batch.from);
                    if balance < tx.amount {
                        return Err("FA2_INSUFFICIENT_BALANCE".into());
                    }
                    token.ledger.insert(batch.from.clone(), balance - tx.amount);
                    *token.ledger.entry(tx.to).or_default() += tx.amount;
                }
            }
        }
        TokenEntrypoint::UpdateOperators(updates) => {
            for update in updates {
                match update {
                    OperatorUpdate::Add(key) if key.owner == *ctx.sender => {
                        token.operators.insert(key);
                    }
                    OperatorUpdate::Remove(key) if key.owner == *ctx.sender => {
                        token.operators.remove(&key);
                    }
                    _ => return Err("FA2_NOT_OWNER".into()),
                }
            }
        }
        TokenEntrypoint::AllowAddress { address, allowed } => {
            admin_only()?;
            if allowed {
                token.allowed.insert(address);
            } else {
                token.allowed.remove(&address);
            }
        }
        TokenEntrypoint::SetAdmin(candidate) => {
            admin_only()?;
            token.pending_admin = Some(candidate);
        }
        TokenEntrypoint::ConfirmAdmin => {
            if token.pending_admin.as_ref() != Some(ctx.sender) {
                return Err("Not pending admin".into());
            }
            token.admin = ctx.sender.clone();
            token.pending_admin = None;
        }
        TokenEntrypoint::Pause(paused) => {
            admin_only()?;
            token.paused = paused;
        }
    }

    *storage = token.to_value();
    Ok(())
}

struct Harness {
    ledger: Arc<MockLedger>,
    clock: Arc<ManualClock>,
    alice: LedgerClient,
    bob: LedgerClient,
    token: Address,
}

async fn setup() -> Harness {
    let ledger = Arc::new(MockLedger::new());
    ledger.register_code(token_code(), token_contract);
    let clock = Arc::new(ManualClock::new());

    let alice = LedgerClient::new(
        ledger.clone(),
        SerializedSigner::new(Arc::new(InMemorySigner::generate(addr(ALICE)))),
        ClientConfig {
            confirmation_depth: 1,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        },
    )
    .with_clock(clock.clone());
    let bob = alice.for_signer(SerializedSigner::new(Arc::new(InMemorySigner::generate(
        addr(BOB),
    ))));

    let origination = alice
        .originate(token_code(), TokenStorage::new(addr(ALICE)).to_value())
        .await
        .unwrap();
    alice.confirm(&origination).await.unwrap();
    let token = origination.originated_address.unwrap();

    Harness {
        ledger,
        clock,
        alice,
        bob,
        token,
    }
}

async fn token_storage(h: &Harness) -> TokenStorage {
    TokenStorage::from_value(&h.alice.query_storage(&h.token).await.unwrap()).unwrap()
}

async fn call(
    client: &LedgerClient,
    token: &Address,
    entrypoint: TokenEntrypoint,
) -> Result<(), OpError> {
    entrypoint
        .to_call()
        .send_and_confirm(client, token)
        .await
        .map(|_| ())
}

fn transfer(from: &str, to: &str, amount: u64) -> TokenEntrypoint {
    TokenEntrypoint::Transfer(vec![TransferBatch {
        from: addr(from),
        txs: vec![TransferTx {
            to: addr(to),
            token_id: TOKEN_ID,
            amount,
        }],
    }])
}

#[tokio::test]
async fn originated_token_has_initial_storage() {
    let h = setup().await;
    assert!(h.token.is_contract());
    let storage = token_storage(&h).await;
    assert_eq!(storage, TokenStorage::new(addr(ALICE)));
}

#[tokio::test]
async fn admin_mint_is_visible_in_storage() {
    let h = setup().await;
    let mint = TokenEntrypoint::Mint {
        to: addr(ALICE),
        amount: INITIAL_SUPPLY / 2,
    };
    call(&h.alice, &h.token, mint.clone()).await.unwrap();

    let raw = h.alice.query_storage(&h.token).await.unwrap();
    let balance = raw
        .field("ledger")
        .and_then(|ledger| ledger.map_get(&Value::from(addr(ALICE))))
        .and_then(Value::as_nat);
    assert_eq!(balance, Some(500_000_000));

    call(&h.alice, &h.token, mint).await.unwrap();
    assert_eq!(token_storage(&h).await.balance(&addr(ALICE)), INITIAL_SUPPLY);
}

#[tokio::test]
async fn non_admin_mint_is_rejected_with_contract_reason() {
    let h = setup().await;
    let mint = TokenEntrypoint::Mint {
        to: addr(ALICE),
        amount: INITIAL_SUPPLY,
    };

    // The node accepts the broadcast; the contract aborts on inclusion.
    let submission = mint.to_call().send(&h.bob, &h.token).await.unwrap();
    let err = h.bob.confirm(&submission).await.unwrap_err();

    assert_eq!(err.rejection_reason(), Some("Access denied"));
    assert_eq!(err.to_string(), "Access denied");
    assert_eq!(err.class(), ErrorClass::Application);
    assert_eq!(err.retry_policy(), RetryPolicy::Never);
    assert_eq!(token_storage(&h).await.balance(&addr(ALICE)), 0);
}

#[tokio::test]
async fn transfers_require_allow_list() {
    let h = setup().await;
    call(
        &h.alice,
        &h.token,
        TokenEntrypoint::Mint {
            to: addr(ALICE),
            amount: INITIAL_SUPPLY,
        },
    )
    .await
    .unwrap();

    let err = call(&h.alice, &h.token, transfer(ALICE, BOB, INITIAL_SUPPLY / 2))
        .await
        .unwrap_err();
    assert_eq!(err.rejection_reason(), Some("TX Disallowed"));

    assert!(!token_storage(&h).await.allowed.contains(&addr(ALICE)));
    call(
        &h.alice,
        &h.token,
        TokenEntrypoint::AllowAddress {
            address: addr(ALICE),
            allowed: true,
        },
    )
    .await
    .unwrap();
    assert!(token_storage(&h).await.allowed.contains(&addr(ALICE)));

    call(&h.alice, &h.token, transfer(ALICE, BOB, TOKENS_TO_TRANSFER))
        .await
        .unwrap();
    let storage = token_storage(&h).await;
    assert_eq!(storage.balance(&addr(ALICE)), INITIAL_SUPPLY - TOKENS_TO_TRANSFER);
    assert_eq!(storage.balance(&addr(BOB)), TOKENS_TO_TRANSFER);

    let err = call(&h.alice, &h.token, transfer(ALICE, BOB, INITIAL_SUPPLY))
        .await
        .unwrap_err();
    assert_eq!(err.rejection_reason(), Some("FA2_INSUFFICIENT_BALANCE"));
}

#[tokio::test]
async fn operators_may_move_owner_tokens() {
    let h = setup().await;
    call(
        &h.alice,
        &h.token,
        TokenEntrypoint::Mint {
            to: addr(ALICE),
            amount: 100,
        },
    )
    .await
    .unwrap();
    call(
        &h.alice,
        &h.token,
        TokenEntrypoint::AllowAddress {
            address: addr(ALICE),
            allowed: true,
        },
    )
    .await
    .unwrap();

    let err = call(&h.bob, &h.token, transfer(ALICE, BOB, 40)).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some("FA2_NOT_OPERATOR"));

    let key = OperatorKey {
        owner: addr(ALICE),
        operator: addr(BOB),
        token_id: TOKEN_ID,
    };
    call(
        &h.alice,
        &h.token,
        TokenEntrypoint::UpdateOperators(vec![OperatorUpdate::Add(key)]),
    )
    .await
    .unwrap();
    call(&h.bob, &h.token, transfer(ALICE, BOB, 40)).await.unwrap();
    assert_eq!(token_storage(&h).await.balance(&addr(BOB)), 40);
}

#[tokio::test]
async fn admin_handover_needs_confirmation() {
    let h = setup().await;
    call(&h.alice, &h.token, TokenEntrypoint::SetAdmin(addr(BOB)))
        .await
        .unwrap();
    let storage = token_storage(&h).await;
    assert_eq!(storage.admin, addr(ALICE));
    assert_eq!(storage.pending_admin, Some(addr(BOB)));

    let err = call(&h.alice, &h.token, TokenEntrypoint::ConfirmAdmin)
        .await
        .unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Not pending admin"));

    call(&h.bob, &h.token, TokenEntrypoint::ConfirmAdmin).await.unwrap();
    let storage = token_storage(&h).await;
    assert_eq!(storage.admin, addr(BOB));
    assert!(storage.pending_admin.is_none());

    let err = call(&h.alice, &h.token, TokenEntrypoint::Pause(true))
        .await
        .unwrap_err();
    assert_eq!(err.rejection_reason(), Some("Access denied"));
}

#[tokio::test]
async fn confirmation_slower_than_timeout_reports_timeout() {
    let h = setup().await;
    h.ledger.set_inclusion_latency(1_000);
    let started = h.clock.elapsed();

    let submission = TokenEntrypoint::Pause(true)
        .to_call()
        .send(&h.alice, &h.token)
        .await
        .unwrap();
    let err = h.alice.confirm(&submission).await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.class(), ErrorClass::Pending);
    assert_eq!(err.retry_policy(), RetryPolicy::Repoll);
    assert_eq!(h.clock.elapsed() - started, Duration::from_secs(120));
    // Polling never rebroadcasts.
    assert_eq!(h.ledger.broadcast_count(), 2);
}
