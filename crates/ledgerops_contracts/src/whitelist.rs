use std::io::Read;

use anyhow::{Context, Result, bail};
use ledgerops_client::{Address, Confirmed, LedgerClient, OpError};
use tracing::info;

use crate::entrypoints::{CrowdsaleEntrypoint, Entrypoint};

/// Lot allowance granted when a row does not name one.
pub const DEFAULT_ALLOWANCE: u64 = 2;

/// Confirmation depth awaited after a whitelist batch.
pub const WHITELIST_CONFIRMATIONS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub address: Address,
    /// Lots the address may buy.
    pub allowance: u64,
}

/// Parse whitelist rows of the form `address[,allowance]`.
///
/// There is no header row. Blank lines are skipped and fields are trimmed;
/// rows without an allowance get `default_allowance`. Row order is kept.
pub fn parse_whitelist(input: impl Read, default_allowance: u64) -> Result<Vec<WhitelistEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut entries = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read whitelist row {}", idx + 1))?;
        let row = record.position().map_or(idx as u64 + 1, |pos| pos.line());
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() > 2 {
            bail!(
                "Whitelist row {row}: expected `address[,allowance]`, got {} fields",
                record.len()
            );
        }

        let address = Address::parse(&record[0])
            .with_context(|| format!("Whitelist row {row}: invalid address"))?;
        let allowance = match record.get(1).filter(|field| !field.is_empty()) {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Whitelist row {row}: invalid allowance {raw:?}"))?,
            None => default_allowance,
        };
        entries.push(WhitelistEntry { address, allowance });
    }

    Ok(entries)
}

/// Whitelist every entry on `crowdsale` in one `whitelist_add` call and
/// wait for it to be included.
pub async fn whitelist(
    client: &LedgerClient,
    crowdsale: &Address,
    entries: &[WhitelistEntry],
) -> Result<Confirmed, OpError> {
    if entries.is_empty() {
        return Err(OpError::InvalidOperation("whitelist is empty".into()));
    }
    info!(
        admin = %client.address(),
        crowdsale = %crowdsale,
        count = entries.len(),
        "whitelisting addresses"
    );

    let call = CrowdsaleEntrypoint::WhitelistAdd(
        entries
            .iter()
            .map(|entry| (entry.address.clone(), entry.allowance))
            .collect(),
    )
    .to_call();
    let submission = call.send(client, crowdsale).await?;
    let config = client.config();
    client
        .await_confirmation(
            &submission.operation_hash,
            WHITELIST_CONFIRMATIONS,
            config.poll_interval,
            config.timeout,
        )
        .await
}
