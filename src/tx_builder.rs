//! Constructeur de transaction — assemble la transaction atomique d'arbitrage:
//! [compute budget] -> [borrow] -> [swap jambe 1] -> ... -> [swap jambe N] -> [repay] -> [tip?]

use std::collections::HashSet;
use std::sync::Arc;
use anyhow::{Result, anyhow};
use base64::Engine as _;
use serde_json::Value;
use solana_client::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};

use crate::aggregator::{Quote, QuoteProvider, QuoteSource};
use crate::flash_loan::FlashLoanClient;
use crate::lookup_table::parse_alt_account;
use crate::pool_decoder::Dex;
use crate::utils::math::ceil_div;

/// Étiquette de filtre de venue Jupiter (`dexes=`) correspondant à une famille d'AMM.
pub fn venue_label_for_dex(dex: Dex) -> &'static str {
    match dex {
        Dex::RaydiumClmm => "Raydium CLMM",
        Dex::RaydiumV4 => "Raydium",
        Dex::Orca => "Whirlpool",
        Dex::Meteora => "Meteora DLMM",
    }
}

/// Une jambe planifiée de la transaction. Le montant de la première jambe est
/// le principal emprunté; les jambes suivantes reçoivent leur montant de la
/// sortie de la quote précédente au moment de la construction.
#[derive(Debug, Clone)]
pub struct LegPlan {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub venue_filter: Option<&'static str>,
}

pub struct BuiltTransaction {
    pub tx: VersionedTransaction,
    pub blockhash: solana_sdk::hash::Hash,
    pub last_valid_block_height: u64,
}

fn deserialize_jupiter_ix(raw: &Value) -> Result<Instruction> {
    let program_id: Pubkey = raw.get("programId")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("instruction sans programId"))?
        .parse()
        .map_err(|e| anyhow!("programId invalide: {}", e))?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(raw.get("data").and_then(Value::as_str).unwrap_or_default())
        .map_err(|e| anyhow!("data base64 invalide: {}", e))?;

    let accounts_raw = raw.get("accounts")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("instruction sans liste de comptes"))?;

    let mut accounts = Vec::with_capacity(accounts_raw.len());
    for a in accounts_raw {
        let pubkey: Pubkey = a.get("pubkey").and_then(Value::as_str)
            .ok_or_else(|| anyhow!("compte sans pubkey"))?
            .parse()
            .map_err(|e| anyhow!("pubkey de compte invalide: {}", e))?;
        let is_signer = a.get("isSigner").and_then(Value::as_bool).unwrap_or(false);
        let is_writable = a.get("isWritable").and_then(Value::as_bool).unwrap_or(false);
        accounts.push(if is_writable {
            AccountMeta::new(pubkey, is_signer)
        } else {
            AccountMeta::new_readonly(pubkey, is_signer)
        });
    }

    Ok(Instruction { program_id, accounts, data })
}

/// Renvoie les instructions swap-instructions Jupiter pour une quote. Si la
/// quote provenait de Raydium, redemande une quote Jupiter équivalente d'abord
/// (le format `raw` de Raydium n'est pas compatible avec `/swap-instructions`).
async fn fetch_leg_instructions(quotes: &QuoteProvider, quote: &Quote, borrower: &str) -> Result<Value> {
    let raw = if quote.source == QuoteSource::Jupiter {
        quote.raw.clone()
    } else {
        let jup = quotes.jupiter_only_quote(&quote.input_mint, &quote.output_mint, quote.in_amount, quote.slippage_bps).await?;
        jup.raw
    };
    quotes.get_jupiter_swap_instructions(&raw, borrower).await
}

/// Construit et signe la transaction atomique d'arbitrage. Ne l'envoie pas.
#[allow(clippy::too_many_arguments)]
pub async fn build_arb_transaction(
    rpc: Arc<RpcClient>,
    borrower: &Keypair,
    borrower_token_account: Pubkey,
    flash_loan: &FlashLoanClient,
    quotes: &QuoteProvider,
    mut legs: Vec<LegPlan>,
    borrow_amount: u64,
    flash_loan_fee_bps: u64,
    slippage_bps: u16,
    compute_unit_price: u64,
    compute_unit_limit: u32,
    tip_ix: Option<Instruction>,
) -> Result<BuiltTransaction> {
    if legs.is_empty() {
        return Err(anyhow!("au moins une jambe requise"));
    }

    let borrower_pk = borrower.pubkey();
    let borrower_str = borrower_pk.to_string();

    // 1. Quotes séquentielles: la sortie d'une jambe alimente le montant de la suivante.
    let mut leg_quotes: Vec<Quote> = Vec::with_capacity(legs.len());
    for (i, leg) in legs.iter_mut().enumerate() {
        if i > 0 {
            leg.amount = leg_quotes[i - 1].out_amount;
        }
        let quote = match quotes.get_quote_filtered(&leg.input_mint, &leg.output_mint, leg.amount, slippage_bps, leg.venue_filter).await {
            Ok(q) => q,
            Err(e) if leg.venue_filter.is_some() => {
                log::warn!("Quote filtrée jambe {} échouée ({}), repli sans filtre", i + 1, e);
                quotes.get_quote(&leg.input_mint, &leg.output_mint, leg.amount, slippage_bps).await?
            }
            Err(e) => return Err(e),
        };
        leg_quotes.push(quote);
    }

    // 2. Garde-fou de quote périmée
    let final_out = leg_quotes.last().unwrap().out_amount;
    let flash_fee = ceil_div(borrow_amount * flash_loan_fee_bps, 10_000);
    if final_out as i64 - borrow_amount as i64 - flash_fee as i64 <= 0 {
        return Err(anyhow!(
            "Plus rentable: sortie finale={}, requis>{}",
            final_out, borrow_amount + flash_fee,
        ));
    }

    // 3. Instructions de swap pour toutes les jambes, en parallèle
    let swap_futures = leg_quotes.iter().map(|q| fetch_leg_instructions(quotes, q, &borrower_str));
    let swap_responses: Vec<Value> = futures::future::try_join_all(swap_futures).await?;

    // 4. Flash loan borrow/repay
    let borrow_ix = flash_loan.build_borrow_ix(borrower_pk, borrower_token_account, borrow_amount);
    let repay_ix = flash_loan.build_repay_ix(borrower_pk, borrower_token_account);

    // 5. Assemblage de la séquence d'instructions
    let mut instructions = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(compute_unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(compute_unit_price),
        borrow_ix,
    ];

    let mut alt_addresses: HashSet<String> = HashSet::new();
    for swap in &swap_responses {
        if let Some(setup) = swap.get("setupInstructions").and_then(Value::as_array) {
            for ix in setup {
                instructions.push(deserialize_jupiter_ix(ix)?);
            }
        }
        let swap_ix = swap.get("swapInstruction").ok_or_else(|| anyhow!("réponse sans swapInstruction"))?;
        instructions.push(deserialize_jupiter_ix(swap_ix)?);
        if let Some(cleanup) = swap.get("cleanupInstruction").filter(|v| !v.is_null()) {
            instructions.push(deserialize_jupiter_ix(cleanup)?);
        }
        if let Some(alts) = swap.get("addressLookupTableAddresses").and_then(Value::as_array) {
            for a in alts {
                if let Some(s) = a.as_str() {
                    alt_addresses.insert(s.to_string());
                }
            }
        }
    }

    instructions.push(repay_ix);
    if let Some(tip) = tip_ix {
        instructions.push(tip);
    }

    log::debug!("Tx assemblée: {} instructions, tip={}", instructions.len(), instructions.len());

    // 6. Chargement des ALT
    let mut lookup_tables = Vec::new();
    for addr in &alt_addresses {
        let pk: Pubkey = match addr.parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if let Ok(account) = rpc.get_account_with_commitment(&pk, CommitmentConfig::confirmed())
            .map(|r| r.value)
        {
            if let Some(account) = account {
                if let Some(table) = parse_alt_account(pk, &account.data) {
                    lookup_tables.push(table);
                }
            }
        }
    }
    log::debug!("ALT chargées: {}/{}", lookup_tables.len(), alt_addresses.len());

    // 7. Compilation du message V0 et signature
    let (blockhash, last_valid_block_height) = rpc.get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())?;

    let message = v0::Message::try_compile(&borrower_pk, &instructions, &lookup_tables, blockhash)
        .map_err(|e| anyhow!("Compilation message échouée: {}", e))?;
    let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[borrower])
        .map_err(|e| anyhow!("Signature tx échouée: {}", e))?;

    // 8. Vérification de taille
    let tx_bytes = bincode::serialize(&tx).map_err(|e| anyhow!("Sérialisation tx échouée: {}", e))?.len();
    log::debug!("Tx construite: {} octets ({:.1}% du max)", tx_bytes, tx_bytes as f64 / 1232.0 * 100.0);
    if tx_bytes > 1232 {
        return Err(anyhow!("Tx trop grande: {} octets (max 1232)", tx_bytes));
    }

    Ok(BuiltTransaction { tx, blockhash, last_valid_block_height })
}

/// Simule la transaction. Retourne (succès, logs, unités consommées).
pub fn simulate_transaction(rpc: &RpcClient, tx: &VersionedTransaction) -> Result<(bool, Vec<String>, u64)> {
    let result = rpc.simulate_transaction(tx)?;
    let logs = result.value.logs.unwrap_or_default();
    let units = result.value.units_consumed.unwrap_or(0);

    if let Some(err) = result.value.err {
        let tail: Vec<&String> = logs.iter().rev().take(3).collect();
        log::warn!("Simulation ÉCHOUÉE: {} | CU={} | logs: {:?}", err, units, tail);
        return Ok((false, logs, units));
    }

    log::debug!("Simulation OK: CU={}", units);
    Ok((true, logs, units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_label_mapping() {
        assert_eq!(venue_label_for_dex(Dex::Orca), "Whirlpool");
        assert_eq!(venue_label_for_dex(Dex::Meteora), "Meteora DLMM");
        assert_eq!(venue_label_for_dex(Dex::RaydiumClmm), "Raydium CLMM");
    }

    #[test]
    fn test_deserialize_jupiter_ix() {
        let raw = serde_json::json!({
            "programId": Pubkey::new_unique().to_string(),
            "data": base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]),
            "accounts": [
                {"pubkey": Pubkey::new_unique().to_string(), "isSigner": false, "isWritable": true},
            ],
        });
        let ix = deserialize_jupiter_ix(&raw).unwrap();
        assert_eq!(ix.data, vec![1, 2, 3]);
        assert_eq!(ix.accounts.len(), 1);
        assert!(ix.accounts[0].is_writable);
    }

    #[test]
    fn test_deserialize_jupiter_ix_missing_program_id() {
        let raw = serde_json::json!({"accounts": []});
        assert!(deserialize_jupiter_ix(&raw).is_err());
    }
}
