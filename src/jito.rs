//! Client MEV — envoie les transactions/bundles vers un block engine pour un
//! atterrissage compétitif, et construit l'instruction de tip native.

use std::str::FromStr;
use anyhow::{Result, anyhow};
use rand::seq::SliceRandom;
use serde_json::json;
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    system_instruction,
    transaction::VersionedTransaction,
};

pub const JITO_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

fn jito_endpoint(region: &str) -> &'static str {
    match region {
        "ny" => "https://ny.mainnet.block-engine.jito.wtf",
        "amsterdam" => "https://amsterdam.mainnet.block-engine.jito.wtf",
        "frankfurt" => "https://frankfurt.mainnet.block-engine.jito.wtf",
        "tokyo" => "https://tokyo.mainnet.block-engine.jito.wtf",
        "slc" => "https://slc.mainnet.block-engine.jito.wtf",
        _ => "https://mainnet.block-engine.jito.wtf",
    }
}

pub struct JitoClient {
    endpoint: &'static str,
    http: reqwest::Client,
}

impl JitoClient {
    pub fn new(region: &str) -> Self {
        let endpoint = jito_endpoint(region);
        log::info!("Client Jito initialisé: {}", endpoint);
        Self {
            endpoint,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("construction client HTTP Jito"),
        }
    }

    pub fn get_random_tip_account(&self) -> Pubkey {
        let addr = JITO_TIP_ACCOUNTS.choose(&mut rand::thread_rng()).expect("liste de tip non vide");
        Pubkey::from_str(addr).expect("adresse de tip Jito valide")
    }

    pub fn build_tip_instruction(&self, payer: &Pubkey, tip_lamports: u64) -> Instruction {
        let tip_account = self.get_random_tip_account();
        system_instruction::transfer(payer, &tip_account, tip_lamports)
    }

    pub async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<String> {
        let serialized = bincode::serialize(tx).map_err(|e| anyhow!("Sérialisation tx échouée: {}", e))?;
        let encoded = bs58::encode(serialized).into_string();

        let resp = self.http.post(format!("{}/api/v1/transactions", self.endpoint))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "sendTransaction",
                "params": [encoded, {"encoding": "base58"}],
            }))
            .send().await?
            .json::<serde_json::Value>().await?;

        if let Some(error) = resp.get("error").filter(|e| !e.is_null()) {
            return Err(anyhow!("Jito sendTransaction échoué: {}", error));
        }
        let sig = resp.get("result").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        log::info!("Tx envoyée via Jito: {}", sig);
        Ok(sig)
    }

    pub async fn send_bundle(&self, txs: &[VersionedTransaction]) -> Result<String> {
        if txs.is_empty() || txs.len() > 5 {
            return Err(anyhow!("Un bundle doit contenir 1 à 5 tx, reçu {}", txs.len()));
        }

        let mut serialized = Vec::with_capacity(txs.len());
        for tx in txs {
            let bytes = bincode::serialize(tx).map_err(|e| anyhow!("Sérialisation tx échouée: {}", e))?;
            serialized.push(bs58::encode(bytes).into_string());
        }

        let resp = self.http.post(format!("{}/api/v1/bundles", self.endpoint))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "sendBundle",
                "params": [serialized],
            }))
            .send().await?
            .json::<serde_json::Value>().await?;

        if let Some(error) = resp.get("error").filter(|e| !e.is_null()) {
            return Err(anyhow!("Jito sendBundle échoué: {}", error));
        }
        let bundle_id = resp.get("result").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        log::info!("Bundle envoyé via Jito: {} ({} tx)", bundle_id, txs.len());
        Ok(bundle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tip_account_is_valid_pubkey() {
        let client = JitoClient::new("default");
        let tip = client.get_random_tip_account();
        assert!(JITO_TIP_ACCOUNTS.contains(&tip.to_string().as_str()));
    }

    #[test]
    fn test_endpoint_by_region() {
        assert_eq!(jito_endpoint("tokyo"), "https://tokyo.mainnet.block-engine.jito.wtf");
        assert_eq!(jito_endpoint("unknown"), "https://mainnet.block-engine.jito.wtf");
    }

    #[test]
    fn test_build_tip_instruction_targets_tip_account() {
        let client = JitoClient::new("default");
        let payer = Pubkey::new_unique();
        let ix = client.build_tip_instruction(&payer, 5_000);
        assert_eq!(ix.accounts[0].pubkey, payer);
        assert!(JITO_TIP_ACCOUNTS.contains(&ix.accounts[1].pubkey.to_string().as_str()));
    }
}
