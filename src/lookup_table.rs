//! Gestionnaire de table de recherche d'adresses (ALT) pour les transactions
//! de swap brutes. Maintient une ALT avec les comptes fréquemment utilisés
//! pour rester sous la limite de 1232 octets de Solana — chaque compte
//! déplacé vers l'ALT économise 31 octets (pubkey 32 octets → index 1 octet).

use std::collections::HashSet;
use std::path::PathBuf;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    address_lookup_table_account::AddressLookupTableAccount,
    commitment_config::CommitmentConfig,
    instruction::{Instruction, AccountMeta},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
    compute_budget::ComputeBudgetInstruction,
};
use solana_client::rpc_client::RpcClient;

pub fn alt_program_id() -> Pubkey {
    use std::str::FromStr;
    Pubkey::from_str("AddressLookupTab1e1111111111111111111111111").unwrap()
}

#[derive(Debug, Serialize, Deserialize)]
struct AltState {
    address: String,
}

fn derive_lookup_table_address(authority: &Pubkey, recent_slot: u64) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[authority.as_ref(), &recent_slot.to_le_bytes()],
        &alt_program_id(),
    )
}

fn build_create_lookup_table_ix(authority: Pubkey, payer: Pubkey, recent_slot: u64) -> (Instruction, Pubkey) {
    let (table_address, bump) = derive_lookup_table_address(&authority, recent_slot);

    // discriminateur=0 (CreateLookupTable), recent_slot (u64), bump (u8)
    let mut data = Vec::with_capacity(13);
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&recent_slot.to_le_bytes());
    data.push(bump);

    let accounts = vec![
        AccountMeta::new(table_address, false),
        AccountMeta::new_readonly(authority, true),
        AccountMeta::new(payer, true),
        AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
    ];

    (Instruction { program_id: alt_program_id(), accounts, data }, table_address)
}

fn build_extend_lookup_table_ix(table_address: Pubkey, authority: Pubkey, payer: Pubkey, new_addresses: &[Pubkey]) -> Instruction {
    // discriminateur=2 (ExtendLookupTable), count (u64), puis les pubkeys
    let mut data = Vec::with_capacity(12 + new_addresses.len() * 32);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&(new_addresses.len() as u64).to_le_bytes());
    for addr in new_addresses {
        data.extend_from_slice(addr.as_ref());
    }

    let accounts = vec![
        AccountMeta::new(table_address, false),
        AccountMeta::new_readonly(authority, true),
        AccountMeta::new(payer, true),
        AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
    ];

    Instruction { program_id: alt_program_id(), accounts, data }
}

pub fn parse_alt_account(key: Pubkey, data: &[u8]) -> Option<AddressLookupTableAccount> {
    if data.len() < 56 {
        return None;
    }
    let addr_data = &data[56..];
    let num_addrs = addr_data.len() / 32;
    let addresses = (0..num_addrs)
        .filter_map(|i| Pubkey::try_from(&addr_data[i * 32..(i + 1) * 32]).ok())
        .collect();
    Some(AddressLookupTableAccount { key, addresses })
}

/// Gère une table de recherche d'adresses pour les transactions de swap brutes
pub struct LookupTableManager {
    rpc: std::sync::Arc<RpcClient>,
    state_path: PathBuf,
    pub table_address: Option<Pubkey>,
    pub table_account: Option<AddressLookupTableAccount>,
    known_addresses: HashSet<String>,
}

impl LookupTableManager {
    pub fn new(rpc: std::sync::Arc<RpcClient>, state_path: PathBuf) -> Self {
        Self {
            rpc,
            state_path,
            table_address: None,
            table_account: None,
            known_addresses: HashSet::new(),
        }
    }

    /// Charge l'ALT existante ou en crée une nouvelle
    pub fn initialize(&mut self, authority: &Keypair) -> Result<Option<AddressLookupTableAccount>> {
        if self.state_path.exists() {
            match std::fs::read_to_string(&self.state_path) {
                Ok(raw) => {
                    if let Ok(state) = serde_json::from_str::<AltState>(&raw) {
                        if let Ok(addr) = state.address.parse::<Pubkey>() {
                            self.table_address = Some(addr);
                            if let Some(table) = self.load_table()? {
                                self.known_addresses = table.addresses.iter().map(|a| a.to_string()).collect();
                                log::info!("ALT chargée: {}... ({} adresses)", &state.address[..16.min(state.address.len())], table.addresses.len());
                                self.table_account = Some(table.clone());
                                return Ok(Some(table));
                            }
                            log::warn!("ALT sauvegardée introuvable on-chain, création d'une nouvelle");
                        }
                    }
                }
                Err(e) => log::warn!("Échec lecture état ALT: {}", e),
            }
        }

        self.create_table(authority)?;
        Ok(self.table_account.clone())
    }

    fn create_table(&mut self, authority: &Keypair) -> Result<()> {
        let recent_slot = self.rpc.get_slot_with_commitment(CommitmentConfig::confirmed())?;
        let (ix, table_addr) = build_create_lookup_table_ix(authority.pubkey(), authority.pubkey(), recent_slot);

        let blockhash = self.rpc.get_latest_blockhash()?;
        let cu_limit_ix = ComputeBudgetInstruction::set_compute_unit_limit(50_000);
        let cu_price_ix = ComputeBudgetInstruction::set_compute_unit_price(25_000);
        let message = v0::Message::try_compile(
            &authority.pubkey(),
            &[cu_limit_ix, cu_price_ix, ix],
            &[],
            blockhash,
        ).map_err(|e| anyhow!("Compilation message ALT échouée: {}", e))?;
        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[authority])
            .map_err(|e| anyhow!("Signature tx ALT échouée: {}", e))?;

        let sig = self.rpc.send_and_confirm_transaction(&tx)?;
        log::info!("ALT créée et confirmée: {}... tx={}", &table_addr.to_string()[..16], sig);

        self.table_address = Some(table_addr);
        self.known_addresses = HashSet::new();

        let state = AltState { address: table_addr.to_string() };
        std::fs::write(&self.state_path, serde_json::to_string(&state)?)?;

        self.table_account = self.load_table()?;
        Ok(())
    }

    /// Ajoute de nouvelles adresses à l'ALT. Retourne true si étendue.
    pub fn extend(&mut self, authority: &Keypair, addresses: &[Pubkey]) -> Result<bool> {
        let table_address = match self.table_address {
            Some(a) => a,
            None => return Ok(false),
        };

        let authority_str = authority.pubkey().to_string();
        let new_addrs: Vec<Pubkey> = addresses.iter()
            .filter(|a| !self.known_addresses.contains(&a.to_string()) && a.to_string() != authority_str)
            .cloned()
            .collect();
        if new_addrs.is_empty() {
            return Ok(false);
        }

        // Max 20 adresses par tx d'extension (conservateur, la limite est ~30)
        for batch in new_addrs.chunks(20) {
            let ix = build_extend_lookup_table_ix(table_address, authority.pubkey(), authority.pubkey(), batch);

            let blockhash = self.rpc.get_latest_blockhash()?;
            let cu_limit_ix = ComputeBudgetInstruction::set_compute_unit_limit(100_000);
            let cu_price_ix = ComputeBudgetInstruction::set_compute_unit_price(25_000);
            let message = v0::Message::try_compile(
                &authority.pubkey(),
                &[cu_limit_ix, cu_price_ix, ix],
                &[],
                blockhash,
            ).map_err(|e| anyhow!("Compilation message extend échouée: {}", e))?;
            let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[authority])
                .map_err(|e| anyhow!("Signature tx extend échouée: {}", e))?;

            self.rpc.send_and_confirm_transaction(&tx)?;

            for a in batch {
                self.known_addresses.insert(a.to_string());
            }
            log::debug!("ALT étendue: +{} adresses", batch.len());
        }

        self.table_account = self.load_table()?;
        Ok(true)
    }

    /// S'assure que tous les comptes donnés sont dans l'ALT, l'étend si besoin.
    /// Appelé avant de construire une transaction.
    pub fn ensure_accounts(&mut self, authority: &Keypair, accounts: &[Pubkey]) -> Result<Option<AddressLookupTableAccount>> {
        if self.table_address.is_none() {
            self.initialize(authority)?;
        }
        self.extend(authority, accounts)?;
        Ok(self.table_account.clone())
    }

    pub fn get_tables(&self) -> Vec<AddressLookupTableAccount> {
        self.table_account.clone().into_iter().collect()
    }

    /// Charge les données du compte ALT depuis la chaîne, à la finalité "confirmed".
    /// "finalized" (défaut) accuse du retard et retournerait des données périmées
    /// juste après une extension.
    fn load_table(&self) -> Result<Option<AddressLookupTableAccount>> {
        let table_address = match self.table_address {
            Some(a) => a,
            None => return Ok(None),
        };

        match self.rpc.get_account_with_commitment(&table_address, CommitmentConfig::confirmed())? {
            solana_client::rpc_response::Response { value: Some(account), .. } => {
                Ok(parse_alt_account(table_address, &account.data))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alt_account_too_short() {
        assert!(parse_alt_account(Pubkey::new_unique(), &[0u8; 10]).is_none());
    }

    #[test]
    fn test_parse_alt_account_address_count() {
        let mut data = vec![0u8; 56];
        data.extend_from_slice(Pubkey::new_unique().as_ref());
        data.extend_from_slice(Pubkey::new_unique().as_ref());
        let table = parse_alt_account(Pubkey::new_unique(), &data).unwrap();
        assert_eq!(table.addresses.len(), 2);
    }

    #[test]
    fn test_derive_lookup_table_address_deterministic() {
        let authority = Pubkey::new_unique();
        let (a1, _) = derive_lookup_table_address(&authority, 12345);
        let (a2, _) = derive_lookup_table_address(&authority, 12345);
        assert_eq!(a1, a2);
    }
}
