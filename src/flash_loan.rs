//! Client de flash loan — construit les instructions borrow/repay pour notre
//! programme Anchor générique de flash loan. Dérive les PDA et assemble les
//! instructions brutes (discriminateur + arguments borsh) sans SDK Anchor.

use anyhow::{Result, anyhow};
use solana_sdk::{
    pubkey::Pubkey,
    instruction::{Instruction, AccountMeta},
};
use solana_client::rpc_client::RpcClient;

/// Instructions du programme de flash loan (IDL Anchor générique).
/// Discriminators calculés via sha256("global:<instruction_name>")[0..8].
mod flash_loan_instructions {
    pub const BORROW_DISCRIMINATOR: [u8; 8] = [64, 203, 133, 3, 2, 181, 8, 180];
    pub const REPAY_DISCRIMINATOR: [u8; 8] = [119, 239, 18, 45, 194, 107, 31, 238];

    pub const LENDING_POOL_SEED: &[u8] = b"lending_pool";
    pub const POOL_VAULT_SEED: &[u8] = b"pool_vault";
    pub const FLASH_LOAN_RECEIPT_SEED: &[u8] = b"flash_loan_receipt";
}

/// État déserialisé du compte pool de flash loan
#[derive(Debug, Clone)]
pub struct FlashLoanPoolState {
    pub admin: Pubkey,
    pub token_mint: Pubkey,
    pub vault: Pubkey,
    pub total_deposits: u64,
    pub total_shares: u64,
    pub total_fees_earned: u64,
    pub fee_bps: u16,
    pub bump: u8,
    pub vault_bump: u8,
    pub is_active: bool,
}

pub struct FlashLoanClient {
    rpc: std::sync::Arc<RpcClient>,
    pub program_id: Pubkey,
    pub token_mint: Pubkey,
    pub pool_pda: Pubkey,
    pub pool_bump: u8,
    pub vault_pda: Pubkey,
    pub vault_bump: u8,
}

impl FlashLoanClient {
    pub fn new(rpc: std::sync::Arc<RpcClient>, program_id: Pubkey, token_mint: Pubkey) -> Self {
        let (pool_pda, pool_bump) = Pubkey::find_program_address(
            &[flash_loan_instructions::LENDING_POOL_SEED, token_mint.as_ref()],
            &program_id,
        );
        let (vault_pda, vault_bump) = Pubkey::find_program_address(
            &[flash_loan_instructions::POOL_VAULT_SEED, pool_pda.as_ref()],
            &program_id,
        );

        log::info!("Flash loan pool PDA: {}", pool_pda);
        log::info!("Flash loan vault PDA: {}", vault_pda);

        Self { rpc, program_id, token_mint, pool_pda, pool_bump, vault_pda, vault_bump }
    }

    pub fn derive_receipt_pda(&self, borrower: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[flash_loan_instructions::FLASH_LOAN_RECEIPT_SEED, self.pool_pda.as_ref(), borrower.as_ref()],
            &self.program_id,
        )
    }

    /// Récupère et parse les données du compte pool
    pub fn get_pool_state(&self) -> Result<FlashLoanPoolState> {
        let account = self.rpc.get_account(&self.pool_pda)
            .map_err(|e| anyhow!("Compte pool introuvable: {}", e))?;
        let data = &account.data;
        if data.len() < 8 + 32 + 32 + 32 + 8 + 8 + 8 + 2 + 1 + 1 + 1 {
            return Err(anyhow!("Données de pool trop courtes"));
        }

        let mut offset = 8usize; // discriminateur Anchor
        let admin = Pubkey::try_from(&data[offset..offset + 32]).unwrap(); offset += 32;
        let token_mint = Pubkey::try_from(&data[offset..offset + 32]).unwrap(); offset += 32;
        let vault = Pubkey::try_from(&data[offset..offset + 32]).unwrap(); offset += 32;
        let total_deposits = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()); offset += 8;
        let total_shares = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()); offset += 8;
        let total_fees_earned = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()); offset += 8;
        let fee_bps = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap()); offset += 2;
        let bump = data[offset]; offset += 1;
        let vault_bump = data[offset]; offset += 1;
        let is_active = data[offset] != 0;

        Ok(FlashLoanPoolState {
            admin, token_mint, vault, total_deposits, total_shares,
            total_fees_earned, fee_bps, bump, vault_bump, is_active,
        })
    }

    /// Construit l'instruction borrow_flash_loan
    pub fn build_borrow_ix(&self, borrower: Pubkey, borrower_token_account: Pubkey, amount: u64) -> Instruction {
        let (receipt_pda, _) = self.derive_receipt_pda(&borrower);

        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&flash_loan_instructions::BORROW_DISCRIMINATOR);
        data.extend_from_slice(&amount.to_le_bytes());

        let accounts = vec![
            AccountMeta::new(self.pool_pda, false),
            AccountMeta::new(receipt_pda, false),
            AccountMeta::new(self.vault_pda, false),
            AccountMeta::new(borrower_token_account, false),
            AccountMeta::new(borrower, true),
            AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
        ];

        Instruction { program_id: self.program_id, accounts, data }
    }

    /// Construit l'instruction repay_flash_loan (pas d'arguments, discriminateur seul)
    pub fn build_repay_ix(&self, borrower: Pubkey, borrower_token_account: Pubkey) -> Instruction {
        let (receipt_pda, _) = self.derive_receipt_pda(&borrower);

        let accounts = vec![
            AccountMeta::new(self.pool_pda, false),
            AccountMeta::new(receipt_pda, false),
            AccountMeta::new(self.vault_pda, false),
            AccountMeta::new(borrower_token_account, false),
            AccountMeta::new(borrower, true),
            AccountMeta::new_readonly(spl_token::id(), false),
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data: flash_loan_instructions::REPAY_DISCRIMINATOR.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_ix_discriminator_prefix() {
        let rpc = std::sync::Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let program_id = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let client = FlashLoanClient::new(rpc, program_id, mint);
        let ix = client.build_borrow_ix(Pubkey::new_unique(), Pubkey::new_unique(), 1_000_000);
        assert_eq!(&ix.data[0..8], &flash_loan_instructions::BORROW_DISCRIMINATOR);
        assert_eq!(ix.data.len(), 16);
    }

    #[test]
    fn test_repay_ix_has_no_args() {
        let rpc = std::sync::Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let program_id = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let client = FlashLoanClient::new(rpc, program_id, mint);
        let ix = client.build_repay_ix(Pubkey::new_unique(), Pubkey::new_unique());
        assert_eq!(ix.data, flash_loan_instructions::REPAY_DISCRIMINATOR.to_vec());
    }

    #[test]
    fn test_pdas_are_deterministic() {
        let rpc = std::sync::Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let program_id = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let client_a = FlashLoanClient::new(rpc.clone(), program_id, mint);
        let client_b = FlashLoanClient::new(rpc, program_id, mint);
        assert_eq!(client_a.pool_pda, client_b.pool_pda);
        assert_eq!(client_a.vault_pda, client_b.vault_pda);
    }
}
