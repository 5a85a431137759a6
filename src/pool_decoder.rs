//! Décodeurs directs on-chain de l'état des pools AMM — lit l'état brut
//! des comptes retournés par getAccountInfo sans passer par un agrégateur.
//!
//! Supporte:
//!   - Raydium CLMM (liquidité concentrée)
//!   - Raydium AMM v4 (AMM standard à produit constant)
//!   - Orca Whirlpool
//!   - Meteora DLMM

use std::str::FromStr;
use solana_sdk::pubkey::Pubkey;

pub fn raydium_clmm_program() -> Pubkey {
    Pubkey::from_str("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK").unwrap()
}

pub fn raydium_amm_v4_program() -> Pubkey {
    Pubkey::from_str("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8").unwrap()
}

pub fn orca_whirlpool_program() -> Pubkey {
    Pubkey::from_str("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc").unwrap()
}

pub fn meteora_dlmm_program() -> Pubkey {
    Pubkey::from_str("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo").unwrap()
}

/// État unifié d'un pool, quel que soit son type d'AMM
#[derive(Debug, Clone)]
pub struct PoolState {
    pub pool_address: Pubkey,
    pub dex: Dex,
    pub token_mint_a: Pubkey,
    pub token_mint_b: Pubkey,
    pub token_vault_a: Pubkey,
    pub token_vault_b: Pubkey,
    /// Prix token_b par token_a, déjà ajusté aux décimales quand connues
    pub price: f64,
    pub liquidity: u128,
    pub sqrt_price_x64: u128,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub tick: i32,
    pub fee_rate: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dex {
    RaydiumClmm,
    RaydiumV4,
    Orca,
    Meteora,
}

impl Dex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dex::RaydiumClmm => "raydium_clmm",
            Dex::RaydiumV4 => "raydium_v4",
            Dex::Orca => "orca",
            Dex::Meteora => "meteora",
        }
    }
}

fn read_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    data.get(offset..offset + 32).map(Pubkey::try_from).and_then(Result::ok)
}

fn read_u8(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn read_i32(data: &[u8], offset: usize) -> Option<i32> {
    data.get(offset..offset + 4)?.try_into().ok().map(i32::from_le_bytes)
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)?.try_into().ok().map(u64::from_le_bytes)
}

fn read_u128_le(data: &[u8], offset: usize) -> Option<u128> {
    let lo = read_u64(data, offset)?;
    let hi = read_u64(data, offset + 8)?;
    Some(((hi as u128) << 64) | lo as u128)
}

/// Raydium CLMM PoolState (après discriminateur Anchor de 8 octets):
/// offset   8: bump (u8)
/// offset   9: amm_config (Pubkey, 32)
/// offset  41: owner (Pubkey, 32)
/// offset  73: token_mint_0 (Pubkey, 32)
/// offset 105: token_mint_1 (Pubkey, 32)
/// offset 137: token_vault_0 (Pubkey, 32)
/// offset 169: token_vault_1 (Pubkey, 32)
/// offset 201: observation_key (Pubkey, 32)
/// offset 233: mint_decimals_0 (u8)
/// offset 234: mint_decimals_1 (u8)
/// offset 235: tick_spacing (u16)
/// offset 237: liquidity (u128, 16)
/// offset 253: sqrt_price_x64 (u128, 16)
/// offset 269: tick_current (i32)
pub fn decode_raydium_clmm(data: &[u8], pool_address: Pubkey) -> Option<PoolState> {
    if data.len() < 273 {
        return None;
    }

    let token_mint_0 = read_pubkey(data, 73)?;
    let token_mint_1 = read_pubkey(data, 105)?;
    let token_vault_0 = read_pubkey(data, 137)?;
    let token_vault_1 = read_pubkey(data, 169)?;
    let decimals_0 = read_u8(data, 233)?;
    let decimals_1 = read_u8(data, 234)?;
    let liquidity = read_u128_le(data, 237)?;
    let sqrt_price_x64 = read_u128_le(data, 253)?;
    let tick_current = read_i32(data, 269)?;

    let price = sqrt_price_x64_to_price(sqrt_price_x64, decimals_0, decimals_1);

    Some(PoolState {
        pool_address,
        dex: Dex::RaydiumClmm,
        token_mint_a: token_mint_0,
        token_mint_b: token_mint_1,
        token_vault_a: token_vault_0,
        token_vault_b: token_vault_1,
        price,
        liquidity,
        sqrt_price_x64,
        reserve_a: 0,
        reserve_b: 0,
        tick: tick_current,
        fee_rate: 0,
    })
}

/// Raydium AMM v4 LIQUIDITY_STATE_LAYOUT_V4 (pas de discriminateur Anchor).
/// offset  32: baseDecimal (u64)
/// offset  40: quoteDecimal (u64)
/// offset 336: baseVault (Pubkey, 32)
/// offset 368: quoteVault (Pubkey, 32)
/// offset 400: baseMint (Pubkey, 32)
/// offset 432: quoteMint (Pubkey, 32)
///
/// Le prix nécessite les soldes des vaults (non stockés ici) — volontairement
/// non calculé: cette famille de pools reste hors comparaison de prix.
pub fn decode_raydium_v4(data: &[u8], pool_address: Pubkey) -> Option<PoolState> {
    if data.len() < 560 {
        return None;
    }

    let base_vault = read_pubkey(data, 336)?;
    let quote_vault = read_pubkey(data, 368)?;
    let base_mint = read_pubkey(data, 400)?;
    let quote_mint = read_pubkey(data, 432)?;

    Some(PoolState {
        pool_address,
        dex: Dex::RaydiumV4,
        token_mint_a: base_mint,
        token_mint_b: quote_mint,
        token_vault_a: base_vault,
        token_vault_b: quote_vault,
        price: 0.0,
        liquidity: 0,
        sqrt_price_x64: 0,
        reserve_a: 0,
        reserve_b: 0,
        tick: 0,
        fee_rate: 0,
    })
}

/// Orca Whirlpool (borsh, après discriminateur Anchor de 8 octets).
/// offset  45: fee_rate (u16)
/// offset  49: liquidity (u128, 16)
/// offset  65: sqrt_price (u128, 16)
/// offset  81: tick_current_index (i32)
/// offset 101: token_mint_a (Pubkey, 32)
/// offset 133: token_vault_a (Pubkey, 32)
/// offset 181: token_mint_b (Pubkey, 32)
/// offset 213: token_vault_b (Pubkey, 32)
pub fn decode_orca_whirlpool(data: &[u8], pool_address: Pubkey) -> Option<PoolState> {
    if data.len() < 245 {
        return None;
    }

    let fee_rate = read_u16(data, 45)?;
    let liquidity = read_u128_le(data, 49)?;
    let sqrt_price = read_u128_le(data, 65)?;
    let tick_current = read_i32(data, 81)?;
    let token_mint_a = read_pubkey(data, 101)?;
    let token_vault_a = read_pubkey(data, 133)?;
    let token_mint_b = read_pubkey(data, 181)?;
    let token_vault_b = read_pubkey(data, 213)?;

    // Même format sqrt_price_x64 que Raydium CLMM; décimales appliquées par l'appelant
    let raw_price = (sqrt_price as f64 / (1u128 << 64) as f64).powi(2);

    Some(PoolState {
        pool_address,
        dex: Dex::Orca,
        token_mint_a,
        token_mint_b,
        token_vault_a,
        token_vault_b,
        price: raw_price,
        liquidity,
        sqrt_price_x64: sqrt_price,
        reserve_a: 0,
        reserve_b: 0,
        tick: tick_current,
        fee_rate,
    })
}

/// Meteora DLMM LbPair (après discriminateur de 8 octets).
/// offset  76: active_id (i32)
/// offset  80: bin_step (u16)
/// offset  88: token_x_mint (Pubkey, 32)
/// offset 120: token_y_mint (Pubkey, 32)
/// offset 152: reserve_x (Pubkey, 32) — adresse du vault
/// offset 184: reserve_y (Pubkey, 32) — adresse du vault
pub fn decode_meteora_dlmm(data: &[u8], pool_address: Pubkey) -> Option<PoolState> {
    if data.len() < 216 {
        return None;
    }

    let active_id = read_i32(data, 76)?;
    let bin_step = read_u16(data, 80)?;
    let token_x_mint = read_pubkey(data, 88)?;
    let token_y_mint = read_pubkey(data, 120)?;
    let reserve_x = read_pubkey(data, 152)?;
    let reserve_y = read_pubkey(data, 184)?;

    let price = dlmm_bin_price(active_id, bin_step);

    Some(PoolState {
        pool_address,
        dex: Dex::Meteora,
        token_mint_a: token_x_mint,
        token_mint_b: token_y_mint,
        token_vault_a: reserve_x,
        token_vault_b: reserve_y,
        price,
        liquidity: 0,
        sqrt_price_x64: 0,
        reserve_a: 0,
        reserve_b: 0,
        tick: active_id,
        fee_rate: bin_step,
    })
}

/// price = (sqrt_price_x64 / 2^64)^2 * 10^(decimals_a - decimals_b)
pub fn sqrt_price_x64_to_price(sqrt_price_x64: u128, decimals_a: u8, decimals_b: u8) -> f64 {
    if sqrt_price_x64 == 0 {
        return 0.0;
    }
    let sqrt_price = sqrt_price_x64 as f64 / (1u128 << 64) as f64;
    let price_raw = sqrt_price * sqrt_price;
    let decimal_adj = 10f64.powi(decimals_a as i32 - decimals_b as i32);
    price_raw * decimal_adj
}

/// price = (1 + bin_step / 10000) ^ active_id
pub fn dlmm_bin_price(active_id: i32, bin_step: u16) -> f64 {
    let base = 1.0 + bin_step as f64 / 10000.0;
    base.powi(active_id)
}

/// Décode l'état d'un pool selon l'identifiant de son programme
pub fn decode_pool(data: &[u8], pool_address: Pubkey, program_id: &Pubkey) -> Option<PoolState> {
    if *program_id == raydium_clmm_program() {
        decode_raydium_clmm(data, pool_address)
    } else if *program_id == raydium_amm_v4_program() {
        decode_raydium_v4(data, pool_address)
    } else if *program_id == orca_whirlpool_program() {
        decode_orca_whirlpool(data, pool_address)
    } else if *program_id == meteora_dlmm_program() {
        decode_meteora_dlmm(data, pool_address)
    } else {
        log::warn!("Program ID inconnu: {}", program_id);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_clmm_data() -> Vec<u8> {
        let mut data = vec![0u8; 273];
        let mint0 = Pubkey::new_unique();
        let mint1 = Pubkey::new_unique();
        data[73..105].copy_from_slice(mint0.as_ref());
        data[105..137].copy_from_slice(mint1.as_ref());
        data[233] = 9; // decimals_0 (SOL)
        data[234] = 6; // decimals_1 (USDC)
        // sqrt_price_x64 representing price ~ 150 USDC per SOL after decimal adj
        let sqrt_price: u128 = 1u128 << 64; // price_raw = 1.0
        data[253..269].copy_from_slice(&sqrt_price.to_le_bytes());
        data
    }

    #[test]
    fn test_decode_raydium_clmm_too_short() {
        assert!(decode_raydium_clmm(&[0u8; 10], Pubkey::new_unique()).is_none());
    }

    #[test]
    fn test_decode_raydium_clmm_roundtrip() {
        let data = fake_clmm_data();
        let pool = Pubkey::new_unique();
        let state = decode_raydium_clmm(&data, pool).unwrap();
        assert_eq!(state.dex, Dex::RaydiumClmm);
        // decimals_0=9, decimals_1=6 => adj = 10^3, price_raw=1.0 => price=1000
        assert!((state.price - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_raydium_v4_price_is_zero() {
        let mut data = vec![0u8; 560];
        let vault_a = Pubkey::new_unique();
        data[336..368].copy_from_slice(vault_a.as_ref());
        let pool = Pubkey::new_unique();
        let state = decode_raydium_v4(&data, pool).unwrap();
        assert_eq!(state.price, 0.0);
        assert_eq!(state.dex, Dex::RaydiumV4);
    }

    #[test]
    fn test_dlmm_bin_price_zero_bin() {
        assert_eq!(dlmm_bin_price(0, 100), 1.0);
    }

    #[test]
    fn test_dlmm_bin_price_positive_bin() {
        let p = dlmm_bin_price(10, 100);
        assert!(p > 1.0);
    }

    #[test]
    fn test_sqrt_price_zero() {
        assert_eq!(sqrt_price_x64_to_price(0, 9, 6), 0.0);
    }

    #[test]
    fn test_decode_pool_dispatch_unknown_program() {
        let data = vec![0u8; 300];
        let unknown = Pubkey::new_unique();
        assert!(decode_pool(&data, Pubkey::new_unique(), &unknown).is_none());
    }

    #[test]
    fn test_decode_pool_dispatch_clmm() {
        let data = fake_clmm_data();
        let program = raydium_clmm_program();
        let pool = Pubkey::new_unique();
        assert!(decode_pool(&data, pool, &program).is_some());
    }
}
