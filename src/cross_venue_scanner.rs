//! Scanner cross-venue à deux jambes — compare le prix d'une même paire à
//! travers les DEX et signale un écart exploitable après déduction des frais
//! swap/flash-loan/SOL, plutôt que de se fier à l'écart brut.

use std::collections::HashMap;
use std::sync::Arc;
use anyhow::Result;
use tokio::sync::Mutex;

use crate::pool_decoder::{Dex, PoolState};
use crate::pool_registry::PoolRegistry;
use crate::tokens::{self, decimals_for_mint};

#[derive(Debug, Clone)]
pub struct CrossVenueOpportunity {
    pub pair: String,
    pub target_mint: String,
    pub quote_mint: String,
    pub borrow_amount: u64,
    pub buy_pool: PoolState,
    pub sell_pool: PoolState,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_bps: i64,
    pub pool_fee_bps: u16,
    pub net_profit_bps: i64,
    pub source: &'static str,
}

/// Scanner cross-venue pour une paire donnée. `pool_fee_bps` est le coût de
/// swap estimé d'une jambe individuelle; `swap_fee_bps`/`sol_cost_bps`
/// couvrent la seconde jambe et les frais de transaction lors du calcul net.
pub struct CrossVenueScanner {
    registry: Arc<PoolRegistry>,
    pub pool_fee_bps: u16,
    pub swap_fee_bps: u16,
    pub sol_cost_bps: u16,
    pub min_net_profit_bps: i64,
    best_spreads: Mutex<HashMap<String, i64>>,
}

impl CrossVenueScanner {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self {
            registry,
            pool_fee_bps: 9,
            swap_fee_bps: 60,
            sol_cost_bps: 2,
            min_net_profit_bps: 15,
            best_spreads: Mutex::new(HashMap::new()),
        }
    }

    /// Ajuste le prix d'un pool en unités "quote par target", décimales appliquées.
    /// Retourne None si le pool n'appartient pas à la paire ou n'est pas exploitable.
    fn normalize_price(state: &PoolState, quote_mint: &str, target_mint: &str) -> Option<f64> {
        let mint_a = state.token_mint_a.to_string();
        let mint_b = state.token_mint_b.to_string();
        let has_pair = (mint_a == quote_mint || mint_a == target_mint)
            && (mint_b == quote_mint || mint_b == target_mint);
        if !has_pair {
            return None;
        }

        // Raydium AMM v4 nécessite les soldes de vault (non résolus) — exclu de la comparaison
        if state.dex == Dex::RaydiumV4 {
            return None;
        }

        let dec_a = decimals_for_mint(&mint_a);
        let dec_b = decimals_for_mint(&mint_b);

        let raw_price = match state.dex {
            Dex::Orca => {
                let sqrt_price = state.sqrt_price_x64 as f64 / (1u128 << 64) as f64;
                sqrt_price * sqrt_price * 10f64.powi(dec_a as i32 - dec_b as i32)
            }
            Dex::Meteora => state.price * 10f64.powi(dec_a as i32 - dec_b as i32),
            Dex::RaydiumClmm => state.price,
            Dex::RaydiumV4 => return None,
        };

        if raw_price <= 0.0 {
            return None;
        }

        // Convention: raw_price est token_b/token_a. On veut USDC (quote) par target.
        let price = if mint_a == quote_mint { 1.0 / raw_price } else { raw_price };
        Some(price)
    }

    /// Scanne une paire "TARGET/QUOTE" et retourne la meilleure opportunité nette
    /// si elle dépasse le seuil `min_net_profit_bps`.
    pub async fn scan_pair(&self, pair: &str, default_borrow: u64) -> Result<Option<CrossVenueOpportunity>> {
        let (target_mint, quote_mint) = tokens::parse_pair(pair)?;

        let override_amount = tokens::get_borrow_override(&target_mint);
        let borrow_amount = if override_amount > 0 { override_amount } else { default_borrow };

        let states = self.registry.fetch_pool_states(&target_mint, &quote_mint).await?;
        if states.len() < 2 {
            return Ok(None);
        }

        let mut priced: Vec<(f64, PoolState)> = states
            .into_iter()
            .filter_map(|s| Self::normalize_price(&s, &quote_mint, &target_mint).map(|p| (p, s)))
            .collect();
        if priced.len() < 2 {
            return Ok(None);
        }

        priced.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let (cheapest_price, cheapest_pool) = priced.first().cloned().unwrap();
        let (dearest_price, dearest_pool) = priced.last().cloned().unwrap();

        if cheapest_price <= 0.0 {
            return Ok(None);
        }

        let spread_bps = (((dearest_price - cheapest_price) / cheapest_price) * 10_000.0) as i64;

        // Bornes de vraisemblance: un écart au-delà de 500 bps trahit presque
        // toujours un bug de normalisation plutôt qu'une vraie opportunité.
        if spread_bps > 500 {
            log::warn!("Écart suspect sur {}: {} bps, ignoré", pair, spread_bps);
            return Ok(None);
        }

        {
            let mut best = self.best_spreads.lock().await;
            let entry = best.entry(pair.to_string()).or_insert(0);
            if spread_bps > *entry {
                *entry = spread_bps;
            }
        }

        let net_profit_bps = spread_bps
            - (self.pool_fee_bps as i64 + self.swap_fee_bps as i64 + self.sol_cost_bps as i64);

        if net_profit_bps < self.min_net_profit_bps {
            return Ok(None);
        }

        // Même famille de venue des deux côtés: pas de valeur cross-venue réelle
        if cheapest_pool.dex == dearest_pool.dex {
            return Ok(None);
        }

        log::info!(
            "Opportunité cross-venue {}: achat {} @ {:.6}, vente {} @ {:.6}, spread={}bps net={}bps",
            pair, cheapest_pool.dex.as_str(), cheapest_price,
            dearest_pool.dex.as_str(), dearest_price, spread_bps, net_profit_bps,
        );

        Ok(Some(CrossVenueOpportunity {
            pair: pair.to_string(),
            target_mint,
            quote_mint,
            borrow_amount,
            buy_pool: cheapest_pool,
            sell_pool: dearest_pool,
            buy_price: cheapest_price,
            sell_price: dearest_price,
            spread_bps,
            pool_fee_bps: self.pool_fee_bps,
            net_profit_bps,
            source: "cross_venue",
        }))
    }

    pub async fn best_spread_for(&self, pair: &str) -> i64 {
        *self.best_spreads.lock().await.get(pair).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    fn clmm_state(mint_a: Pubkey, mint_b: Pubkey, price: f64) -> PoolState {
        PoolState {
            pool_address: Pubkey::new_unique(),
            dex: Dex::RaydiumClmm,
            token_mint_a: mint_a,
            token_mint_b: mint_b,
            token_vault_a: Pubkey::new_unique(),
            token_vault_b: Pubkey::new_unique(),
            price,
            liquidity: 1_000_000,
            sqrt_price_x64: 0,
            reserve_a: 0,
            reserve_b: 0,
            tick: 0,
            fee_rate: 0,
        }
    }

    #[test]
    fn test_normalize_price_rejects_foreign_pool() {
        let quote = Pubkey::new_unique().to_string();
        let target = Pubkey::new_unique().to_string();
        let other_a = Pubkey::new_unique();
        let other_b = Pubkey::new_unique();
        let state = clmm_state(other_a, other_b, 100.0);
        assert!(CrossVenueScanner::normalize_price(&state, &quote, &target).is_none());
    }

    #[test]
    fn test_normalize_price_inverts_when_target_is_mint_b() {
        let quote = Pubkey::new_unique();
        let target = Pubkey::new_unique();
        // mint_a = quote, mint_b = target => raw_price is target/quote, we want quote/target => invert
        let state = clmm_state(quote, target, 4.0);
        let normalized = CrossVenueScanner::normalize_price(
            &state, &quote.to_string(), &target.to_string(),
        ).unwrap();
        assert!((normalized - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_price_excludes_raydium_v4() {
        let quote = Pubkey::new_unique();
        let target = Pubkey::new_unique();
        let mut state = clmm_state(target, quote, 100.0);
        state.dex = Dex::RaydiumV4;
        assert!(CrossVenueScanner::normalize_price(&state, &quote.to_string(), &target.to_string()).is_none());
    }
}
