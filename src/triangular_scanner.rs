//! Scanner triangulaire — construit un graphe de taux de change USDC -> X -> Y
//! -> USDC à partir de toutes les paires connues du registre et cherche des
//! cycles à trois jambes dont le taux net dépasse les frais.

use std::collections::HashMap;
use std::sync::Arc;
use anyhow::Result;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;

use crate::pool_decoder::{Dex, PoolState};
use crate::pool_registry::PoolRegistry;
use crate::tokens::{self, decimals_for_mint};

#[derive(Debug, Clone)]
pub struct PriceEdge {
    pub from_mint: String,
    pub to_mint: String,
    pub rate: f64,
    pub pool_address: Pubkey,
    pub dex: Dex,
    pub fee_bps: u16,
}

#[derive(Debug, Clone)]
pub struct TriangularOpportunity {
    pub path: Vec<String>,
    pub edges: Vec<PriceEdge>,
    pub round_trip_rate: f64,
    pub gross_profit_bps: i64,
    pub net_profit_bps: i64,
    pub borrow_amount: u64,
    pub source: &'static str,
}

const SOL_COST_BPS: i64 = 3;

/// Scanner triangulaire bâti sur un graphe de taux reconstruit à chaque passe
/// depuis l'état courant des pools du registre.
pub struct TriangularScanner {
    registry: Arc<PoolRegistry>,
    pub flash_fee_bps: u16,
    pub min_profit_bps: i64,
    graph: Mutex<HashMap<String, Vec<PriceEdge>>>,
    best_triangles: Mutex<HashMap<String, i64>>,
}

impl TriangularScanner {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self {
            registry,
            flash_fee_bps: 9,
            min_profit_bps: 15,
            graph: Mutex::new(HashMap::new()),
            best_triangles: Mutex::new(HashMap::new()),
        }
    }

    fn estimate_fee_bps(state: &PoolState) -> u16 {
        match state.dex {
            Dex::Orca => (state.fee_rate / 100).max(1),
            Dex::RaydiumClmm | Dex::RaydiumV4 => 25,
            Dex::Meteora => state.fee_rate.max(10),
        }
    }

    /// Taux de change from_mint -> to_mint implicite dans l'état d'un pool,
    /// ou None si le pool n'appartient pas à la paire ou n'est pas exploitable.
    fn compute_rate(state: &PoolState, from_mint: &str, to_mint: &str) -> Option<f64> {
        let mint_a = state.token_mint_a.to_string();
        let mint_b = state.token_mint_b.to_string();
        let matches_pair = (mint_a == from_mint && mint_b == to_mint)
            || (mint_a == to_mint && mint_b == from_mint);
        if !matches_pair {
            return None;
        }

        if state.dex == Dex::RaydiumV4 {
            return None;
        }
        if matches!(state.dex, Dex::RaydiumClmm | Dex::Orca) && state.liquidity == 0 {
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

        // raw_price est token_b par token_a. rate est toujours to_per_from.
        if from_mint == mint_a {
            Some(raw_price)
        } else {
            Some(1.0 / raw_price)
        }
    }

    /// Reconstruit le graphe de taux depuis toutes les paires enregistrées.
    /// Applique un filtre médiane par arête (from, to) pour écarter les pools
    /// dont le prix dévie de plus d'un facteur 2 du consensus.
    pub async fn build_graph(&self) -> Result<()> {
        let pairs = self.registry.all_pairs().await;
        let mut candidates: HashMap<(String, String), Vec<PriceEdge>> = HashMap::new();

        for pair in pairs {
            let states = self.registry.fetch_pool_states(&pair.token_a, &pair.token_b).await?;
            for state in &states {
                for (from, to) in [
                    (pair.token_a.clone(), pair.token_b.clone()),
                    (pair.token_b.clone(), pair.token_a.clone()),
                ] {
                    if let Some(rate) = Self::compute_rate(state, &from, &to) {
                        let edge = PriceEdge {
                            from_mint: from.clone(),
                            to_mint: to.clone(),
                            rate,
                            pool_address: state.pool_address,
                            dex: state.dex,
                            fee_bps: Self::estimate_fee_bps(state),
                        };
                        candidates.entry((from, to)).or_default().push(edge);
                    }
                }
            }
        }

        let mut outliers_removed = 0usize;
        let mut new_graph: HashMap<String, Vec<PriceEdge>> = HashMap::new();

        for ((from, _to), mut edges) in candidates {
            if edges.len() >= 2 {
                let mut rates: Vec<f64> = edges.iter().map(|e| e.rate).collect();
                rates.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = rates[rates.len() / 2];
                let before = edges.len();
                edges.retain(|e| e.rate >= 0.5 * median && e.rate <= 2.0 * median);
                outliers_removed += before - edges.len();
            }
            new_graph.entry(from).or_default().extend(edges);
        }

        let pair_count = new_graph.values().map(|v| v.len()).sum::<usize>();
        log::info!(
            "Graphe triangulaire reconstruit: {} arêtes, {} valeurs aberrantes écartées",
            pair_count, outliers_removed,
        );

        *self.graph.lock().await = new_graph;
        Ok(())
    }

    /// Cherche des cycles USDC -> X -> Y -> USDC parmi les mints donnés (ou
    /// l'univers focus par défaut) et retourne les opportunités rentables,
    /// triées par profit net décroissant, une seule par chemin.
    pub async fn scan_triangles(
        &self,
        borrow_amount: u64,
        focus_mints: Option<Vec<String>>,
    ) -> Vec<TriangularOpportunity> {
        let usdc = tokens::resolve_mint("USDC");
        let focus: Vec<String> = focus_mints.unwrap_or_else(|| {
            tokens::focus_mint_universe().iter().map(|s| tokens::resolve_mint(s)).collect()
        });

        let graph = self.graph.lock().await;
        let empty: Vec<PriceEdge> = Vec::new();
        let mut found: Vec<TriangularOpportunity> = Vec::new();

        let first_edges = graph.get(&usdc).unwrap_or(&empty);
        for e1 in first_edges {
            if !focus.contains(&e1.to_mint) {
                continue;
            }
            let second_edges = graph.get(&e1.to_mint).unwrap_or(&empty);
            for e2 in second_edges {
                if e2.to_mint == usdc || e2.pool_address == e1.pool_address {
                    continue;
                }
                if !focus.contains(&e2.to_mint) {
                    continue;
                }
                let third_edges = graph.get(&e2.to_mint).unwrap_or(&empty);
                for e3 in third_edges {
                    if e3.to_mint != usdc {
                        continue;
                    }
                    if e3.pool_address == e1.pool_address || e3.pool_address == e2.pool_address {
                        continue;
                    }

                    let round_trip = e1.rate * e2.rate * e3.rate;
                    if round_trip > 1.015 || round_trip < 0.5 {
                        continue;
                    }

                    let fee_mult = (1.0 - e1.fee_bps as f64 / 10_000.0)
                        * (1.0 - e2.fee_bps as f64 / 10_000.0)
                        * (1.0 - e3.fee_bps as f64 / 10_000.0);
                    let net_rate = round_trip * fee_mult;
                    let gross_bps = ((net_rate - 1.0) * 10_000.0) as i64;
                    let net_bps = gross_bps - self.flash_fee_bps as i64 - SOL_COST_BPS;

                    if net_bps < self.min_profit_bps {
                        continue;
                    }

                    found.push(TriangularOpportunity {
                        path: vec![usdc.clone(), e1.to_mint.clone(), e2.to_mint.clone(), usdc.clone()],
                        edges: vec![e1.clone(), e2.clone(), e3.clone()],
                        round_trip_rate: round_trip,
                        gross_profit_bps: gross_bps,
                        net_profit_bps: net_bps,
                        borrow_amount,
                        source: "triangular",
                    });
                }
            }
        }
        drop(graph);

        found.sort_by(|a, b| b.net_profit_bps.cmp(&a.net_profit_bps));

        let mut best_per_path: HashMap<String, TriangularOpportunity> = HashMap::new();
        for opp in found {
            let key = opp.path.join("->");
            best_per_path.entry(key).or_insert(opp);
        }

        let mut results: Vec<TriangularOpportunity> = best_per_path.into_values().collect();
        results.sort_by(|a, b| b.net_profit_bps.cmp(&a.net_profit_bps));

        if let Some(best) = results.first() {
            let mut best_map = self.best_triangles.try_lock();
            if let Ok(ref mut map) = best_map {
                let key = best.path.join("->");
                let entry = map.entry(key).or_insert(0);
                if best.net_profit_bps > *entry {
                    *entry = best.net_profit_bps;
                }
            }
        }

        results
    }

    pub async fn scan_once(&self, borrow_amount: u64) -> Result<Vec<TriangularOpportunity>> {
        self.build_graph().await?;
        Ok(self.scan_triangles(borrow_amount, None).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clmm_state(mint_a: Pubkey, mint_b: Pubkey, price: f64, liquidity: u128) -> PoolState {
        PoolState {
            pool_address: Pubkey::new_unique(),
            dex: Dex::RaydiumClmm,
            token_mint_a: mint_a,
            token_mint_b: mint_b,
            token_vault_a: Pubkey::new_unique(),
            token_vault_b: Pubkey::new_unique(),
            price,
            liquidity,
            sqrt_price_x64: 0,
            reserve_a: 0,
            reserve_b: 0,
            tick: 0,
            fee_rate: 0,
        }
    }

    #[test]
    fn test_compute_rate_rejects_zero_liquidity_clmm() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let state = clmm_state(a, b, 10.0, 0);
        assert!(TriangularScanner::compute_rate(&state, &a.to_string(), &b.to_string()).is_none());
    }

    #[test]
    fn test_compute_rate_inverts_for_reverse_direction() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let state = clmm_state(a, b, 5.0, 1_000);
        let forward = TriangularScanner::compute_rate(&state, &a.to_string(), &b.to_string()).unwrap();
        let backward = TriangularScanner::compute_rate(&state, &b.to_string(), &a.to_string()).unwrap();
        assert!((forward - 5.0).abs() < 1e-9);
        assert!((backward - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_compute_rate_rejects_raydium_v4() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let mut state = clmm_state(a, b, 5.0, 1_000);
        state.dex = Dex::RaydiumV4;
        assert!(TriangularScanner::compute_rate(&state, &a.to_string(), &b.to_string()).is_none());
    }

    #[test]
    fn test_estimate_fee_bps_orca_minimum() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let mut state = clmm_state(a, b, 5.0, 1_000);
        state.dex = Dex::Orca;
        state.fee_rate = 5; // 5/100 = 0 -> clamp to 1
        assert_eq!(TriangularScanner::estimate_fee_bps(&state), 1);
    }
}
