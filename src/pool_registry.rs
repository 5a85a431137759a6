//! Registre de pools — associe chaque paire de tokens aux adresses de pools
//! AMM connues à travers les DEX. Les pools sont découverts via l'API Jupiter
//! et les API natives des DEX, puis mis en cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use anyhow::Result;
use serde::Deserialize;
use solana_client::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::pool_decoder::{
    self, Dex, PoolState, raydium_clmm_program, raydium_amm_v4_program,
    orca_whirlpool_program, meteora_dlmm_program,
};

#[derive(Debug, Clone)]
pub struct PoolInfo {
    pub address: Pubkey,
    pub program_id: Pubkey,
    pub dex: Dex,
    pub token_a: String,
    pub token_b: String,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct PairPools {
    pub token_a: String,
    pub token_b: String,
    pub pools: Vec<PoolInfo>,
}

impl PairPools {
    pub fn dex_count(&self) -> usize {
        self.pools.iter().map(|p| p.dex).collect::<HashSet<_>>().len()
    }
}

pub struct PoolRegistry {
    rpc: Arc<RpcClient>,
    jupiter_api_key: String,
    pairs: Mutex<HashMap<String, PairPools>>,
    pools: Mutex<HashMap<Pubkey, PoolInfo>>,
    http: reqwest::Client,
}

impl PoolRegistry {
    pub fn new(rpc: Arc<RpcClient>, jupiter_api_key: String) -> Self {
        Self {
            rpc,
            jupiter_api_key,
            pairs: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Clé canonique de paire (triée)
    fn pair_key(mint_a: &str, mint_b: &str) -> String {
        if mint_a <= mint_b {
            format!("{}:{}", mint_a, mint_b)
        } else {
            format!("{}:{}", mint_b, mint_a)
        }
    }

    pub async fn register_pool(&self, pool: PoolInfo) {
        let key = Self::pair_key(&pool.token_a, &pool.token_b);
        let mut pairs = self.pairs.lock().await;
        let mut pools = self.pools.lock().await;

        if pools.contains_key(&pool.address) {
            return;
        }

        let entry = pairs.entry(key).or_insert_with(|| PairPools {
            token_a: pool.token_a.clone(),
            token_b: pool.token_b.clone(),
            pools: Vec::new(),
        });
        entry.pools.push(pool.clone());
        pools.insert(pool.address, pool);
    }

    /// Découvre des pools pour une paire via la route de quote Jupiter.
    /// Le routePlan indique quels pools AMM sont utilisés pour le routage.
    pub async fn discover_pools_for_pair(
        &self,
        mint_a: &str,
        mint_b: &str,
        pair_label: &str,
    ) -> Result<Vec<PoolInfo>> {
        let mut discovered = Vec::new();

        if let Ok(data) = self.fetch_jupiter_quote(mint_a, mint_b, "1000000").await {
            discovered.extend(self.extract_pools_from_route(&data, mint_a, mint_b, pair_label));
        }
        if let Ok(data) = self.fetch_jupiter_quote(mint_b, mint_a, "1000000000").await {
            discovered.extend(self.extract_pools_from_route(&data, mint_b, mint_a, pair_label));
        }

        for pool in discovered.iter().cloned() {
            self.register_pool(pool).await;
        }

        self.log_pair_summary(mint_a, mint_b, pair_label).await;
        Ok(discovered)
    }

    async fn fetch_jupiter_quote(&self, input_mint: &str, output_mint: &str, amount: &str) -> Result<JupiterQuoteResponse> {
        let mut req = self.http.get("https://api.jup.ag/swap/v1/quote").query(&[
            ("inputMint", input_mint),
            ("outputMint", output_mint),
            ("amount", amount),
            ("slippageBps", "100"),
            ("maxAccounts", "64"),
        ]);
        if !self.jupiter_api_key.is_empty() {
            req = req.header("x-api-key", &self.jupiter_api_key);
        }
        let resp = req.send().await?.json::<JupiterQuoteResponse>().await?;
        Ok(resp)
    }

    fn extract_pools_from_route(
        &self,
        quote: &JupiterQuoteResponse,
        mint_a: &str,
        mint_b: &str,
        label: &str,
    ) -> Vec<PoolInfo> {
        let mut pools = Vec::new();
        for step in &quote.route_plan {
            let swap_info = &step.swap_info;
            if swap_info.amm_key.is_empty() {
                continue;
            }
            let program_id = match self.label_to_program(&swap_info.label) {
                Some(p) => p,
                None => continue,
            };
            let dex = program_to_dex(&program_id);
            let dex = match dex {
                Some(d) => d,
                None => continue,
            };
            let address = match Pubkey::from_str(&swap_info.amm_key) {
                Ok(a) => a,
                Err(_) => continue,
            };
            pools.push(PoolInfo {
                address,
                program_id,
                dex,
                token_a: swap_info.input_mint.clone().unwrap_or_else(|| mint_a.to_string()),
                token_b: swap_info.output_mint.clone().unwrap_or_else(|| mint_b.to_string()),
                label: format!("{} {}", swap_info.label, label).trim().to_string(),
            });
        }
        pools
    }

    /// Associe un label Jupiter d'AMM à un identifiant de programme
    fn label_to_program(&self, label: &str) -> Option<Pubkey> {
        let l = label.to_lowercase();
        if l.contains("raydium") && l.contains("clmm") {
            Some(raydium_clmm_program())
        } else if l.contains("raydium") && (l.contains("amm") || l.contains("v4")) {
            Some(raydium_amm_v4_program())
        } else if l.contains("raydium") && l.contains("cp") {
            Some(raydium_amm_v4_program())
        } else if l.contains("raydium") {
            Some(raydium_clmm_program())
        } else if l.contains("whirlpool") || l.contains("orca") {
            Some(orca_whirlpool_program())
        } else if l.contains("meteora") {
            Some(meteora_dlmm_program())
        } else {
            // Dexes que l'on ne sait pas décoder (Phoenix, Lifinity, Manifest, ...)
            None
        }
    }

    /// Découverte directe via les API natives des DEX (plus fiable que les routes Jupiter)
    pub async fn discover_from_dex_apis(
        &self,
        mint_a: &str,
        mint_b: &str,
        pair_label: &str,
    ) -> Result<Vec<PoolInfo>> {
        let mut discovered = Vec::new();

        if let Ok(resp) = self.http.get("https://api-v3.raydium.io/pools/info/mint")
            .query(&[
                ("mint1", mint_a), ("mint2", mint_b), ("poolType", "concentrated"),
                ("poolSortField", "liquidity"), ("sortType", "desc"),
                ("pageSize", "10"), ("page", "1"),
            ])
            .send().await
        {
            if let Ok(data) = resp.json::<RaydiumPoolListResponse>().await {
                for pool in data.data.data {
                    if let Ok(addr) = Pubkey::from_str(&pool.id) {
                        discovered.push(PoolInfo {
                            address: addr,
                            program_id: raydium_clmm_program(),
                            dex: Dex::RaydiumClmm,
                            token_a: pool.mint_a.address.clone().unwrap_or_else(|| mint_a.to_string()),
                            token_b: pool.mint_b.address.clone().unwrap_or_else(|| mint_b.to_string()),
                            label: format!("Raydium CLMM {}", pair_label),
                        });
                    }
                }
            }
        }

        if let Ok(resp) = self.http.get("https://api.mainnet.orca.so/v1/whirlpool/list").send().await {
            if let Ok(data) = resp.json::<OrcaWhirlpoolListResponse>().await {
                for wp in data.whirlpools {
                    let ta = wp.token_a.mint.as_str();
                    let tb = wp.token_b.mint.as_str();
                    let matches = (ta == mint_a && tb == mint_b) || (ta == mint_b && tb == mint_a);
                    if matches {
                        if let Ok(addr) = Pubkey::from_str(&wp.address) {
                            discovered.push(PoolInfo {
                                address: addr,
                                program_id: orca_whirlpool_program(),
                                dex: Dex::Orca,
                                token_a: ta.to_string(),
                                token_b: tb.to_string(),
                                label: format!("Orca Whirlpool {}", pair_label),
                            });
                        }
                    }
                }
            }
        }

        for pool in discovered.iter().cloned() {
            self.register_pool(pool).await;
        }
        self.log_pair_summary(mint_a, mint_b, pair_label).await;
        Ok(discovered)
    }

    async fn log_pair_summary(&self, mint_a: &str, mint_b: &str, pair_label: &str) {
        let key = Self::pair_key(mint_a, mint_b);
        let pairs = self.pairs.lock().await;
        if let Some(pp) = pairs.get(&key) {
            let dexes: HashSet<&str> = pp.pools.iter().map(|p| p.dex.as_str()).collect();
            let mut sorted: Vec<&&str> = dexes.iter().collect();
            sorted.sort();
            log::info!(
                "Pools pour {}: {} pools sur {} DEX ({})",
                if pair_label.is_empty() { &key } else { pair_label },
                pp.pools.len(),
                dexes.len(),
                sorted.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", "),
            );
        }
    }

    /// Récupère l'état actuel de tous les pools enregistrés pour une paire
    pub async fn fetch_pool_states(&self, mint_a: &str, mint_b: &str) -> Result<Vec<PoolState>> {
        let key = Self::pair_key(mint_a, mint_b);
        let pool_infos = {
            let pairs = self.pairs.lock().await;
            match pairs.get(&key) {
                Some(pp) => pp.pools.clone(),
                None => return Ok(Vec::new()),
            }
        };

        let mut states = Vec::new();
        for info in pool_infos {
            match self.rpc.get_account(&info.address) {
                Ok(account) => {
                    if let Some(state) = pool_decoder::decode_pool(&account.data, info.address, &info.program_id) {
                        states.push(state);
                    }
                }
                Err(e) => {
                    log::debug!("Échec récupération pool {}: {}", info.address, e);
                }
            }
        }
        Ok(states)
    }

    pub async fn get_pair_pools(&self, mint_a: &str, mint_b: &str) -> Option<PairPools> {
        let key = Self::pair_key(mint_a, mint_b);
        self.pairs.lock().await.get(&key).cloned()
    }

    pub async fn total_pools(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn total_pairs(&self) -> usize {
        self.pairs.lock().await.len()
    }

    /// Instantané de toutes les paires enregistrées, pour la construction du
    /// graphe de prix du scanner triangulaire.
    pub async fn all_pairs(&self) -> Vec<PairPools> {
        self.pairs.lock().await.values().cloned().collect()
    }

    /// Retrouve les infos d'un pool enregistré par son adresse, utilisé par le
    /// chemin réactif pour savoir quelle paire et quel DEX une notification concerne.
    pub async fn get_pool_by_address(&self, address: Pubkey) -> Option<PoolInfo> {
        self.pools.lock().await.get(&address).cloned()
    }
}

fn program_to_dex(program_id: &Pubkey) -> Option<Dex> {
    if *program_id == raydium_clmm_program() {
        Some(Dex::RaydiumClmm)
    } else if *program_id == raydium_amm_v4_program() {
        Some(Dex::RaydiumV4)
    } else if *program_id == orca_whirlpool_program() {
        Some(Dex::Orca)
    } else if *program_id == meteora_dlmm_program() {
        Some(Dex::Meteora)
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct JupiterQuoteResponse {
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<JupiterRouteStep>,
}

#[derive(Debug, Deserialize)]
struct JupiterRouteStep {
    #[serde(rename = "swapInfo")]
    swap_info: JupiterSwapInfo,
}

#[derive(Debug, Deserialize)]
struct JupiterSwapInfo {
    #[serde(rename = "ammKey", default)]
    amm_key: String,
    #[serde(default)]
    label: String,
    #[serde(rename = "inputMint", default)]
    input_mint: Option<String>,
    #[serde(rename = "outputMint", default)]
    output_mint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RaydiumPoolListResponse {
    data: RaydiumPoolListData,
}

#[derive(Debug, Deserialize)]
struct RaydiumPoolListData {
    #[serde(default)]
    data: Vec<RaydiumPoolEntry>,
}

#[derive(Debug, Deserialize)]
struct RaydiumPoolEntry {
    id: String,
    #[serde(rename = "mintA")]
    mint_a: RaydiumMintRef,
    #[serde(rename = "mintB")]
    mint_b: RaydiumMintRef,
}

#[derive(Debug, Deserialize)]
struct RaydiumMintRef {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrcaWhirlpoolListResponse {
    whirlpools: Vec<OrcaWhirlpoolEntry>,
}

#[derive(Debug, Deserialize)]
struct OrcaWhirlpoolEntry {
    address: String,
    #[serde(rename = "tokenA")]
    token_a: OrcaTokenRef,
    #[serde(rename = "tokenB")]
    token_b: OrcaTokenRef,
}

#[derive(Debug, Deserialize)]
struct OrcaTokenRef {
    mint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(PoolRegistry::pair_key("b", "a"), PoolRegistry::pair_key("a", "b"));
    }

    #[test]
    fn test_label_to_program_raydium_clmm() {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let registry = PoolRegistry::new(rpc, String::new());
        assert_eq!(registry.label_to_program("Raydium CLMM"), Some(raydium_clmm_program()));
    }

    #[test]
    fn test_label_to_program_unknown_dex() {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let registry = PoolRegistry::new(rpc, String::new());
        assert_eq!(registry.label_to_program("Phoenix"), None);
    }

    #[tokio::test]
    async fn test_register_pool_dedup() {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let registry = PoolRegistry::new(rpc, String::new());
        let pool = PoolInfo {
            address: Pubkey::new_unique(),
            program_id: raydium_clmm_program(),
            dex: Dex::RaydiumClmm,
            token_a: "A".to_string(),
            token_b: "B".to_string(),
            label: "test".to_string(),
        };
        registry.register_pool(pool.clone()).await;
        registry.register_pool(pool).await;
        assert_eq!(registry.total_pools().await, 1);
    }
}
