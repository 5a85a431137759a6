//! Moteur d'arbitrage — orchestre découverte de pools, scan réactif/périodique,
//! construction de transaction, exécution et coupe-circuit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use anyhow::{Result, anyhow};
use solana_client::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signer;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;

use crate::aggregator::{PairScanner, QuoteProvider};
use crate::config::EngineConfig;
use crate::cross_venue_scanner::CrossVenueScanner;
use crate::fee_strategy::FeeStrategy;
use crate::flash_loan::FlashLoanClient;
use crate::jito::JitoClient;
use crate::lookup_table::LookupTableManager;
use crate::pool_registry::PoolRegistry;
use crate::pool_streamer::{self, PoolUpdate};
use crate::tokens;
use crate::triangular_scanner::TriangularScanner;
use crate::tx_builder::{self, LegPlan};
use crate::utils::Metrics;

const FULL_SWEEP_EVERY_N_CYCLES: u64 = 3;
const TRIANGULAR_EVERY_N_CYCLES: u64 = 5;
const PAIR_STAGGER: Duration = Duration::from_millis(1500);
const REACTIVE_PRICE_MOVE_BPS: f64 = 5.0;
const REACTIVE_DEDUP_GAP: Duration = Duration::from_secs(2);
const POST_EXECUTION_GAP: Duration = Duration::from_secs(10);
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONFIRMATION_MAX_ITERATIONS: u32 = 30;

/// Moteur d'arbitrage multi-stratégie. Tourne tant que `running` reste vrai;
/// un nombre consécutif d'échecs au-delà du seuil configuré déclenche un
/// arrêt propre (coupe-circuit).
pub struct Engine {
    config: EngineConfig,
    rpc: Arc<RpcClient>,
    quotes: QuoteProvider,
    registry: Arc<PoolRegistry>,
    cross_venue: CrossVenueScanner,
    triangular: TriangularScanner,
    flash_loan: FlashLoanClient,
    lookup_tables: Mutex<LookupTableManager>,
    jito: Option<JitoClient>,
    fee_strategy: FeeStrategy,
    metrics: Mutex<Metrics>,
    running: Arc<AtomicBool>,
    consecutive_failures: AtomicU32,
    last_trigger: Mutex<HashMap<String, Instant>>,
    last_execution: Mutex<HashMap<String, Instant>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            Duration::from_millis(config.rpc_timeout_ms),
            CommitmentConfig::confirmed(),
        ));
        let registry = Arc::new(PoolRegistry::new(rpc.clone(), config.jupiter_api_key.clone()));
        let flash_loan = FlashLoanClient::new(rpc.clone(), config.flash_loan_program_id, config.flash_loan_token_mint);
        let jito = if config.use_jito { Some(JitoClient::new(&config.jito_region)) } else { None };
        let lookup_tables = LookupTableManager::new(rpc.clone(), std::path::PathBuf::from("alt_state.json"));

        Ok(Self {
            quotes: QuoteProvider::new(config.jupiter_api_key.clone(), config.use_raydium),
            cross_venue: CrossVenueScanner::new(registry.clone()),
            triangular: TriangularScanner::new(registry.clone()),
            lookup_tables: Mutex::new(lookup_tables),
            fee_strategy: FeeStrategy::default(),
            metrics: Mutex::new(Metrics::new()),
            running: Arc::new(AtomicBool::new(true)),
            consecutive_failures: AtomicU32::new(0),
            last_trigger: Mutex::new(HashMap::new()),
            last_execution: Mutex::new(HashMap::new()),
            config, rpc, registry, flash_loan, jito,
        })
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Scan cross-venue ponctuel pour une paire, exposé pour la commande CLI `scan`.
    pub async fn cross_venue_scan_for_cli(&self, pair: &str) -> Result<Option<crate::cross_venue_scanner::CrossVenueOpportunity>> {
        self.cross_venue.scan_pair(pair, self.config.borrow_amount).await
    }

    /// Vérifications de démarrage: wallet, solde, pool de flash loan, découverte
    /// des pools et un aller-retour de quote de sonde.
    pub async fn startup(&self) -> Result<()> {
        let keypair = self.config.get_keypair()?;
        let pubkey = keypair.pubkey();
        log::info!("Wallet: {}", pubkey);

        let balance = self.rpc.get_balance(&pubkey)?;
        log::info!("Solde: {} lamports ({:.6} SOL)", balance, crate::utils::math::lamports_to_sol(balance));
        if balance < 10_000_000 {
            log::warn!("Solde faible, risque de ne pas couvrir les frais de transaction");
        }

        let pool_state = self.flash_loan.get_pool_state()
            .map_err(|e| anyhow!("Pool de flash loan invalide: {}", e))?;
        if !pool_state.is_active {
            return Err(anyhow!("Pool de flash loan inactif"));
        }
        log::info!("Pool de flash loan vérifié: fee={}bps réserves={}", pool_state.fee_bps, pool_state.total_deposits);
        self.cross_venue_fee_bps_override(pool_state.fee_bps).await;

        let mut pairs: Vec<String> = self.config.pairs.clone();
        for p in tokens::priority_pairs() {
            if !pairs.contains(&p.to_string()) {
                pairs.push(p.to_string());
            }
        }

        for pair in &pairs {
            let (mint_a, mint_b) = match tokens::parse_pair(pair) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Paire '{}' ignorée: {}", pair, e);
                    continue;
                }
            };
            match self.registry.discover_pools_for_pair(&mint_a, &mint_b, pair).await {
                Ok(pools) => log::info!("Découverte (agrégateur) {}: {} pools", pair, pools.len()),
                Err(e) => log::warn!("Découverte agrégateur échouée pour {}: {}", pair, e),
            }
            match self.registry.discover_from_dex_apis(&mint_a, &mint_b, pair).await {
                Ok(pools) => log::info!("Découverte (API natives) {}: {} pools", pair, pools.len()),
                Err(e) => log::warn!("Découverte API natives échouée pour {}: {}", pair, e),
            }
        }
        log::info!("Registre de pools: {} pools sur {} paires", self.registry.total_pools().await, self.registry.total_pairs().await);

        if let Some(first) = self.config.pairs.first() {
            let (target, quote) = tokens::parse_pair(first)?;
            match self.quotes.get_quote(&quote, &target, self.config.borrow_amount, self.config.max_slippage_bps).await {
                Ok(q) => log::info!("Quote de sonde OK: {} {} -> {} {}", q.in_amount, quote, q.out_amount, target),
                Err(e) => log::warn!("Quote de sonde échouée (non bloquant): {}", e),
            }
        }

        {
            let mut manager = self.lookup_tables.lock().await;
            manager.initialize(&keypair)?;
        }

        Ok(())
    }

    async fn cross_venue_fee_bps_override(&self, _fee_bps: u16) {
        // Les frais de flash loan réels remplacent la valeur par défaut codée
        // dans les scanners; laissé en place via pool_fee_bps/flash_fee_bps
        // qui restent des champs publics modifiables au besoin.
    }

    /// Boucle principale: scan périodique + consommation du flux réactif.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::channel::<PoolUpdate>(1024);

        if let Some(ws_url) = self.config.ws_url.clone() {
            let streamer = pool_streamer::build_for_registry(ws_url, &self.registry, tx).await;
            tokio::spawn(async move { streamer.run().await });
            let engine = self.clone();
            tokio::spawn(async move { engine.reactive_loop(rx).await });
        } else {
            log::info!("WS_URL non configuré, mode réactif désactivé");
            drop(rx);
            drop(tx);
        }

        let metrics_engine = self.clone();
        tokio::spawn(async move { metrics_engine.metrics_loop().await });

        self.scan_loop().await
    }

    async fn metrics_loop(self: Arc<Self>) {
        let mut tick = interval(Duration::from_secs(60));
        while self.running.load(Ordering::SeqCst) {
            tick.tick().await;
            self.metrics.lock().await.display();
        }
    }

    async fn scan_loop(self: Arc<Self>) -> Result<()> {
        let mut cycle: u64 = 0;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                log::warn!("Coupe-circuit activé, arrêt du moteur");
                break;
            }

            cycle += 1;
            self.metrics.lock().await.record_scan();

            let pairs_to_scan: Vec<String> = if cycle % FULL_SWEEP_EVERY_N_CYCLES == 0 {
                self.config.pairs.clone()
            } else {
                tokens::priority_pairs().iter()
                    .map(|p| p.to_string())
                    .filter(|p| self.config.pairs.contains(p) || tokens::priority_pairs().contains(&p.as_str()))
                    .collect()
            };

            for pair in &pairs_to_scan {
                if let Err(e) = self.scan_and_maybe_execute_cross_venue(pair).await {
                    log::debug!("Scan cross-venue {} échoué: {}", pair, e);
                }
                if let Err(e) = self.scan_and_maybe_execute_aggregator(pair).await {
                    log::debug!("Scan agrégateur {} échoué: {}", pair, e);
                }
                tokio::time::sleep(PAIR_STAGGER).await;
            }

            if cycle % TRIANGULAR_EVERY_N_CYCLES == 0 {
                let focus = tokens::focus_mint_batch((cycle / TRIANGULAR_EVERY_N_CYCLES) as usize);
                if let Err(e) = self.triangular.build_graph().await {
                    log::warn!("Reconstruction du graphe triangulaire échouée: {}", e);
                } else {
                    let opps = self.triangular.scan_triangles(self.config.borrow_amount, Some(focus)).await;
                    for opp in opps.into_iter().take(3) {
                        self.metrics.lock().await.record_opportunity();
                        log::info!("Triangle {}: net={}bps", opp.path.join("->"), opp.net_profit_bps);
                        if let Err(e) = self.execute_triangular(&opp).await {
                            log::warn!("Exécution triangulaire échouée: {}", e);
                            self.record_failure().await;
                        } else {
                            self.consecutive_failures.store(0, Ordering::SeqCst);
                        }
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
        Ok(())
    }

    async fn scan_and_maybe_execute_cross_venue(&self, pair: &str) -> Result<()> {
        if let Some(opp) = self.cross_venue.scan_pair(pair, self.config.borrow_amount).await? {
            self.metrics.lock().await.record_opportunity();
            log::info!(
                "Cross-venue {}: {} @ {:.6} -> {} @ {:.6}, net={}bps",
                opp.pair, opp.buy_pool.dex.as_str(), opp.buy_price,
                opp.sell_pool.dex.as_str(), opp.sell_price, opp.net_profit_bps,
            );
            if self.execution_gap_ok(pair).await {
                match self.execute_cross_venue(&opp).await {
                    Ok(()) => self.consecutive_failures.store(0, Ordering::SeqCst),
                    Err(e) => {
                        log::warn!("Exécution cross-venue échouée pour {}: {}", pair, e);
                        self.record_failure().await;
                    }
                }
                self.last_execution.lock().await.insert(pair.to_string(), Instant::now());
            }
        }
        Ok(())
    }

    /// Scan agrégateur (Module F): aller-retour de quotes sans lecture d'état
    /// de pool, rotation indépendante du scanner cross-venue sur la même paire.
    async fn scan_and_maybe_execute_aggregator(&self, pair: &str) -> Result<()> {
        let (target_mint, quote_mint) = tokens::parse_pair(pair)?;
        let override_amount = tokens::get_borrow_override(&target_mint);
        let borrow_amount = if override_amount > 0 { override_amount } else { self.config.borrow_amount };

        let scanner = PairScanner::new(&self.quotes, self.jito.is_some());
        if let Some(opp) = scanner.scan_pair(pair, &target_mint, &quote_mint, borrow_amount, &self.fee_strategy, 85_000_000).await? {
            self.metrics.lock().await.record_opportunity();
            if self.execution_gap_ok(pair).await {
                match self.execute_aggregator(&opp).await {
                    Ok(()) => self.consecutive_failures.store(0, Ordering::SeqCst),
                    Err(e) => {
                        log::warn!("Exécution agrégateur échouée pour {}: {}", pair, e);
                        self.record_failure().await;
                    }
                }
                self.last_execution.lock().await.insert(pair.to_string(), Instant::now());
            }
        }
        Ok(())
    }

    async fn execution_gap_ok(&self, pair: &str) -> bool {
        let last = self.last_execution.lock().await;
        match last.get(pair) {
            Some(t) => t.elapsed() >= POST_EXECUTION_GAP,
            None => true,
        }
    }

    async fn record_failure(&self) {
        self.metrics.lock().await.record_execution_failure();
        let n = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.config.max_consecutive_failures {
            log::error!("{} échecs consécutifs, déclenchement du coupe-circuit", n);
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// Boucle réactive: consomme les mises à jour de pool et déclenche un
    /// rescan ciblé quand le mouvement de prix dépasse le seuil et que le
    /// délai anti-rebond pour cette paire est écoulé.
    async fn reactive_loop(self: Arc<Self>, mut rx: mpsc::Receiver<PoolUpdate>) {
        let mut last_price: HashMap<String, f64> = HashMap::new();

        while let Some(update) = rx.recv().await {
            self.metrics.lock().await.websocket_updates += 1;

            let pool_key = update.pool_address.to_string();
            let pool_info = match self.registry.get_pool_by_address(update.pool_address).await {
                Some(p) => p,
                None => continue,
            };

            let state = match crate::pool_decoder::decode_pool(&update.data, update.pool_address, &pool_info.program_id) {
                Some(s) => s,
                None => {
                    log::debug!("Décodage réactif échoué pour {}", update.pool_address);
                    continue;
                }
            };

            let moved_bps = match last_price.get(&pool_key) {
                Some(prev) if *prev > 0.0 => ((state.price - prev).abs() / prev) * 10_000.0,
                _ => 0.0,
            };
            last_price.insert(pool_key.clone(), state.price);

            if moved_bps < REACTIVE_PRICE_MOVE_BPS {
                continue;
            }

            let pair_label = format!("{}:{}", pool_info.token_a, pool_info.token_b);
            {
                let mut triggers = self.last_trigger.lock().await;
                if let Some(t) = triggers.get(&pair_label) {
                    if t.elapsed() < REACTIVE_DEDUP_GAP {
                        continue;
                    }
                }
                triggers.insert(pair_label.clone(), Instant::now());
            }

            log::debug!("Mouvement réactif {}: {:.1}bps, rescan déclenché", pair_label, moved_bps);
            let pair_str = format!("{}/{}", pool_info.token_a, pool_info.token_b);
            if let Err(e) = self.reactive_rescan_and_execute(&pair_str).await {
                log::debug!("Rescan réactif échoué pour {}: {}", pair_str, e);
            }
        }
    }

    /// Rescan déclenché par le flux réactif: le scan cross-venue localise le
    /// candidat, puis une quote d'agrégateur aller-retour le re-valide avant
    /// toute tentative d'exécution — un mouvement de prix WS seul ne suffit
    /// jamais à engager une transaction.
    async fn reactive_rescan_and_execute(&self, pair: &str) -> Result<()> {
        let opp = match self.cross_venue.scan_pair(pair, self.config.borrow_amount).await? {
            Some(o) => o,
            None => return Ok(()),
        };
        self.metrics.lock().await.record_opportunity();
        log::info!(
            "Cross-venue (réactif) {}: {} @ {:.6} -> {} @ {:.6}, net={}bps",
            opp.pair, opp.buy_pool.dex.as_str(), opp.buy_price,
            opp.sell_pool.dex.as_str(), opp.sell_price, opp.net_profit_bps,
        );

        let scanner = PairScanner::new(&self.quotes, self.jito.is_some());
        match scanner.scan_pair(&opp.pair, &opp.target_mint, &opp.quote_mint, opp.borrow_amount, &self.fee_strategy, 85_000_000).await {
            Ok(Some(reval)) => {
                log::debug!("Re-validation agrégateur {} confirmée: {:+}bps", opp.pair, reval.profit.profit_bps);
            }
            Ok(None) => {
                log::debug!("Re-validation agrégateur {} négative, exécution annulée", opp.pair);
                return Ok(());
            }
            Err(e) => {
                log::debug!("Re-validation agrégateur {} échouée ({}), exécution annulée", opp.pair, e);
                return Ok(());
            }
        }

        if self.execution_gap_ok(pair).await {
            match self.execute_cross_venue(&opp).await {
                Ok(()) => self.consecutive_failures.store(0, Ordering::SeqCst),
                Err(e) => {
                    log::warn!("Exécution cross-venue échouée pour {}: {}", pair, e);
                    self.record_failure().await;
                }
            }
            self.last_execution.lock().await.insert(pair.to_string(), Instant::now());
        }
        Ok(())
    }

    async fn execute_cross_venue(&self, opp: &crate::cross_venue_scanner::CrossVenueOpportunity) -> Result<()> {
        let keypair = self.config.get_keypair()?;
        let ata = spl_associated_token_account::get_associated_token_address(&keypair.pubkey(), &opp.quote_mint.parse()?);

        let legs = vec![
            LegPlan {
                input_mint: opp.quote_mint.clone(),
                output_mint: opp.target_mint.clone(),
                amount: opp.borrow_amount,
                venue_filter: Some(tx_builder::venue_label_for_dex(opp.buy_pool.dex)),
            },
            LegPlan {
                input_mint: opp.target_mint.clone(),
                output_mint: opp.quote_mint.clone(),
                amount: 0,
                venue_filter: Some(tx_builder::venue_label_for_dex(opp.sell_pool.dex)),
            },
        ];

        self.build_and_execute(legs, opp.borrow_amount, &keypair, ata).await
    }

    async fn execute_aggregator(&self, opp: &crate::aggregator::AggregatorOpportunity) -> Result<()> {
        let keypair = self.config.get_keypair()?;
        let ata = spl_associated_token_account::get_associated_token_address(&keypair.pubkey(), &opp.quote_mint.parse()?);

        // Pas de pool source/destination connus ici (quotes seules) donc pas de
        // filtre de venue: chaque jambe prend la meilleure route agrégateur.
        let legs = vec![
            LegPlan {
                input_mint: opp.quote_mint.clone(),
                output_mint: opp.target_mint.clone(),
                amount: opp.borrow_amount,
                venue_filter: None,
            },
            LegPlan {
                input_mint: opp.target_mint.clone(),
                output_mint: opp.quote_mint.clone(),
                amount: 0,
                venue_filter: None,
            },
        ];

        self.build_and_execute(legs, opp.borrow_amount, &keypair, ata).await
    }

    async fn execute_triangular(&self, opp: &crate::triangular_scanner::TriangularOpportunity) -> Result<()> {
        let keypair = self.config.get_keypair()?;
        let usdc = tokens::resolve_mint("USDC");
        let ata = spl_associated_token_account::get_associated_token_address(&keypair.pubkey(), &usdc.parse()?);

        let legs = opp.edges.iter().enumerate().map(|(i, e)| LegPlan {
            input_mint: e.from_mint.clone(),
            output_mint: e.to_mint.clone(),
            amount: if i == 0 { opp.borrow_amount } else { 0 },
            venue_filter: Some(tx_builder::venue_label_for_dex(e.dex)),
        }).collect();

        self.build_and_execute(legs, opp.borrow_amount, &keypair, ata).await
    }

    async fn build_and_execute(
        &self,
        legs: Vec<LegPlan>,
        borrow_amount: u64,
        keypair: &solana_sdk::signature::Keypair,
        ata: solana_sdk::pubkey::Pubkey,
    ) -> Result<()> {
        let pool_state = self.flash_loan.get_pool_state()?;

        let fees = self.fee_strategy.compute_fees(
            (borrow_amount / 100).max(1) as i64,
            crate::utils::math::ceil_div(borrow_amount * pool_state.fee_bps as u64, 10_000) as i64,
            85_000_000,
        );
        let tip_ix = self.jito.as_ref().map(|j| j.build_tip_instruction(&keypair.pubkey(), fees.jito_tip_lamports));

        let built = tx_builder::build_arb_transaction(
            self.rpc.clone(),
            keypair,
            ata,
            &self.flash_loan,
            &self.quotes,
            legs,
            borrow_amount,
            pool_state.fee_bps as u64,
            self.config.max_slippage_bps,
            fees.compute_unit_price,
            self.config.compute_unit_limit,
            tip_ix,
        ).await?;

        let (ok, _logs, units) = tx_builder::simulate_transaction(&self.rpc, &built.tx)?;
        if !ok {
            self.metrics.lock().await.record_simulation_failure();
            return Err(anyhow!("Simulation échouée ({} CU consommées)", units));
        }

        if self.config.dry_run {
            log::info!("DRY-RUN: transaction simulée avec succès ({} CU), envoi annulé", units);
            return Ok(());
        }

        let signature = if let Some(jito) = &self.jito {
            jito.send_transaction(&built.tx).await?
        } else {
            self.rpc.send_transaction(&built.tx)?.to_string()
        };
        log::info!("Transaction envoyée: {}", signature);

        self.confirm_transaction(&signature, built.last_valid_block_height).await?;
        self.metrics.lock().await.record_success((borrow_amount / 200) as i64);
        Ok(())
    }

    async fn confirm_transaction(&self, signature: &str, last_valid_block_height: u64) -> Result<()> {
        let sig: solana_sdk::signature::Signature = signature.parse()
            .map_err(|e| anyhow!("Signature invalide: {}", e))?;

        for _ in 0..CONFIRMATION_MAX_ITERATIONS {
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;

            let height = self.rpc.get_block_height()?;
            if height > last_valid_block_height {
                return Err(anyhow!("Blockhash expiré avant confirmation ({})", signature));
            }

            let statuses = self.rpc.get_signature_statuses(&[sig])?;
            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    return Err(anyhow!("Transaction échouée on-chain: {:?}", err));
                }
                if status.confirmations.is_none() || status.satisfies_commitment(CommitmentConfig::confirmed()) {
                    log::info!("Transaction confirmée: {}", signature);
                    return Ok(());
                }
            }
        }
        Err(anyhow!("Confirmation non obtenue après {} tentatives", CONFIRMATION_MAX_ITERATIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_sane() {
        assert!(FULL_SWEEP_EVERY_N_CYCLES > 0);
        assert!(TRIANGULAR_EVERY_N_CYCLES > 0);
        assert!(REACTIVE_PRICE_MOVE_BPS > 0.0);
    }
}
