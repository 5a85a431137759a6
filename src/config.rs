//! Configuration du moteur d'arbitrage
//! Gère le chargement depuis .env et la validation des paramètres

use std::env;
use std::str::FromStr;
use anyhow::{Result, anyhow};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use serde::{Deserialize, Serialize};

/// Configuration principale du moteur
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    #[serde(skip_serializing)]
    pub wallet_path: String,
    pub flash_loan_program_id: Pubkey,
    pub flash_loan_token_mint: Pubkey,
    pub borrow_amount: u64,
    pub pairs: Vec<String>,
    pub min_profit_bps: i64,
    pub max_slippage_bps: u16,
    pub poll_interval_ms: u64,
    pub dry_run: bool,
    pub priority_fee_micro_lamports: u64,
    pub compute_unit_limit: u32,
    pub max_consecutive_failures: u32,
    pub use_jito: bool,
    pub jito_region: String,
    pub jito_tip_lamports: u64,
    pub jupiter_api_key: String,
    pub use_raydium: bool,
    pub rpc_timeout_ms: u64,
}

/// Adresses des programmes Solana mainnet utilisées au-delà du programme de flash loan
pub struct ProgramIds;

impl ProgramIds {
    pub fn token_program() -> Pubkey {
        spl_token::id()
    }

    pub fn associated_token_program() -> Pubkey {
        spl_associated_token_account::id()
    }

    pub fn system_program() -> Pubkey {
        solana_sdk::system_program::id()
    }

    pub fn address_lookup_table_program() -> Pubkey {
        Pubkey::from_str("AddressLookupTab1e1111111111111111111111111").unwrap()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: None,
            wallet_path: String::new(),
            flash_loan_program_id: Pubkey::from_str("2chVPk6DV21qWuyUA2eHAzATdFSHM7ykv1fVX7Gv6nor").unwrap(),
            flash_loan_token_mint: Pubkey::from_str("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap(),
            borrow_amount: 200_000_000, // 200 USDC (6 décimales)
            pairs: vec!["SOL/USDC".to_string()],
            min_profit_bps: 5,
            max_slippage_bps: 50,
            poll_interval_ms: 15_000,
            dry_run: true, // SÉCURITÉ: toujours true par défaut
            priority_fee_micro_lamports: 25_000,
            compute_unit_limit: 400_000,
            max_consecutive_failures: 10,
            use_jito: false,
            jito_region: "default".to_string(),
            jito_tip_lamports: 10_000,
            jupiter_api_key: String::new(),
            use_raydium: true,
            rpc_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        config.rpc_url = env::var("RPC_URL")
            .map_err(|_| anyhow!("RPC_URL requis"))?;

        if let Ok(ws) = env::var("WS_URL") {
            if !ws.trim().is_empty() {
                config.ws_url = Some(ws);
            }
        }

        config.wallet_path = env::var("WALLET_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/.config/solana/id.json", home)
        });

        if let Ok(v) = env::var("FLASH_LOAN_PROGRAM_ID") {
            config.flash_loan_program_id = Pubkey::from_str(&v)
                .map_err(|e| anyhow!("FLASH_LOAN_PROGRAM_ID invalide: {}", e))?;
        }
        if let Ok(v) = env::var("FLASH_LOAN_TOKEN_MINT") {
            config.flash_loan_token_mint = Pubkey::from_str(&v)
                .map_err(|e| anyhow!("FLASH_LOAN_TOKEN_MINT invalide: {}", e))?;
        }
        if let Ok(v) = env::var("BORROW_AMOUNT") {
            config.borrow_amount = v.parse().unwrap_or(config.borrow_amount);
        }
        if let Ok(v) = env::var("PAIRS") {
            config.pairs = v.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
        }
        if let Ok(v) = env::var("MIN_PROFIT_BPS") {
            config.min_profit_bps = v.parse().unwrap_or(config.min_profit_bps);
        }
        if let Ok(v) = env::var("MAX_SLIPPAGE_BPS") {
            config.max_slippage_bps = v.parse().unwrap_or(config.max_slippage_bps);
        }
        if let Ok(v) = env::var("POLL_INTERVAL_MS") {
            config.poll_interval_ms = v.parse().unwrap_or(config.poll_interval_ms);
        }
        if let Ok(v) = env::var("DRY_RUN") {
            config.dry_run = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("PRIORITY_FEE") {
            config.priority_fee_micro_lamports = v.parse().unwrap_or(config.priority_fee_micro_lamports);
        }
        if let Ok(v) = env::var("COMPUTE_UNIT_LIMIT") {
            config.compute_unit_limit = v.parse().unwrap_or(config.compute_unit_limit);
        }
        if let Ok(v) = env::var("MAX_CONSECUTIVE_FAILURES") {
            config.max_consecutive_failures = v.parse().unwrap_or(config.max_consecutive_failures);
        }
        if let Ok(v) = env::var("USE_JITO") {
            config.use_jito = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("JITO_REGION") {
            config.jito_region = v;
        }
        if let Ok(v) = env::var("JITO_TIP_LAMPORTS") {
            config.jito_tip_lamports = v.parse().unwrap_or(config.jito_tip_lamports);
        }
        if let Ok(v) = env::var("JUPITER_API_KEY") {
            config.jupiter_api_key = v;
        }
        if let Ok(v) = env::var("USE_RAYDIUM") {
            config.use_raydium = !v.eq_ignore_ascii_case("false");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(anyhow!("RPC_URL requis"));
        }
        if self.pairs.is_empty() {
            return Err(anyhow!("Au moins une paire requise (PAIRS)"));
        }
        if self.max_slippage_bps > 1000 {
            return Err(anyhow!("Slippage maximum: 1000 bps"));
        }
        self.get_keypair()?;
        Ok(())
    }

    pub fn get_keypair(&self) -> Result<Keypair> {
        let resolved = if let Some(rest) = self.wallet_path.strip_prefix("~/") {
            format!("{}/{}", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()), rest)
        } else {
            self.wallet_path.clone()
        };
        let data = std::fs::read_to_string(&resolved)
            .map_err(|e| anyhow!("Wallet introuvable {}: {}", resolved, e))?;
        let bytes: Vec<u8> = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Wallet JSON invalide: {}", e))?;
        Keypair::from_bytes(&bytes)
            .map_err(|e| anyhow!("Keypair invalide: {}", e))
    }

    pub fn get_rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn display_safe(&self) {
        log::info!("══════════════════════════════════════");
        log::info!("   CONFIGURATION MOTEUR D'ARBITRAGE");
        log::info!("══════════════════════════════════════");
        log::info!("RPC: {}", self.rpc_url);
        log::info!("WS: {}", self.ws_url.as_deref().unwrap_or("(désactivé)"));
        log::info!("Paires: {}", self.pairs.join(", "));
        log::info!("Borrow par défaut: {} unités de base", self.borrow_amount);
        log::info!("Profit min: {} bps | Slippage max: {} bps", self.min_profit_bps, self.max_slippage_bps);
        log::info!("Poll: {} ms", self.poll_interval_ms);
        log::info!("Mode: {}", if self.dry_run { "🔒 DRY-RUN (simulation)" } else { "🚀 PRODUCTION" });
        log::info!("Jito: {} ({}) | Raydium direct: {}", self.use_jito, self.jito_region, self.use_raydium);
        if let Ok(kp) = self.get_keypair() {
            log::info!("Wallet: {}", kp.pubkey());
        }
        log::info!("══════════════════════════════════════");
    }
}
