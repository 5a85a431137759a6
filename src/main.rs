//! Moteur d'Arbitrage Solana - AMM à liquidité concentrée
//! Scan cross-venue, triangulaire et agrégateur, exécution atomique via flash loan

use std::sync::Arc;
use anyhow::Result;
use clap::{Parser, Subcommand};
use solana_sdk::signature::Signer;

mod aggregator;
mod config;
mod cross_venue_scanner;
mod engine;
mod fee_strategy;
mod flash_loan;
mod jito;
mod lookup_table;
mod pool_decoder;
mod pool_registry;
mod pool_streamer;
mod tokens;
mod triangular_scanner;
mod tx_builder;
mod utils;

use config::EngineConfig;
use engine::Engine;

#[derive(Parser)]
#[command(name = "arb-engine")]
#[command(about = "🤖 Moteur d'arbitrage Solana - AMM à liquidité concentrée")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 🚀 Démarre le moteur
    Start {
        #[arg(long, short)]
        dry_run: bool,
    },
    /// 🔍 Scan unique sur toutes les paires configurées
    Scan,
    /// ⚙️ Affiche la config
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).format_timestamp_secs().init();

    print_banner();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { dry_run }) => start_engine(dry_run).await,
        Some(Commands::Scan) => scan_once().await,
        Some(Commands::Config) => show_config().await,
        None => start_engine(false).await,
    }
}

fn print_banner() {
    println!(r#"
╔═══════════════════════════════════════════════════════════════╗
║                                                               ║
║   🤖 MOTEUR D'ARBITRAGE SOLANA v1.0                          ║
║   ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━  ║
║   AMM: Raydium CLMM/v4 • Orca Whirlpool • Meteora DLMM       ║
║   Stratégies: Cross-venue • Triangulaire • Agrégateur        ║
║   Financement: Flash loan atomique                           ║
║                                                               ║
╚═══════════════════════════════════════════════════════════════╝
"#);
}

async fn start_engine(force_dry_run: bool) -> Result<()> {
    log::info!("🚀 Démarrage...");

    let mut config = EngineConfig::load()?;
    if force_dry_run {
        config.dry_run = true;
    }
    config.display_safe();

    let engine = Arc::new(Engine::new(config)?);
    let running = engine.running_flag();

    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Signal d'arrêt reçu, coupure propre en cours");
                running.store(false, std::sync::atomic::Ordering::SeqCst);
            }
        });
    }

    engine.startup().await?;

    log::info!("═══════════════════════════════════════");
    log::info!("   MOTEUR ACTIF");
    log::info!("═══════════════════════════════════════");

    engine.run().await
}

async fn scan_once() -> Result<()> {
    log::info!("🔍 Scan unique...");

    let config = EngineConfig::load()?;
    config.display_safe();

    let engine = Engine::new(config.clone())?;
    engine.startup().await?;

    for pair in &config.pairs {
        match engine.cross_venue_scan_for_cli(pair).await {
            Ok(Some(opp)) => {
                println!("\n{}: {} @ {:.6} -> {} @ {:.6}", opp.pair,
                    opp.buy_pool.dex.as_str(), opp.buy_price,
                    opp.sell_pool.dex.as_str(), opp.sell_price);
                println!("   Spread: {} bps | Net: {} bps", opp.spread_bps, opp.net_profit_bps);
            }
            Ok(None) => log::info!("Aucune opportunité cross-venue pour {}", pair),
            Err(e) => log::warn!("Scan {} échoué: {}", pair, e),
        }
    }

    Ok(())
}

async fn show_config() -> Result<()> {
    let config = EngineConfig::load()?;
    config.display_safe();
    if let Ok(kp) = config.get_keypair() {
        log::info!("Solde requis pour: {}", kp.pubkey());
    }
    Ok(())
}
