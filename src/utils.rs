//! Utilitaires: statistiques, calculs, rate limiting, retry

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

/// Métriques d'exécution du moteur
#[derive(Debug, Default)]
pub struct Metrics {
    pub start_time: Option<DateTime<Utc>>,
    pub scan_cycles: u64,
    pub opportunities_found: u64,
    pub successful_arbs: u64,
    pub simulation_failures: u64,
    pub execution_failures: u64,
    pub total_profit_lamports: i64,
    pub raydium_quotes: u64,
    pub jupiter_quotes: u64,
    pub tracked_pool_count: u64,
    pub websocket_updates: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record_scan(&mut self) {
        self.scan_cycles += 1;
    }

    pub fn record_opportunity(&mut self) {
        self.opportunities_found += 1;
    }

    pub fn record_success(&mut self, profit_lamports: i64) {
        self.successful_arbs += 1;
        self.total_profit_lamports += profit_lamports;
    }

    pub fn record_simulation_failure(&mut self) {
        self.simulation_failures += 1;
    }

    pub fn record_execution_failure(&mut self) {
        self.execution_failures += 1;
    }

    pub fn record_quote(&mut self, from_raydium: bool) {
        if from_raydium {
            self.raydium_quotes += 1;
        } else {
            self.jupiter_quotes += 1;
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        match self.start_time {
            Some(t) => (Utc::now() - t).num_seconds(),
            None => 0,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.scan_cycles == 0 {
            0.0
        } else {
            self.opportunities_found as f64 / self.scan_cycles as f64 * 100.0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "uptime={}s cycles={} opps={} hit_rate={:.2}% arbs={} profit={:.6} SOL raydium_quotes={} jupiter_quotes={}",
            self.uptime_secs(),
            self.scan_cycles,
            self.opportunities_found,
            self.hit_rate(),
            self.successful_arbs,
            math::lamports_to_sol(self.total_profit_lamports.max(0) as u64),
            self.raydium_quotes,
            self.jupiter_quotes,
        )
    }

    pub fn display(&self) {
        log::info!("═══════════════════════════════════════");
        log::info!("           MÉTRIQUES MOTEUR            ");
        log::info!("═══════════════════════════════════════");
        log::info!("Temps de fonctionnement: {}s", self.uptime_secs());
        log::info!("Cycles de scan: {}", self.scan_cycles);
        log::info!("Opportunités trouvées: {} (hit rate {:.2}%)", self.opportunities_found, self.hit_rate());
        log::info!("Arbitrages réussis: {}", self.successful_arbs);
        log::info!("  ✗ Échecs simulation: {}", self.simulation_failures);
        log::info!("  ✗ Échecs exécution: {}", self.execution_failures);
        log::info!("Profit total: {} lamports ({:.6} SOL)",
            self.total_profit_lamports,
            math::lamports_to_sol(self.total_profit_lamports.max(0) as u64));
        log::info!("Quotes: Raydium={} Jupiter={}", self.raydium_quotes, self.jupiter_quotes);
        log::info!("═══════════════════════════════════════");
    }
}

/// Calculs mathématiques
pub mod math {
    /// Lamports to SOL
    pub fn lamports_to_sol(lamports: u64) -> f64 {
        lamports as f64 / 1_000_000_000.0
    }

    /// Division entière arrondie vers le haut
    pub fn ceil_div(numerator: u64, denominator: u64) -> u64 {
        (numerator + denominator - 1) / denominator
    }
}

/// Rate limiter simple
pub struct RateLimiter {
    requests_per_second: u32,
    last_request: std::time::Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            requests_per_second: rps,
            last_request: std::time::Instant::now(),
            count: 0,
        }
    }

    pub async fn wait(&mut self) {
        if self.last_request.elapsed().as_secs() >= 1 {
            self.count = 0;
            self.last_request = std::time::Instant::now();
        }

        if self.count >= self.requests_per_second {
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            self.count = 0;
            self.last_request = std::time::Instant::now();
        }

        self.count += 1;
    }
}

/// Retry avec backoff exponentiel
#[allow(dead_code)]
pub async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    max_retries: u32,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay_ms = 500u64;

    for attempt in 1..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt == max_retries {
                    return Err(e);
                }
                log::warn!("Tentative {}/{} échouée: {}. Retry dans {}ms",
                    attempt, max_retries, e, delay_ms);
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }
    }

    Err(anyhow!("Max retries atteint"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_hit_rate() {
        let mut m = Metrics::new();
        m.record_scan();
        m.record_scan();
        m.record_opportunity();
        assert_eq!(m.hit_rate(), 50.0);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(math::ceil_div(10, 3), 4);
        assert_eq!(math::ceil_div(9, 3), 3);
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let mut attempts = 0;
        let result: Result<u32> = retry_with_backoff(|| {
            attempts += 1;
            let a = attempts;
            async move {
                if a < 3 {
                    Err(anyhow!("pas encore"))
                } else {
                    Ok(42)
                }
            }
        }, 5).await;
        assert_eq!(result.unwrap(), 42);
    }
}
