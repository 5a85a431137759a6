//! Fournisseur de quotes — interroge Raydium (primaire) puis Jupiter (secours).
//! Raydium n'exige pas de clé API et n'a pas de rate limit strict; Jupiter est
//! utilisé en secours et pour obtenir les instructions de swap à l'exécution.

use std::sync::Mutex;
use std::time::Instant;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const RAYDIUM_API: &str = "https://transaction-v1.raydium.io";
const JUPITER_API: &str = "https://api.jup.ag/swap/v1";

#[derive(Debug, Clone)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    pub route_count: usize,
    pub source: QuoteSource,
    /// Réponse brute, nécessaire pour demander les instructions de swap Jupiter plus tard
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    Raydium,
    Jupiter,
}

struct RateState {
    raydium_cooldown_until: Option<Instant>,
    raydium_last_request: Option<Instant>,
    jup_tokens: f64,
    jup_last_refill: Instant,
}

/// Interroge Raydium puis Jupiter pour obtenir les meilleures quotes de swap
pub struct QuoteProvider {
    jupiter_api_key: String,
    use_raydium: bool,
    raydium_cooldown_sec: u64,
    raydium_min_interval_ms: u64,
    jup_max_tokens: f64,
    jup_refill_rate: f64,
    http: reqwest::Client,
    state: Mutex<RateState>,
}

impl QuoteProvider {
    pub fn new(jupiter_api_key: String, use_raydium: bool) -> Self {
        Self {
            jupiter_api_key,
            use_raydium,
            raydium_cooldown_sec: 60,
            raydium_min_interval_ms: 1200,
            jup_max_tokens: 3.0,
            jup_refill_rate: 0.9,
            http: reqwest::Client::new(),
            state: Mutex::new(RateState {
                raydium_cooldown_until: None,
                raydium_last_request: None,
                jup_tokens: 3.0,
                jup_last_refill: Instant::now(),
            }),
        }
    }

    /// Meilleure quote disponible. Tente Raydium en premier, puis Jupiter en secours.
    /// `venue_filter` restreint Jupiter aux DEX nommés (ex: "Whirlpool"); si la
    /// quote filtrée échoue, l'appelant doit retenter sans filtre pour cette jambe.
    pub async fn get_quote(&self, input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u16) -> Result<Quote> {
        self.get_quote_filtered(input_mint, output_mint, amount, slippage_bps, None).await
    }

    pub async fn get_quote_filtered(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        venue_filter: Option<&str>,
    ) -> Result<Quote> {
        let raydium_available = venue_filter.is_none() && self.use_raydium && {
            let state = self.state.lock().unwrap();
            state.raydium_cooldown_until.map(|t| Instant::now() > t).unwrap_or(true)
        };

        if raydium_available {
            match self.raydium_quote(input_mint, output_mint, amount, slippage_bps).await {
                Ok(q) => return Ok(q),
                Err(e) => {
                    let msg = e.to_string();
                    if msg.contains("429") || msg.contains("1015") || msg.contains("403") {
                        let mut state = self.state.lock().unwrap();
                        state.raydium_cooldown_until = Some(Instant::now() + std::time::Duration::from_secs(self.raydium_cooldown_sec));
                        log::warn!("Raydium rate-limité ({}), pause {}s", &msg[..msg.len().min(60)], self.raydium_cooldown_sec);
                    } else {
                        log::debug!("Quote Raydium échouée: {}", &msg[..msg.len().min(80)]);
                    }
                }
            }
        }

        self.jupiter_quote_filtered(input_mint, output_mint, amount, slippage_bps, venue_filter).await
    }

    async fn raydium_quote(&self, input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u16) -> Result<Quote> {
        let wait_ms = {
            let mut state = self.state.lock().unwrap();
            let wait = match state.raydium_last_request {
                Some(last) => {
                    let elapsed = last.elapsed().as_millis() as u64;
                    self.raydium_min_interval_ms.saturating_sub(elapsed)
                }
                None => 0,
            };
            state.raydium_last_request = Some(Instant::now());
            wait
        };
        if wait_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(wait_ms)).await;
        }

        let url = format!("{}/compute/swap-base-in", RAYDIUM_API);
        let resp = self.http.get(&url)
            .query(&[
                ("inputMint", input_mint), ("outputMint", output_mint),
                ("amount", &amount.to_string()), ("slippageBps", &slippage_bps.to_string()),
                ("txVersion", "V0"),
            ])
            .timeout(std::time::Duration::from_secs(8))
            .send().await
            .map_err(|e| anyhow!("Raydium erreur réseau: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Raydium {}: {}", status.as_u16(), &body[..body.len().min(200)]));
        }

        let data: Value = resp.json().await.map_err(|e| anyhow!("Raydium réponse invalide: {}", e))?;
        if !data.get("success").and_then(Value::as_bool).unwrap_or(false) || data.get("data").is_none() {
            return Err(anyhow!("Raydium quote échouée: {}", data));
        }

        let d = &data["data"];
        let route_count = d.get("routePlan").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
        Ok(Quote {
            input_mint: d.get("inputMint").and_then(Value::as_str).unwrap_or(input_mint).to_string(),
            output_mint: d.get("outputMint").and_then(Value::as_str).unwrap_or(output_mint).to_string(),
            in_amount: parse_u64_field(d, "inputAmount")?,
            out_amount: parse_u64_field(d, "outputAmount")?,
            price_impact_pct: d.get("priceImpactPct").and_then(Value::as_f64).unwrap_or(0.0),
            slippage_bps,
            route_count,
            source: QuoteSource::Raydium,
            raw: data,
        })
    }

    async fn jupiter_quote(&self, input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u16) -> Result<Quote> {
        self.jupiter_quote_filtered(input_mint, output_mint, amount, slippage_bps, None).await
    }

    async fn jupiter_quote_filtered(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        venue_filter: Option<&str>,
    ) -> Result<Quote> {
        self.jup_acquire().await;

        let mut query = vec![
            ("inputMint", input_mint.to_string()), ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()), ("slippageBps", slippage_bps.to_string()),
            ("maxAccounts", "40".to_string()),
        ];
        if let Some(venue) = venue_filter {
            query.push(("dexes", venue.to_string()));
        }
        let mut req = self.http.get(&format!("{}/quote", JUPITER_API)).query(&query);
        if !self.jupiter_api_key.is_empty() {
            req = req.header("x-api-key", &self.jupiter_api_key);
        }
        let resp = req.send().await.map_err(|e| anyhow!("Jupiter erreur réseau: {}", e))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(anyhow!("Jupiter 429: rate limited"));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter {}: {}", status.as_u16(), &body[..body.len().min(200)]));
        }

        let data: Value = resp.json().await.map_err(|e| anyhow!("Jupiter réponse invalide: {}", e))?;
        if data.get("outAmount").is_none() {
            return Err(anyhow!("Jupiter quote vide: {}", data));
        }

        let route_count = data.get("routePlan").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
        Ok(Quote {
            input_mint: data.get("inputMint").and_then(Value::as_str).unwrap_or(input_mint).to_string(),
            output_mint: data.get("outputMint").and_then(Value::as_str).unwrap_or(output_mint).to_string(),
            in_amount: parse_u64_field(&data, "inAmount")?,
            out_amount: parse_u64_field(&data, "outAmount")?,
            price_impact_pct: data.get("priceImpactPct").and_then(Value::as_f64).unwrap_or(0.0),
            slippage_bps,
            route_count,
            source: QuoteSource::Jupiter,
            raw: data,
        })
    }

    async fn jup_acquire(&self) {
        let wait_secs = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();
            let elapsed = now.duration_since(state.jup_last_refill).as_secs_f64();
            state.jup_tokens = self.jup_max_tokens.min(state.jup_tokens + elapsed * self.jup_refill_rate);
            state.jup_last_refill = now;

            if state.jup_tokens >= 1.0 {
                state.jup_tokens -= 1.0;
                0.0
            } else {
                let wait = (1.0 - state.jup_tokens) / self.jup_refill_rate;
                state.jup_tokens = 0.0;
                wait
            }
        };
        if wait_secs > 0.0 {
            tokio::time::sleep(tokio::time::Duration::from_secs_f64(wait_secs)).await;
            let mut state = self.state.lock().unwrap();
            state.jup_last_refill = Instant::now();
        }
    }

    /// Force une quote Jupiter (ignore Raydium), utilisée par le tx builder quand la
    /// quote de jambe provenait de Raydium et qu'on a besoin d'un `raw` compatible
    /// avec `/swap-instructions`.
    pub async fn jupiter_only_quote(&self, input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u16) -> Result<Quote> {
        self.jupiter_quote_filtered(input_mint, output_mint, amount, slippage_bps, None).await
    }

    /// Obtient les instructions de swap Jupiter (utilisé uniquement pour les quotes Jupiter)
    pub async fn get_jupiter_swap_instructions(&self, quote_raw: &Value, user_pubkey: &str) -> Result<Value> {
        self.jup_acquire().await;

        let body = serde_json::json!({
            "quoteResponse": quote_raw,
            "userPublicKey": user_pubkey,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": 0,
        });

        let mut req = self.http.post(&format!("{}/swap-instructions", JUPITER_API)).json(&body);
        if !self.jupiter_api_key.is_empty() {
            req = req.header("x-api-key", &self.jupiter_api_key);
        }
        let resp = req.send().await.map_err(|e| anyhow!("Jupiter swap-instructions réseau: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter swap-instructions {}: {}", status.as_u16(), &text[..text.len().min(200)]));
        }

        let data: Value = resp.json().await.map_err(|e| anyhow!("Jupiter swap-instructions invalide: {}", e))?;
        if data.get("swapInstruction").is_none() {
            return Err(anyhow!("Pas d'instruction de swap: {}", data));
        }
        Ok(data)
    }
}

fn parse_u64_field(v: &Value, field: &str) -> Result<u64> {
    v.get(field)
        .and_then(|x| x.as_str().and_then(|s| s.parse::<u64>().ok()).or_else(|| x.as_u64()))
        .ok_or_else(|| anyhow!("champ {} manquant ou invalide", field))
}

/// Résultat du calcul de profit d'une opportunité cross-venue via l'agrégateur
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitBreakdown {
    pub gross_profit: i64,
    pub flash_loan_fee: i64,
    pub sol_cost_in_token: i64,
    pub net_profit: i64,
    pub profit_bps: i64,
}

/// Calcule le profit net d'un aller-retour leg1/leg2 après frais de flash loan et coûts SOL.
///
/// `pool_fee_bps`: frais de flash loan en bps (ex: 9 = 0.09%)
/// `use_jito`: si faux, le tip est retiré du coût SOL estimé (pas de bundle Jito envoyé)
pub fn calculate_profit(
    borrow_amount: u64,
    leg2_out: u64,
    pool_fee_bps: u64,
    fee_params: &crate::fee_strategy::FeeParams,
    strategy: &crate::fee_strategy::FeeStrategy,
    sol_price_usdc: u64,
    use_jito: bool,
) -> ProfitBreakdown {
    let fee = crate::utils::math::ceil_div(borrow_amount * pool_fee_bps, 10_000) as i64;
    let gross = leg2_out as i64 - borrow_amount as i64;

    let mut sol_cost_in_token = strategy.estimate_sol_cost_usdc(fee_params, sol_price_usdc) as i64;
    if !use_jito {
        let tip_in_token = (fee_params.jito_tip_lamports as u128 * sol_price_usdc as u128 / 1_000_000_000) as i64;
        sol_cost_in_token -= tip_in_token;
    }

    let net = gross - fee - sol_cost_in_token;
    let profit_bps = if borrow_amount == 0 { 0 } else { (net * 10_000) / borrow_amount as i64 };

    ProfitBreakdown {
        gross_profit: gross,
        flash_loan_fee: fee,
        sol_cost_in_token,
        net_profit: net,
        profit_bps,
    }
}

/// Opportunité détectée par un aller-retour de quotes agrégées (sans lecture
/// d'état de pool on-chain): jambe 1 `quote -> target` dimensionnée au
/// principal, jambe 2 `target -> quote` dimensionnée sur la sortie de la
/// jambe 1.
#[derive(Debug, Clone)]
pub struct AggregatorOpportunity {
    pub pair: String,
    pub target_mint: String,
    pub quote_mint: String,
    pub borrow_amount: u64,
    pub leg1_out: u64,
    pub leg2_out: u64,
    pub price_impact_leg1: f64,
    pub price_impact_leg2: f64,
    pub profit: ProfitBreakdown,
    pub source: &'static str,
}

/// Scanne une paire via deux quotes successives de l'agrégateur plutôt que
/// via l'état des pools. Sert à la fois de stratégie autonome (Module F) et
/// de re-validation avant exécution d'une opportunité cross-venue.
pub struct PairScanner<'a> {
    quotes: &'a QuoteProvider,
    pub pool_fee_bps: u64,
    pub min_profit_bps: i64,
    pub slippage_bps: u16,
    pub use_jito: bool,
}

impl<'a> PairScanner<'a> {
    pub fn new(quotes: &'a QuoteProvider, use_jito: bool) -> Self {
        Self {
            quotes,
            pool_fee_bps: 9,
            min_profit_bps: 5,
            slippage_bps: 50,
            use_jito,
        }
    }

    /// Scanne `target/quote` avec un montant de principal donné. Retourne
    /// `None` si le profit net est sous le seuil, ou si la jambe 1 ne produit
    /// aucune sortie.
    pub async fn scan_pair(
        &self,
        pair: &str,
        target_mint: &str,
        quote_mint: &str,
        borrow_amount: u64,
        fee_strategy: &crate::fee_strategy::FeeStrategy,
        sol_price_usdc: u64,
    ) -> Result<Option<AggregatorOpportunity>> {
        let q1 = self.quotes.get_quote(quote_mint, target_mint, borrow_amount, self.slippage_bps).await?;
        if q1.out_amount == 0 {
            return Err(anyhow!("{}: jambe 1 a retourné une sortie nulle", pair));
        }

        let q2 = self.quotes.get_quote(target_mint, quote_mint, q1.out_amount, self.slippage_bps).await?;

        let fee = crate::utils::math::ceil_div(borrow_amount * self.pool_fee_bps, 10_000) as i64;
        let gross = q2.out_amount as i64 - borrow_amount as i64;
        let fee_params = fee_strategy.compute_fees(gross, fee, sol_price_usdc as i64);

        let profit = calculate_profit(
            borrow_amount, q2.out_amount, self.pool_fee_bps,
            &fee_params, fee_strategy, sol_price_usdc, self.use_jito,
        );

        if profit.profit_bps < self.min_profit_bps {
            log::debug!(
                "{}: agrégateur {:+} bps (seuil={}), via={:?}",
                pair, profit.profit_bps, self.min_profit_bps, q1.source,
            );
            return Ok(None);
        }

        log::info!(
            "OPPORTUNITÉ agrégateur {}: {:+} bps, net={}, borrow={}, via={:?}",
            pair, profit.profit_bps, profit.net_profit, borrow_amount, q1.source,
        );

        Ok(Some(AggregatorOpportunity {
            pair: pair.to_string(),
            target_mint: target_mint.to_string(),
            quote_mint: quote_mint.to_string(),
            borrow_amount,
            leg1_out: q1.out_amount,
            leg2_out: q2.out_amount,
            price_impact_leg1: q1.price_impact_pct,
            price_impact_leg2: q2.price_impact_pct,
            profit,
            source: "aggregator",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_strategy::FeeStrategy;

    #[test]
    fn test_parse_u64_field_from_string() {
        let v = serde_json::json!({"outAmount": "12345"});
        assert_eq!(parse_u64_field(&v, "outAmount").unwrap(), 12345);
    }

    #[test]
    fn test_calculate_profit_positive_net() {
        let strategy = FeeStrategy::default();
        let fee_params = strategy.compute_fees(1_000_000, 180, 85_000_000);
        let result = calculate_profit(200_000_000, 201_000_000, 9, &fee_params, &strategy, 85_000_000, true);
        assert_eq!(result.flash_loan_fee, 180_000); // ceil(200_000_000*9/10000)
        assert_eq!(result.gross_profit, 1_000_000);
    }

    #[test]
    fn test_calculate_profit_bps_zero_borrow() {
        let strategy = FeeStrategy::default();
        let fee_params = strategy.compute_fees(0, 0, 85_000_000);
        let result = calculate_profit(0, 0, 9, &fee_params, &strategy, 85_000_000, true);
        assert_eq!(result.profit_bps, 0);
    }

    #[test]
    fn test_pair_scanner_default_thresholds() {
        let quotes = QuoteProvider::new(String::new(), true);
        let scanner = PairScanner::new(&quotes, false);
        assert_eq!(scanner.pool_fee_bps, 9);
        assert_eq!(scanner.min_profit_bps, 5);
    }
}
