//! Stratégie dynamique de frais — ajuste priority fee et tip Jito selon la
//! qualité de l'opportunité. Les meilleures opportunités reçoivent des tips
//! plus élevés (plus compétitifs pour l'inclusion), les marginales gardent
//! le minimum pour préserver le profit.

/// Paramètres de frais calculés pour une opportunité donnée
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub compute_unit_price: u64,
    pub jito_tip_lamports: u64,
    pub total_sol_cost: u64,
}

#[derive(Debug, Clone)]
pub struct FeeStrategy {
    pub min_tip: u64,
    pub max_tip: u64,
    pub tip_share: f64,
    pub min_cu_price: u64,
    pub max_cu_price: u64,
    pub base_cu_price: u64,
    pub compute_units: u64,
}

impl Default for FeeStrategy {
    fn default() -> Self {
        Self {
            min_tip: 1_000,
            max_tip: 100_000,
            tip_share: 0.40,
            min_cu_price: 1_000,
            max_cu_price: 200_000,
            base_cu_price: 10_000,
            compute_units: 400_000,
        }
    }
}

impl FeeStrategy {
    /// Construit une stratégie dérivée des bornes de tip/priority-fee d'un scan de paire
    pub fn from_pair_params(jito_tip: u64, priority_fee_micro: u64, compute_units: u64) -> Self {
        Self {
            min_tip: 1_000.max(jito_tip / 10),
            max_tip: jito_tip * 10,
            tip_share: 0.40,
            min_cu_price: 1_000.max(priority_fee_micro / 10),
            max_cu_price: priority_fee_micro * 8,
            base_cu_price: priority_fee_micro,
            compute_units,
        }
    }

    /// Calcule les frais dynamiques pour une opportunité donnée.
    ///
    /// `gross_profit_usdc`: différence brute leg2_out - borrow_amount (unités USDC)
    /// `flash_loan_fee`: frais du flash loan (unités USDC)
    /// `sol_price_usdc`: prix du SOL en unités USDC (6 décimales, défaut ~$85)
    pub fn compute_fees(&self, gross_profit_usdc: i64, flash_loan_fee: i64, sol_price_usdc: i64) -> FeeParams {
        let net_before_sol = gross_profit_usdc - flash_loan_fee;

        if net_before_sol <= 0 {
            return FeeParams {
                compute_unit_price: self.min_cu_price,
                jito_tip_lamports: self.min_tip,
                total_sol_cost: self.total_sol(self.min_cu_price, self.min_tip),
            };
        }

        // Conversion du profit USDC en lamports SOL pour dimensionner le tip
        let profit_in_sol = (net_before_sol as i128 * 1_000_000_000) / sol_price_usdc.max(1) as i128;

        let raw_tip = (profit_in_sol as f64 * self.tip_share) as i64;
        let tip = (self.min_tip as i64).max(raw_tip.min(self.max_tip as i64)) as u64;

        let fee_denom = (flash_loan_fee * 10000 / 9).max(1);
        let profit_bps_approx = net_before_sol * 10000 / fee_denom;

        let mut cu_price = if profit_bps_approx >= 50 {
            self.max_cu_price
        } else if profit_bps_approx >= 20 {
            self.max_cu_price / 2
        } else if profit_bps_approx >= 10 {
            self.base_cu_price * 2
        } else {
            self.base_cu_price
        };
        cu_price = cu_price.clamp(self.min_cu_price, self.max_cu_price);

        let mut total_sol = self.total_sol(cu_price, tip);
        let mut tip = tip;

        // Sécurité: les frais ne dépassent jamais 80% du profit
        let max_sol_budget = (profit_in_sol as f64 * 0.80) as i64;
        if total_sol as i64 > max_sol_budget && max_sol_budget > 0 {
            let scale = max_sol_budget as f64 / total_sol as f64;
            tip = self.min_tip.max((tip as f64 * scale) as u64);
            cu_price = self.min_cu_price.max((cu_price as f64 * scale) as u64);
            total_sol = self.total_sol(cu_price, tip);
        }

        log::debug!(
            "Frais dynamiques: cu_price={} tip={} total_sol={} profit_sol={}",
            cu_price, tip, total_sol, profit_in_sol,
        );

        FeeParams {
            compute_unit_price: cu_price,
            jito_tip_lamports: tip,
            total_sol_cost: total_sol,
        }
    }

    fn total_sol(&self, cu_price: u64, tip: u64) -> u64 {
        let base_fee = 5_000u64;
        let priority_fee = cu_price * self.compute_units / 1_000_000;
        base_fee + priority_fee + tip
    }

    /// Convertit le coût total en SOL vers des unités USDC
    pub fn estimate_sol_cost_usdc(&self, fee_params: &FeeParams, sol_price_usdc: u64) -> u64 {
        (fee_params.total_sol_cost as u128 * sol_price_usdc as u128 / 1_000_000_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprofitable_before_sol_uses_minimums() {
        let strat = FeeStrategy::default();
        let params = strat.compute_fees(100, 200, 85_000_000);
        assert_eq!(params.compute_unit_price, strat.min_cu_price);
        assert_eq!(params.jito_tip_lamports, strat.min_tip);
    }

    #[test]
    fn test_high_profit_uses_max_cu_price() {
        let strat = FeeStrategy::default();
        // large gross profit relative to a tiny fee => profit_bps_approx huge
        let params = strat.compute_fees(10_000_000, 9, 85_000_000);
        assert_eq!(params.compute_unit_price, strat.max_cu_price);
    }

    #[test]
    fn test_tip_never_exceeds_max() {
        let strat = FeeStrategy::default();
        let params = strat.compute_fees(1_000_000_000, 9, 85_000_000);
        assert!(params.jito_tip_lamports <= strat.max_tip);
    }

    #[test]
    fn test_fee_cap_never_exceeds_80pct_profit() {
        let strat = FeeStrategy::default();
        let gross = 50_000_000i64;
        let fee = 9i64;
        let params = strat.compute_fees(gross, fee, 85_000_000);
        let profit_in_sol = ((gross - fee) as i128 * 1_000_000_000 / 85_000_000) as f64;
        assert!(params.total_sol_cost as f64 <= profit_in_sol * 0.80 + 1.0);
    }

    #[test]
    fn test_from_pair_params_derivation() {
        let strat = FeeStrategy::from_pair_params(10_000, 25_000, 400_000);
        assert_eq!(strat.min_tip, 1_000);
        assert_eq!(strat.max_tip, 100_000);
        assert_eq!(strat.base_cu_price, 25_000);
        assert_eq!(strat.max_cu_price, 200_000);
    }
}
