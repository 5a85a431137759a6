//! Table des mints connus, décimales, et utilitaires de paires

use std::collections::HashMap;
use anyhow::{Result, anyhow};

/// Adresses mint bien connues par symbole
pub fn well_known_mints() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("SOL", "So11111111111111111111111111111111111111112"),
        ("USDC", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        ("USDT", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
        ("JUP", "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN"),
        ("RAY", "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R"),
        ("ORCA", "orcaEKTdK7LKz57vaAYr9QeNsVEPfiu6QeMU1kektZE"),
        ("PYTH", "HZ1JovNiVvGrGNiiYvEozEVgZ58xaU3RKwX8eACQBCt3"),
        ("RENDER", "rndrizKT3MK1iimdxRdWabcF7Zg7AR5T4nud4EkHBof"),
        ("HNT", "hntyVP6YFm1Hg25TN9WGLqM12b8TQmcknKrdu1oxWux"),
        ("W", "85VBFQZC9TZkfaptBWjvUw7YbZjy52A6mjtPGjstQAmQ"),
        ("TNSR", "TNSRxcUxoT9xBG3de7PiJyTDYu7kskLqcpddxnEJAS6"),
        ("JTO", "jtojtomepa8beP8AuQc6eXt5FriJwfFMwQx2v2f9mCL"),
        ("MSOL", "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So"),
        ("JITOSOL", "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn"),
        ("BSOL", "bSo13r4TkiE4KumL71LsHTPpL2euBYLFx6h9HP3piy1"),
        ("INF", "5oVNBeEEQvYi1cX3ir8Dx5n1P7pdxydbGF2X4TxVusJm"),
        ("BONK", "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263"),
        ("WIF", "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm"),
        ("POPCAT", "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr"),
        ("MEW", "MEW1gQWJ3nEXg2qgERiKu7FAFj79PHvQVREQUzScPP5"),
        ("TRUMP", "6p6xgHyF7AeE6TZkSmFsko444wqoP15icUSqi2jfGiPN"),
        ("FARTCOIN", "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump"),
        ("KMNO", "KMNo3nJsBXfcpJTVhZcXLW7RmTwTt4GVFE7suUBo9sS"),
        ("DRIFT", "DriFtupJYLTosbwoN8koMbEYSx54aFAVLddWsbksjwg7"),
        ("SAMO", "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"),
        ("MNDE", "MNDEFzGvMt87ueuHvVU9VcTqsAP5b3fTGPsHuuPA5ey"),
        ("STEP", "StepAscQoEioFxxWGnh2sLBDFp9d8rvKz2Yp39iDpyT"),
        ("SHDW", "SHDWyBxihqiCj6YekG2GUr7wqKLeLAMK1gHZck9pL6y"),
        ("DUST", "DUSTawucrTsGU8hcqRdHDCbuYhCPADMLM2VcCb8VnFnQ"),
        ("BLZE", "BLZEEuZUBVqFhj8adcCFPJvPVCiCyVmh3hkJMrU8KuJA"),
        ("ZEUS", "ZEUS1aR7aX8DFFJf5QjWj2ftDDdNTroMNGo8YoQm3Gq"),
        ("WEN", "WENWENvqqNya429ubCdR81ZmD69brwQaaBYY6p3LCpk"),
        ("BOME", "ukHH6c7mMyiWCf1b9pnWe25TSpkDDt3H5pQZgZ74J82"),
        ("SLERF", "7BgBvyjrZX1YKz4oh9mjb8ZScatkkwb8DzFx7LoiVkM3"),
        ("SILLY", "7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs"),
        ("AI16Z", "HeLp6NuQkmYB4pYWo2zYs22mESHXPQYzXbB8n4V98jwC"),
    ])
}

/// Décimales par symbole (défaut 6 si inconnu)
pub fn token_decimals() -> HashMap<&'static str, u8> {
    HashMap::from([
        ("SOL", 9), ("USDC", 6), ("USDT", 6), ("JUP", 6), ("RAY", 6), ("ORCA", 6),
        ("PYTH", 6), ("RENDER", 8), ("HNT", 8), ("W", 6), ("TNSR", 9), ("JTO", 9),
        ("MSOL", 9), ("JITOSOL", 9), ("BSOL", 9), ("INF", 9), ("BONK", 5), ("WIF", 6),
        ("POPCAT", 9), ("MEW", 5), ("TRUMP", 6), ("FARTCOIN", 6), ("SAMO", 9),
        ("MNDE", 9), ("STEP", 9), ("SHDW", 9), ("DUST", 9), ("BLZE", 9), ("KMNO", 6),
        ("DRIFT", 6), ("ZEUS", 6), ("WEN", 5), ("BOME", 6), ("SLERF", 9), ("SILLY", 6),
        ("AI16Z", 9),
    ])
}

/// Surcharges du montant emprunté par préfixe (8 premiers caractères) du mint cible.
/// Valeur = montant en unités de base de USDC (0 = utiliser le défaut).
pub fn pair_borrow_overrides() -> HashMap<&'static str, u64> {
    HashMap::from([
        ("So111111", 0), ("Es9vMFrz", 0),
        ("JUPyiwrY", 100_000_000), ("4k3Dyjzv", 100_000_000), ("orcaEKTd", 100_000_000),
        ("mSoLzYCx", 100_000_000), ("J1toso1u", 100_000_000), ("jtojtome", 100_000_000),
        ("rndrizKT", 100_000_000), ("85VBFQZC", 100_000_000),
        ("EKpQGSJt", 50_000_000), ("HZ1JovNi", 50_000_000), ("hntyVP6Y", 50_000_000),
        ("TNSRxcUx", 50_000_000), ("bSo13r4T", 50_000_000), ("5oVNBeEE", 50_000_000),
        ("KMNo3nJs", 50_000_000), ("DriFtupJ", 50_000_000),
        ("DezXAZ8z", 20_000_000), ("7GCihgDB", 20_000_000), ("MEW1gQWJ", 20_000_000),
        ("6p6xgHyF", 20_000_000), ("9BB6NFEc", 20_000_000), ("ukHH6c7m", 20_000_000),
        ("7BgBvyjr", 20_000_000), ("WENWENvq", 20_000_000),
        ("7xKXtg2C", 10_000_000), ("MNDEFzGv", 10_000_000), ("StepAscQ", 10_000_000),
        ("SHDWyBxi", 10_000_000), ("DUSTawuc", 10_000_000), ("BLZEEuZU", 10_000_000),
        ("ZEUS1aR7", 10_000_000), ("7EYnhQoR", 10_000_000), ("HeLp6NuQ", 10_000_000),
    ])
}

/// Résout un symbole connu en adresse mint; un mint déjà résolu est retourné tel quel.
pub fn resolve_mint(symbol_or_mint: &str) -> String {
    well_known_mints()
        .get(symbol_or_mint.to_uppercase().as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| symbol_or_mint.to_string())
}

pub fn resolve_decimals(symbol_or_mint: &str) -> u8 {
    *token_decimals().get(symbol_or_mint.to_uppercase().as_str()).unwrap_or(&6)
}

/// Décimales pour une adresse mint résolue (pas un symbole). Recherche inverse
/// dans la table des mints connus; 6 décimales par défaut si le mint est inconnu.
pub fn decimals_for_mint(mint: &str) -> u8 {
    let symbol = well_known_mints()
        .iter()
        .find(|(_, addr)| **addr == mint)
        .map(|(sym, _)| *sym);
    match symbol {
        Some(sym) => resolve_decimals(sym),
        None => 6,
    }
}

/// Parse "TARGET/QUOTE" en (target_mint, quote_mint).
pub fn parse_pair(pair: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = pair.split('/').collect();
    if parts.len() != 2 {
        return Err(anyhow!("Format de paire invalide: {}. Attendu 'TOKEN_A/TOKEN_B'", pair));
    }
    Ok((resolve_mint(parts[0]), resolve_mint(parts[1])))
}

/// Montant emprunté pour un mint cible donné. Retourne 0 si aucune surcharge (utiliser le défaut).
pub fn get_borrow_override(target_mint: &str) -> u64 {
    let prefix: String = target_mint.chars().take(8).collect();
    *pair_borrow_overrides().get(prefix.as_str()).unwrap_or(&0)
}

/// Paires considérées prioritaires: scannées à chaque cycle, pas seulement tous les 3
pub fn priority_pairs() -> Vec<&'static str> {
    vec!["SOL/USDC", "MSOL/USDC", "JITOSOL/USDC", "BSOL/USDC", "JUP/USDC", "TRUMP/USDC", "ORCA/USDC", "INF/USDC"]
}

/// Univers des mints focus pour le scanner triangulaire, par lots de 10 en rotation
pub fn focus_mint_universe() -> Vec<&'static str> {
    vec![
        "USDC", "SOL", "USDT", "JUP", "RAY", "ORCA", "PYTH", "JTO", "W", "TNSR",
        "MSOL", "JITOSOL", "BSOL", "INF", "BONK", "WIF", "POPCAT", "TRUMP",
        "FARTCOIN", "KMNO", "DRIFT", "HNT", "RENDER",
    ]
}

/// Retourne le lot de 10 mints focus pour un index de cycle donné, en rotation
pub fn focus_mint_batch(cycle_index: usize) -> Vec<String> {
    let universe = focus_mint_universe();
    let n = universe.len();
    let start = (cycle_index * 10) % n;
    (0..10.min(n))
        .map(|i| universe[(start + i) % n].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mint_symbol() {
        assert_eq!(resolve_mint("sol"), "So11111111111111111111111111111111111111112");
    }

    #[test]
    fn test_resolve_mint_passthrough() {
        let addr = "SomeRandomAddressNotInTable11111111111111";
        assert_eq!(resolve_mint(addr), addr);
    }

    #[test]
    fn test_parse_pair() {
        let (target, quote) = parse_pair("SOL/USDC").unwrap();
        assert_eq!(target, "So11111111111111111111111111111111111111112");
        assert_eq!(quote, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
    }

    #[test]
    fn test_parse_pair_invalid() {
        assert!(parse_pair("SOL-USDC").is_err());
    }

    #[test]
    fn test_borrow_override_known() {
        let (target, _) = parse_pair("BONK/USDC").unwrap();
        assert_eq!(get_borrow_override(&target), 20_000_000);
    }

    #[test]
    fn test_borrow_override_unknown_defaults_zero() {
        assert_eq!(get_borrow_override("UnknownMint11111111111111111111111111111"), 0);
    }

    #[test]
    fn test_focus_mint_batch_size() {
        assert_eq!(focus_mint_batch(0).len(), 10);
    }

    #[test]
    fn test_decimals_for_mint_known() {
        assert_eq!(decimals_for_mint("So11111111111111111111111111111111111111112"), 9);
        assert_eq!(decimals_for_mint("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"), 6);
    }

    #[test]
    fn test_decimals_for_mint_unknown_defaults_six() {
        assert_eq!(decimals_for_mint("UnknownMint11111111111111111111111111111"), 6);
    }
}
