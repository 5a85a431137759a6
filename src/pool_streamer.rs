//! Client WebSocket réactif — s'abonne aux comptes de pool via `accountSubscribe`
//! et pousse chaque mise à jour dans un canal borné. Reconnecte avec un backoff
//! croissant; ne bloque jamais le producteur: une mise à jour qui n'a pas de
//! place dans le canal est abandonnée plutôt que d'attendre.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_MIN_BACKOFF: Duration = Duration::from_secs(2);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Notification brute d'un compte de pool mis à jour.
#[derive(Debug, Clone)]
pub struct PoolUpdate {
    pub pool_address: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// Flux d'abonnements `accountSubscribe` sur un sous-ensemble de pools.
pub struct PoolStreamer {
    ws_url: String,
    addresses: Vec<Pubkey>,
    tx: mpsc::Sender<PoolUpdate>,
}

impl PoolStreamer {
    pub fn new(ws_url: String, addresses: Vec<Pubkey>, tx: mpsc::Sender<PoolUpdate>) -> Self {
        Self { ws_url, addresses, tx }
    }

    /// Boucle de connexion/reconnexion. Ne retourne jamais tant que le
    /// processus tourne; chaque déconnexion déclenche un nouveau backoff.
    pub async fn run(&self) {
        let mut backoff = RECONNECT_MIN_BACKOFF;
        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    log::warn!("Flux WebSocket fermé proprement, reconnexion dans {:?}", backoff);
                }
                Err(e) => {
                    log::warn!("Flux WebSocket interrompu: {} — reconnexion dans {:?}", e, backoff);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
            max_message_size: Some(MAX_FRAME_SIZE),
            max_frame_size: Some(MAX_FRAME_SIZE),
            ..Default::default()
        };
        let (ws_stream, _) = tokio_tungstenite::connect_async_with_config(&self.ws_url, Some(config), false)
            .await
            .map_err(|e| anyhow!("connexion WebSocket échouée: {}", e))?;
        log::info!("WebSocket connecté: {}", self.ws_url);

        let (mut write, mut read) = ws_stream.split();
        let mut subscription_to_address: HashMap<u64, Pubkey> = HashMap::new();

        for (i, addr) in self.addresses.iter().enumerate() {
            let req_id = i as u64 + 1;
            let sub_request = json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "accountSubscribe",
                "params": [addr.to_string(), {"encoding": "base64", "commitment": "confirmed"}],
            });
            write.send(Message::Text(sub_request.to_string())).await
                .map_err(|e| anyhow!("envoi accountSubscribe échoué: {}", e))?;
        }
        log::info!("{} abonnements accountSubscribe envoyés", self.addresses.len());

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // première tick immédiate, on l'ignore

        loop {
            tokio::select! {
                msg = timeout(READ_TIMEOUT, read.next()) => {
                    let msg = msg.map_err(|_| anyhow!("pas de message depuis {:?}", READ_TIMEOUT))?;
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text, &mut subscription_to_address).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await.ok();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow!("connexion fermée par le serveur"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(anyhow!("erreur WebSocket: {}", e)),
                    }
                }
                _ = keepalive.tick() => {
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| anyhow!("ping keep-alive échoué: {}", e))?;
                }
            }
        }
    }

    async fn handle_message(&self, text: &str, subscription_to_address: &mut HashMap<u64, Pubkey>) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("message WebSocket non-JSON ignoré: {}", e);
                return;
            }
        };

        // Réponse de souscription: {"result": <sub_id>, "id": <req_id>}
        if let (Some(sub_id), Some(req_id)) = (
            value.get("result").and_then(Value::as_u64),
            value.get("id").and_then(Value::as_u64),
        ) {
            if let Some(addr) = self.addresses.get((req_id - 1) as usize) {
                subscription_to_address.insert(sub_id, *addr);
                log::debug!("Abonné: {} -> souscription {}", addr, sub_id);
            }
            return;
        }

        // Notification: {"method": "accountNotification", "params": {"subscription": ..., "result": {...}}}
        if value.get("method").and_then(Value::as_str) != Some("accountNotification") {
            return;
        }
        let params = match value.get("params") {
            Some(p) => p,
            None => return,
        };
        let sub_id = match params.get("subscription").and_then(Value::as_u64) {
            Some(s) => s,
            None => return,
        };
        let pool_address = match subscription_to_address.get(&sub_id) {
            Some(a) => *a,
            None => return,
        };

        let result = match params.get("result") {
            Some(r) => r,
            None => return,
        };
        let slot = result.get("context").and_then(|c| c.get("slot")).and_then(Value::as_u64).unwrap_or(0);
        let data_b64 = result.get("value")
            .and_then(|v| v.get("data"))
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(Value::as_str);

        let data_b64 = match data_b64 {
            Some(d) => d,
            None => return,
        };
        let data = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data_b64) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("décodage base64 de compte échoué: {}", e);
                return;
            }
        };

        let update = PoolUpdate { pool_address, data, slot };
        if self.tx.try_send(update).is_err() {
            log::debug!("Canal de mises à jour saturé, mise à jour abandonnée pour {}", pool_address);
        }
    }
}

/// Construit un streamer couvrant tous les pools actuellement enregistrés.
pub async fn build_for_registry(
    ws_url: String,
    registry: &Arc<crate::pool_registry::PoolRegistry>,
    tx: mpsc::Sender<PoolUpdate>,
) -> PoolStreamer {
    let mut addresses = Vec::new();
    for pair in registry.all_pairs().await {
        for pool in pair.pools {
            addresses.push(pool.address);
        }
    }
    addresses.sort();
    addresses.dedup();
    log::info!("Streamer configuré pour {} pools", addresses.len());
    PoolStreamer::new(ws_url, addresses, tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_subscription_id_ignored() {
        let (tx, mut rx) = mpsc::channel(8);
        let streamer = PoolStreamer::new("wss://example.invalid".to_string(), vec![Pubkey::new_unique()], tx);
        let mut map = HashMap::new();
        let notif = json!({
            "method": "accountNotification",
            "params": {"subscription": 999, "result": {"context": {"slot": 1}, "value": {"data": ["", "base64"]}}},
        });
        streamer.handle_message(&notif.to_string(), &mut map).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_ack_maps_id() {
        let (tx, _rx) = mpsc::channel(8);
        let addr = Pubkey::new_unique();
        let streamer = PoolStreamer::new("wss://example.invalid".to_string(), vec![addr], tx);
        let mut map = HashMap::new();
        let ack = json!({"result": 42, "id": 1});
        streamer.handle_message(&ack.to_string(), &mut map).await;
        assert_eq!(map.get(&42), Some(&addr));
    }

    #[tokio::test]
    async fn test_notification_decodes_and_forwards() {
        let (tx, mut rx) = mpsc::channel(8);
        let addr = Pubkey::new_unique();
        let streamer = PoolStreamer::new("wss://example.invalid".to_string(), vec![addr], tx);
        let mut map = HashMap::new();
        map.insert(7u64, addr);
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8, 2, 3]);
        let notif = json!({
            "method": "accountNotification",
            "params": {"subscription": 7, "result": {"context": {"slot": 55}, "value": {"data": [encoded, "base64"]}}},
        });
        streamer.handle_message(&notif.to_string(), &mut map).await;
        let update = rx.try_recv().expect("mise à jour attendue");
        assert_eq!(update.pool_address, addr);
        assert_eq!(update.data, vec![1, 2, 3]);
        assert_eq!(update.slot, 55);
    }
}
