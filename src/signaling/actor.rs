use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::messages::{InboundMessage, Route, ServerMessage};
use super::registry::Registry;
use super::types::{ClientConnection, ClientId, ClientInfo, FanOut, SignalingError};

/// Commands sent to the router actor
pub(crate) enum RouterCommand {
    Connect {
        connection: ClientConnection,
        reply: oneshot::Sender<Result<ClientId, SignalingError>>,
    },
    Disconnect {
        client_id: ClientId,
    },
    Relay {
        sender: ClientId,
        message: InboundMessage,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

pub(crate) async fn router_actor(mut rx: mpsc::Receiver<RouterCommand>) {
    let mut registry = Registry::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RouterCommand::Connect { connection, reply } => {
                let client_id = ClientId::generate();

                let result = match registry.register(client_id.clone(), connection) {
                    Ok(()) => {
                        info!(
                            "Client {} connected ({} online)",
                            client_id,
                            registry.len()
                        );
                        broadcast_roster(&registry, &client_id);
                        Ok(client_id)
                    }
                    Err(e) => {
                        error!("Refusing connection: {}", e);
                        Err(e)
                    }
                };

                let _ = reply.send(result);
            }

            RouterCommand::Disconnect { client_id } => {
                if registry.unregister(&client_id) {
                    info!(
                        "Client {} disconnected ({} online)",
                        client_id,
                        registry.len()
                    );
                    broadcast_roster(&registry, &client_id);
                } else {
                    debug!("Client {} already unregistered", client_id);
                }
            }

            RouterCommand::Relay { sender, message } => {
                relay(&registry, &sender, message);
            }

            RouterCommand::Count { reply } => {
                let _ = reply.send(registry.len());
            }
        }
    }

    debug!("Router stopped, dropping {} clients", registry.len());
}

/// Send the current membership to every registered client.
pub fn broadcast_roster(registry: &Registry, current: &ClientId) -> FanOut {
    let (ids, count) = registry.snapshot();
    let roster = ServerMessage::ClientList {
        current_client_id: current.clone(),
        clients: ids.into_iter().map(|id| ClientInfo { id }).collect(),
        connection_number: count,
    };

    let mut fan_out = FanOut::default();
    let msg = match roster.to_outbound() {
        Ok(msg) => msg,
        Err(e) => {
            error!("Failed to encode client list: {}", e);
            return fan_out;
        }
    };

    for (id, connection) in registry.iter() {
        let delivered = connection.send(msg.clone()).is_ok();
        if !delivered {
            warn!("Failed to send client list to {}", id);
        }
        fan_out.record(id, delivered);
    }

    debug!(
        "Client list ({} clients) sent to {}/{}",
        count,
        fan_out.delivered,
        fan_out.attempted()
    );
    fan_out
}

/// Forward a client's message to its recipient, or to everyone but the
/// sender when it names none.
pub fn relay(registry: &Registry, sender: &ClientId, message: InboundMessage) -> FanOut {
    let (route, body) = message.into_parts();
    let signal = ServerMessage::Signal {
        sender: sender.clone(),
        message: body,
    };

    let mut fan_out = FanOut::default();
    let msg = match signal.to_outbound() {
        Ok(msg) => msg,
        Err(e) => {
            error!("Failed to encode signal from {}: {}", sender, e);
            return fan_out;
        }
    };

    match route {
        Route::Direct(recipient) => {
            let Some(connection) = registry.lookup(&recipient) else {
                warn!(
                    "Recipient {} not found, dropping message from {}",
                    recipient, sender
                );
                return fan_out;
            };

            debug!("Relaying message from {} to {}", sender, recipient);
            let delivered = connection.send(msg).is_ok();
            if !delivered {
                warn!("Failed to send message from {} to {}", sender, recipient);
            }
            fan_out.record(&recipient, delivered);
        }

        Route::Broadcast => {
            for (id, connection) in registry.iter().filter(|(id, _)| *id != sender) {
                let delivered = connection.send(msg.clone()).is_ok();
                if !delivered {
                    warn!("Failed to broadcast message from {} to {}", sender, id);
                }
                fan_out.record(id, delivered);
            }

            debug!(
                "Broadcast from {} delivered to {}/{}",
                sender,
                fan_out.delivered,
                fan_out.attempted()
            );
        }
    }

    fan_out
}

/// Handle to communicate with the router actor
#[derive(Clone)]
pub struct RouterHandle {
    pub(crate) tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Spawn a router actor that owns a fresh registry.
    ///
    /// The actor stops when every handle has been dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RouterCommand>(1024);
        tokio::spawn(router_actor(rx));
        Self { tx }
    }

    /// Register a new client and announce it to everyone
    pub async fn connect(&self, connection: ClientConnection) -> Result<ClientId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RouterCommand::Connect {
                connection,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("router channel closed".to_string()))?
    }

    /// Unregister a client and announce the reduced roster
    pub async fn disconnect(&self, client_id: &ClientId) {
        let _ = self
            .tx
            .send(RouterCommand::Disconnect {
                client_id: client_id.clone(),
            })
            .await;
    }

    /// Route a message on behalf of `sender`
    pub async fn relay(&self, sender: &ClientId, message: InboundMessage) {
        let _ = self
            .tx
            .send(RouterCommand::Relay {
                sender: sender.clone(),
                message,
            })
            .await;
    }

    /// Number of registered clients
    pub async fn client_count(&self) -> Result<usize, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(RouterCommand::Count { reply: reply_tx }).await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("router channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::signaling::types::OutboundMessage;

    fn add_client(
        registry: &mut Registry,
        name: &str,
    ) -> (ClientId, UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::from(name);
        registry.register(id.clone(), tx).unwrap();
        (id, rx)
    }

    fn recv_json(rx: &mut UnboundedReceiver<OutboundMessage>) -> Option<Value> {
        rx.try_recv()
            .ok()
            .map(|msg| serde_json::from_str(msg.as_str()).unwrap())
    }

    fn inbound(json: &str) -> InboundMessage {
        InboundMessage::parse(json).unwrap()
    }

    #[test]
    fn roster_reaches_every_client() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = add_client(&mut registry, "a");
        let (_b, mut rx_b) = add_client(&mut registry, "b");

        let fan_out = broadcast_roster(&registry, &a);
        assert_eq!(fan_out.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = recv_json(rx).unwrap();
            assert_eq!(msg["type"], "client_list");
            assert_eq!(msg["current_client_id"], "a");
            assert_eq!(msg["connection_number"], 2);
            assert_eq!(msg["clients"].as_array().unwrap().len(), 2);
            assert!(recv_json(rx).is_none());
        }
    }

    #[test]
    fn roster_after_removal_names_departed_client() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = add_client(&mut registry, "a");
        let (b, _rx_b) = add_client(&mut registry, "b");

        registry.unregister(&b);
        broadcast_roster(&registry, &b);

        let msg = recv_json(&mut rx_a).unwrap();
        assert_eq!(msg["current_client_id"], "b");
        assert_eq!(msg["connection_number"], 1);
        assert_eq!(msg["clients"], serde_json::json!([{ "id": a.as_str() }]));
    }

    #[test]
    fn unicast_reaches_only_recipient() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = add_client(&mut registry, "a");
        let (_b, mut rx_b) = add_client(&mut registry, "b");
        let (_c, mut rx_c) = add_client(&mut registry, "c");

        let fan_out = relay(&registry, &a, inbound(r#"{"recipient":"b","data":"X"}"#));
        assert_eq!(fan_out.delivered, 1);

        let msg = recv_json(&mut rx_b).unwrap();
        assert_eq!(
            msg,
            serde_json::json!({
                "type": "signal",
                "sender": "a",
                "message": {"recipient": "b", "data": "X"}
            })
        );
        assert!(recv_json(&mut rx_a).is_none());
        assert!(recv_json(&mut rx_c).is_none());
    }

    #[test]
    fn broadcast_excludes_sender() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = add_client(&mut registry, "a");
        let (_b, mut rx_b) = add_client(&mut registry, "b");
        let (_c, mut rx_c) = add_client(&mut registry, "c");

        let fan_out = relay(&registry, &a, inbound(r#"{"data":"Y"}"#));
        assert_eq!(fan_out.delivered, 2);

        for rx in [&mut rx_b, &mut rx_c] {
            let msg = recv_json(rx).unwrap();
            assert_eq!(msg["type"], "signal");
            assert_eq!(msg["sender"], "a");
            assert_eq!(msg["message"]["data"], "Y");
        }
        assert!(recv_json(&mut rx_a).is_none());
    }

    #[test]
    fn unknown_recipient_sends_nothing() {
        let mut registry = Registry::new();
        let (a, mut rx_a) = add_client(&mut registry, "a");
        let (_b, mut rx_b) = add_client(&mut registry, "b");

        let fan_out = relay(&registry, &a, inbound(r#"{"recipient":"nonexistent"}"#));
        assert_eq!(fan_out, FanOut::default());
        assert!(recv_json(&mut rx_a).is_none());
        assert!(recv_json(&mut rx_b).is_none());
    }

    #[test]
    fn broken_recipient_does_not_stop_broadcast() {
        let mut registry = Registry::new();
        let (a, _rx_a) = add_client(&mut registry, "a");
        let (b, rx_b) = add_client(&mut registry, "b");
        let (_c, mut rx_c) = add_client(&mut registry, "c");
        let (_d, mut rx_d) = add_client(&mut registry, "d");
        drop(rx_b);

        let fan_out = relay(&registry, &a, inbound(r#"{"data":"Z"}"#));
        assert_eq!(fan_out.delivered, 2);
        assert_eq!(fan_out.failed, vec![b.clone()]);
        assert!(recv_json(&mut rx_c).is_some());
        assert!(recv_json(&mut rx_d).is_some());

        let fan_out = broadcast_roster(&registry, &a);
        assert_eq!(fan_out.delivered, 3);
        assert_eq!(fan_out.failed, vec![b]);
    }

    #[tokio::test]
    async fn handle_connect_announces_roster() {
        let router = RouterHandle::spawn();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let a = router.connect(tx_a).await.unwrap();
        let msg: Value = serde_json::from_str(rx_a.recv().await.unwrap().as_str()).unwrap();
        assert_eq!(msg["current_client_id"], a.as_str());
        assert_eq!(msg["connection_number"], 1);

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let b = router.connect(tx_b).await.unwrap();
        assert_ne!(a, b);
        for rx in [&mut rx_a, &mut rx_b] {
            let msg: Value = serde_json::from_str(rx.recv().await.unwrap().as_str()).unwrap();
            assert_eq!(msg["current_client_id"], b.as_str());
            assert_eq!(msg["connection_number"], 2);
        }

        assert_eq!(router.client_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn handle_disconnect_is_idempotent() {
        let router = RouterHandle::spawn();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let _a = router.connect(tx_a).await.unwrap();
        let b = router.connect(tx_b).await.unwrap();

        router.disconnect(&b).await;
        router.disconnect(&b).await;
        assert_eq!(router.client_count().await.unwrap(), 1);

        // own connect, b's connect, b's single disconnect
        let mut rosters = Vec::new();
        while let Ok(msg) = rx_a.try_recv() {
            rosters.push(serde_json::from_str::<Value>(msg.as_str()).unwrap());
        }
        assert_eq!(rosters.len(), 3);
        assert_eq!(rosters[2]["current_client_id"], b.as_str());
        assert_eq!(rosters[2]["connection_number"], 1);
    }

    #[tokio::test]
    async fn handle_relay_preserves_sender_order() {
        let router = RouterHandle::spawn();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = router.connect(tx_a).await.unwrap();
        let b = router.connect(tx_b).await.unwrap();
        // roster for b's own connect
        rx_b.recv().await.unwrap();

        for seq in 0..10 {
            let json = format!(r#"{{"recipient":"{}","seq":{}}}"#, b, seq);
            router.relay(&a, inbound(&json)).await;
        }

        for seq in 0..10 {
            let msg: Value = serde_json::from_str(rx_b.recv().await.unwrap().as_str()).unwrap();
            assert_eq!(msg["sender"], a.as_str());
            assert_eq!(msg["message"]["seq"], seq);
        }
    }
}
