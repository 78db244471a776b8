use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::RouterHandle;
use super::messages::InboundMessage;
use super::types::{ClientId, OutboundMessage, SignalingError};

pub const DEFAULT_SIGNALING_PORT: u16 = 8080;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Keepalive timing for each connection
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

pub struct SignalingServer {
    listener: TcpListener,
    router: RouterHandle,
    heartbeat: Heartbeat,
}

impl SignalingServer {
    /// Bind the listener and start the router that owns the registry
    pub async fn bind(addr: &str, heartbeat: Heartbeat) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router: RouterHandle::spawn(),
            heartbeat,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> RouterHandle {
        self.router.clone()
    }

    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Signaling server shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let router = self.router.clone();
                    let heartbeat = self.heartbeat;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, router, heartbeat).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: RouterHandle,
    heartbeat: Heartbeat,
) -> Result<(), SignalingError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (ws_tx, ws_rx) = ws_stream.split();

    info!("WebSocket connection from {}", addr);

    serve_client(ws_tx, ws_rx, addr, router, heartbeat).await
}

/// Runs one client from registration to teardown over an upgraded socket.
async fn serve_client<W, R>(
    mut ws_tx: W,
    mut ws_rx: R,
    addr: SocketAddr,
    router: RouterHandle,
    heartbeat: Heartbeat,
) -> Result<(), SignalingError>
where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    let client_id = match router.connect(tx).await {
        Ok(id) => id,
        Err(e) => {
            send_task.abort();
            return Err(e);
        }
    };

    let mut ping_interval = tokio::time::interval(heartbeat.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", client_id);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + heartbeat.pong_timeout);
                debug!("Ping sent to {}", client_id);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", client_id);
                break;
            }

            _ = &mut send_task => {
                warn!("Writer for {} stopped, disconnecting", client_id);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", client_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        handle_text_message(&text, &client_id, &router).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", client_id);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", client_id);
                        break;
                    }
                    Message::Binary(data) => {
                        debug!("Ignoring {} byte binary frame from {}", data.len(), client_id);
                    }
                    _ => {}
                }
            }
        }
    }

    router.disconnect(&client_id).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", client_id, addr);

    Ok(())
}

async fn handle_text_message(text: &str, client_id: &ClientId, router: &RouterHandle) {
    match InboundMessage::parse(text) {
        Ok(message) => {
            debug!("Message received from {}", client_id);
            router.relay(client_id, message).await;
        }
        Err(e) => {
            warn!("Dropping message from {}: {}", client_id, e);
        }
    }
}
