//! WebSocket transport for the job event channel.
//!
//! Owns the connection lifecycle: connect with a timeout, pump frames in
//! both directions, ping every 30 seconds, and reconnect with exponential
//! backoff when the connection drops. Subscriptions live in
//! [`JobEventChannel`], so after a reconnect the transport replays
//! `reconnect:sync` for every subscribed job and the server backfills
//! missed events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::protocol::{ClientMessage, ServerMessage};
use super::{ChannelStatus, JobEventChannel};
use crate::error::{DriftError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF_MS: u64 = 32_000;

/// Backoff delay before reconnect attempt `attempt` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let ms = (1000u64 * 2u64.saturating_pow(attempt.saturating_sub(1))).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

/// Drives the WebSocket connection for a [`JobEventChannel`].
pub struct ChannelTransport {
    channel: Arc<JobEventChannel>,
    url: String,
    running: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// `url` is the WebSocket endpoint; the session token is appended as a
    /// query parameter.
    pub fn new(channel: Arc<JobEventChannel>, server_url: &str, token: &str) -> Self {
        let ws_server = server_url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        let url = format!("{}/events?token={}", ws_server.trim_end_matches('/'), token);
        Self {
            channel,
            url,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Handle for stopping the transport loop from another task.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run the connection loop until shut down.
    ///
    /// Reconnects with exponential backoff on any connection loss. The
    /// outbound receiver buffers frames while disconnected, so commands
    /// issued offline go out once the connection is back.
    pub async fn run(&self, mut outbound: mpsc::UnboundedReceiver<ClientMessage>) {
        let mut attempt: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            if attempt == 0 {
                self.channel.set_status(ChannelStatus::Connecting);
            } else {
                let delay = backoff_delay(attempt);
                info!(
                    "[Transport] reconnect attempt {} in {}ms",
                    attempt,
                    delay.as_millis()
                );
                self.channel
                    .set_status(ChannelStatus::Reconnecting { attempt });
                tokio::time::sleep(delay).await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
            }

            match self.connect().await {
                Ok(ws) => {
                    let resumed = attempt > 0;
                    attempt = 0;
                    self.channel.set_status(ChannelStatus::Online);
                    self.drive_connection(ws, &mut outbound, resumed).await;
                    // Connection ended; loop decides whether to reconnect
                    if self.running.load(Ordering::SeqCst) {
                        attempt = 1;
                    }
                }
                Err(e) => {
                    warn!("[Transport] connect failed: {}", e);
                    self.channel.set_status(ChannelStatus::Error {
                        message: e.to_string(),
                    });
                    attempt += 1;
                }
            }
        }

        self.channel.set_status(ChannelStatus::Offline);
        info!("[Transport] stopped");
    }

    async fn connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    > {
        debug!("[Transport] connecting");
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.url))
            .await
            .map_err(|_| DriftError::ConnectionTimeout)?
            .map_err(|e| DriftError::Connection(e.to_string()))?;
        Ok(ws)
    }

    /// Pump one live connection until it closes or errors.
    async fn drive_connection(
        &self,
        mut ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
        resumed: bool,
    ) {
        // After a reconnect, ask the server to replay what we missed
        if resumed {
            for frame in self.channel.resync_messages() {
                if let Err(e) = send_frame(&mut ws, &frame).await {
                    warn!("[Transport] failed to send resync frame: {}", e);
                    return;
                }
            }
        }

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(message) => self.channel.process_server_message(message),
                                Err(e) => {
                                    warn!("[Transport] malformed server frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[Transport] connection closed by server");
                            break;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            // Connection is alive
                        }
                        Some(Err(e)) => {
                            error!("[Transport] WebSocket error: {}", e);
                            self.channel.set_status(ChannelStatus::Error {
                                message: e.to_string(),
                            });
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }
                out = outbound.recv() => {
                    match out {
                        Some(frame) => {
                            if let Err(e) = send_frame(&mut ws, &frame).await {
                                warn!("[Transport] send failed: {}", e);
                                break;
                            }
                        }
                        None => {
                            // Channel core dropped; nothing left to send
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                    if let Err(e) = ws.send(Message::Ping(vec![].into())).await {
                        warn!("[Transport] ping failed: {}", e);
                        break;
                    }
                }
            }
        }

        let _ = ws.close(None).await;
    }
}

async fn send_frame<S>(ws: &mut S, frame: &ClientMessage) -> Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| DriftError::Connection(e.to_string()))
}
