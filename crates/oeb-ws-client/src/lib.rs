// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auto-reconnecting WebSocket subscriber for tails and dashboards.
//!
//! Maintains at most one open socket at a time and backs off with jitter
//! between reconnect attempts so a restarting server isn't hammered.

use futures::{SinkExt, StreamExt};
use oeb_core::Envelope;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Where to connect and how to filter the subscription.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Server-side `type` filter, applied as a query parameter so the
    /// server — not this client — does the filtering.
    pub type_filter: Option<String>,
    /// Base of the exponential backoff.
    pub base_delay: Duration,
    /// Hard cap on any single backoff wait.
    pub max_delay: Duration,
    /// Whether to reconnect at all on an unexpected close.
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            type_filter: None,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(30_000),
            auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    fn url(&self) -> String {
        match &self.type_filter {
            Some(filter) if !filter.is_empty() => {
                format!("ws://{}:{}/ws?type={}", self.host, self.port, filter)
            }
            _ => format!("ws://{}:{}/ws", self.host, self.port),
        }
    }
}

/// Invoked for every envelope successfully parsed off the socket.
pub type OnEvent = Box<dyn Fn(Envelope) + Send + Sync>;
/// Invoked for connection errors and unparseable frames; the connection
/// stays open (or a reconnect is scheduled) regardless.
pub type OnError = Box<dyn Fn(String) + Send + Sync>;

/// Handle onto a running reconnect loop. Dropping this does not stop the
/// loop; call [`ReconnectClient::close`] explicitly.
pub struct ReconnectClient {
    stop: watch::Sender<bool>,
    attempt: Arc<AtomicU32>,
    closed: Arc<AtomicBool>,
}

impl ReconnectClient {
    /// Start the reconnect loop as a background task.
    pub fn spawn(config: ClientConfig, on_event: OnEvent, on_error: OnError) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let attempt = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_loop(
            config,
            on_event,
            on_error,
            stop_rx,
            Arc::clone(&attempt),
            Arc::clone(&closed),
        ));

        Self {
            stop: stop_tx,
            attempt,
            closed,
        }
    }

    /// Current reconnect attempt counter (resets to 0 on every successful
    /// open).
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Relaxed)
    }

    /// Mark the client terminal: closes the active socket (if any) and
    /// cancels any pending backoff timer. No further reconnects occur.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.stop.send(true);
    }
}

/// Compute `min(base * 2^attempt + random(0..1000ms), max)`.
fn backoff_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let nominal_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let jitter_ms: u64 = rand::rng().random_range(0..1000);
    let total_ms = nominal_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

async fn run_loop(
    config: ClientConfig,
    on_event: OnEvent,
    on_error: OnError,
    mut stop_rx: watch::Receiver<bool>,
    attempt: Arc<AtomicU32>,
    closed: Arc<AtomicBool>,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }

        let url = config.url();
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                attempt.store(0, Ordering::SeqCst);
                debug!(url = %url, "ws connection established");
                run_connection(stream, &on_event, &on_error, &mut stop_rx, &closed).await;
            }
            Err(err) => {
                on_error(format!("failed to connect to {url}: {err}"));
            }
        }

        if closed.load(Ordering::SeqCst) || !config.auto_reconnect {
            return;
        }

        let this_attempt = attempt.fetch_add(1, Ordering::SeqCst);
        let delay = backoff_delay(&config, this_attempt);
        debug!(attempt = this_attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_connection(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    on_event: &OnEvent,
    on_error: &OnError,
    stop_rx: &mut watch::Receiver<bool>,
    closed: &Arc<AtomicBool>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => on_event(envelope),
                            Err(err) => on_error(format!("invalid envelope JSON: {err}")),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong/binary frames carry no envelope data.
                    }
                    Some(Err(err)) => {
                        on_error(format!("ws read error: {err}"));
                        return;
                    }
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    closed.store(true, Ordering::SeqCst);
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }
}
