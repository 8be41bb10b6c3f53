// =============================================================================
// WSConnector — per-category public ticker stream
// =============================================================================
//
// Grounded on `market_data::trade_stream::run_trade_stream` (connect, split,
// read-loop, return-on-error so the caller reconnects), generalized with:
// a subscribe handshake instead of an implicit single-stream URL, a bounded
// mailbox separating inbound frame parsing from outbound subscription
// management, a client-initiated `{"op":"ping"}` heartbeat on its own
// interval (independent of the idle-timeout read path — a dedicated
// client-side ping, not just a reaction to server pings), and an
// idle-timeout-triggered reconnect using the bounded delay sequence
// {1, 2, 5, 10, 30}s (the backoff-sequence idiom grounded on the
// hardened-ingest session module, adapted from a thread-based state machine
// to a single supervised async task per connector).
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::types::{Category, Symbol};
use crate::ws::protocol::{self, InboundFrame};

const RECONNECT_DELAYS_SECS: [u64; 5] = [1, 2, 5, 10, 30];

pub struct WSConnectorConfig {
    pub idle_timeout: Duration,
    pub subscribe_chunk: usize,
    pub base_url_linear: String,
    pub base_url_inverse: String,
    pub ping_interval: Duration,
}

impl Default for WSConnectorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            subscribe_chunk: protocol::DEFAULT_SUBSCRIBE_CHUNK,
            base_url_linear: "wss://stream.bybit.com/v5/public/linear".to_string(),
            base_url_inverse: "wss://stream.bybit.com/v5/public/inverse".to_string(),
            ping_interval: Duration::from_secs(20),
        }
    }
}

enum Command {
    Add(Vec<Symbol>, oneshot::Sender<()>),
    Remove(Vec<Symbol>, oneshot::Sender<()>),
    SwitchTo(Symbol, oneshot::Sender<()>),
    RestoreFull(Vec<Symbol>, oneshot::Sender<()>),
}

/// Handle to a running connector. Every mutating method is atomic from the
/// caller's perspective: it returns only once the running connection has
/// either applied the change or queued it for the next successful connect.
#[derive(Clone)]
pub struct WSConnector {
    cmd_tx: mpsc::Sender<Command>,
}

impl WSConnector {
    pub fn spawn(
        category: Category,
        store: Arc<Store>,
        initial_symbols: Vec<Symbol>,
        config: WSConnectorConfig,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let handle = tokio::spawn(run(category, store, initial_symbols, cmd_rx, config, cancel));
        (Self { cmd_tx }, handle)
    }

    pub async fn add_symbols(&self, symbols: Vec<Symbol>) {
        self.send(|ack| Command::Add(symbols, ack)).await;
    }

    pub async fn remove_symbols(&self, symbols: Vec<Symbol>) {
        self.send(|ack| Command::Remove(symbols, ack)).await;
    }

    pub async fn switch_to(&self, symbol: Symbol) {
        self.send(|ack| Command::SwitchTo(symbol, ack)).await;
    }

    pub async fn restore_full(&self, linear: Vec<Symbol>, inverse: Vec<Symbol>) {
        let mut all = linear;
        all.extend(inverse);
        self.send(|ack| Command::RestoreFull(all, ack)).await;
    }

    async fn send(&self, build: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(build(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(
    category: Category,
    store: Arc<Store>,
    initial_symbols: Vec<Symbol>,
    mut cmd_rx: mpsc::Receiver<Command>,
    config: WSConnectorConfig,
    cancel: CancellationToken,
) {
    let mut desired: HashSet<Symbol> = initial_symbols.into_iter().collect();
    let mut attempt = 0usize;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match connect_and_stream(category, &store, &mut desired, &mut cmd_rx, &config, &cancel).await {
            Ok(()) => {
                if cancel.is_cancelled() {
                    return;
                }
                attempt = 0;
            }
            Err(err) => {
                let delay_secs = RECONNECT_DELAYS_SECS[attempt.min(RECONNECT_DELAYS_SECS.len() - 1)];
                warn!(category = %category, error = %err, delay_secs, "WS connector disconnected — reconnecting");
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
    }
}

async fn connect_and_stream(
    category: Category,
    store: &Arc<Store>,
    desired: &mut HashSet<Symbol>,
    cmd_rx: &mut mpsc::Receiver<Command>,
    config: &WSConnectorConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let url = match category {
        Category::Linear => &config.base_url_linear,
        Category::Inverse => &config.base_url_inverse,
    };

    let (ws_stream, _resp) = connect_async(url).await?;
    info!(category = %category, "WS connector connected");
    let (mut write, mut read) = ws_stream.split();

    let symbols: Vec<Symbol> = desired.iter().cloned().collect();
    for frame in protocol::subscribe_frames(&symbols, config.subscribe_chunk) {
        write.send(Message::Text(frame)).await?;
    }

    let mut ping_tick = tokio::time::interval(config.ping_interval);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_tick.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => apply_command(cmd, desired, &mut write, config).await?,
                    None => return Ok(()),
                }
            }

            _ = ping_tick.tick() => {
                write.send(Message::Text(protocol::ping_frame())).await?;
            }

            frame = tokio::time::timeout(config.idle_timeout, read.next()) => {
                match frame {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if let InboundFrame::Ticker(symbol, patch) = protocol::parse_inbound(&text) {
                            if desired.contains(&symbol) {
                                let ts = chrono::Utc::now().timestamp_millis();
                                store.merge_ticker(&symbol, &patch, ts);
                            } else {
                                debug!(symbol = %symbol, "ignoring ticker for unknown symbol");
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        anyhow::bail!("server closed WS connection: {frame:?}");
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(None) => anyhow::bail!("WS stream ended"),
                    Err(_elapsed) => anyhow::bail!("WS idle timeout after {:?}", config.idle_timeout),
                }
            }
        }
    }
}

async fn apply_command(
    cmd: Command,
    desired: &mut HashSet<Symbol>,
    write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    config: &WSConnectorConfig,
) -> anyhow::Result<()> {
    match cmd {
        Command::Add(symbols, ack) => {
            let new: Vec<Symbol> = symbols.into_iter().filter(|s| !desired.contains(s)).collect();
            for frame in protocol::subscribe_frames(&new, config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            desired.extend(new);
            let _ = ack.send(());
        }
        Command::Remove(symbols, ack) => {
            for frame in protocol::unsubscribe_frames(&symbols, config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            for s in &symbols {
                desired.remove(s);
            }
            let _ = ack.send(());
        }
        Command::SwitchTo(symbol, ack) => {
            let old: Vec<Symbol> = desired.iter().cloned().collect();
            for frame in protocol::unsubscribe_frames(&old, config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            desired.clear();
            for frame in protocol::subscribe_frames(std::slice::from_ref(&symbol), config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            desired.insert(symbol);
            let _ = ack.send(());
        }
        Command::RestoreFull(symbols, ack) => {
            let old: Vec<Symbol> = desired.iter().cloned().collect();
            for frame in protocol::unsubscribe_frames(&old, config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            desired.clear();
            for frame in protocol::subscribe_frames(&symbols, config.subscribe_chunk) {
                write.send(Message::Text(frame)).await?;
            }
            desired.extend(symbols);
            let _ = ack.send(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delays_follow_bounded_sequence() {
        assert_eq!(RECONNECT_DELAYS_SECS, [1, 2, 5, 10, 30]);
    }

    #[test]
    fn default_config_uses_spec_defaults() {
        let cfg = WSConnectorConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(30));
        assert_eq!(cfg.subscribe_chunk, 200);
        assert!(cfg.ping_interval < cfg.idle_timeout, "ping must fire well before the idle timeout");
    }
}
