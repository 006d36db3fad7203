//! Upstream feeds: JSON-RPC polling plus a WebSocket block subscription,
//! both treated as unreliable streams with exponential-backoff reconnect
//! and idempotent duplicate-event handling, built on
//! `alloy::providers::ProviderBuilder`/`WsConnect` (the `provider-ws`
//! Cargo feature).

use std::collections::HashSet;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Block;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::FeedError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Tracks the next reconnect delay, capped and reset after a successful
/// connection.
pub struct Backoff {
    cfg: BackoffConfig,
    current_ms: u64,
}

impl Backoff {
    pub fn new(cfg: BackoffConfig) -> Self {
        Self {
            current_ms: cfg.initial_ms,
            cfg,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.current_ms);
        self.current_ms = ((self.current_ms as f64 * self.cfg.multiplier) as u64).min(self.cfg.max_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.cfg.initial_ms;
    }
}

/// Drops an event whose idempotency key (block hash, log index, etc.) has
/// already been seen within the retained window, since reconnects can
/// replay the same events.
pub struct DedupWindow {
    capacity: usize,
    seen: Mutex<(HashSet<String>, std::collections::VecDeque<String>)>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new((HashSet::new(), std::collections::VecDeque::new())),
        }
    }

    /// Returns `Ok(())` for a fresh key, `Err(FeedError::Duplicate)` for
    /// one already seen in the window.
    pub fn observe(&self, key: &str) -> Result<(), FeedError> {
        let mut guard = self.seen.lock();
        let (set, order) = &mut *guard;
        if !set.insert(key.to_string()) {
            return Err(FeedError::Duplicate(key.to_string()));
        }
        order.push_back(key.to_string());
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        Ok(())
    }
}

/// Runs the WebSocket block-header subscription loop forever, forwarding
/// each new block through `tx`. Reconnects with exponential backoff on
/// any connection error; never returns except on an unrecoverable
/// provider-builder failure (the `ws_url` itself is malformed).
pub async fn run_block_subscription(
    ws_url: &str,
    tx: mpsc::Sender<Block>,
    backoff_cfg: BackoffConfig,
    dedup_capacity: usize,
) -> Result<(), FeedError> {
    let mut backoff = Backoff::new(backoff_cfg);
    let dedup = DedupWindow::new(dedup_capacity);

    loop {
        let connect = WsConnect::new(ws_url);
        let provider = match ProviderBuilder::new().connect_ws(connect).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "websocket connect failed, backing off");
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }
        };

        let subscription = match provider.subscribe_blocks().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "block subscription failed, backing off");
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }
        };

        info!("websocket block subscription established");
        backoff.reset();
        let mut stream = subscription.into_stream();

        use futures::StreamExt;
        loop {
            match stream.next().await {
                Some(block) => {
                    let key = format!("{:?}", block.header.hash);
                    if dedup.observe(&key).is_err() {
                        continue;
                    }
                    if tx.send(block).await.is_err() {
                        return Ok(());
                    }
                }
                None => {
                    warn!("websocket stream ended, reconnecting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(BackoffConfig {
            initial_ms: 100,
            max_ms: 500,
            multiplier: 2.0,
        });
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn backoff_resets() {
        let mut b = Backoff::new(BackoffConfig {
            initial_ms: 100,
            max_ms: 500,
            multiplier: 2.0,
        });
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn dedup_window_drops_repeats_and_evicts_oldest() {
        let window = DedupWindow::new(2);
        assert!(window.observe("a").is_ok());
        assert!(window.observe("a").is_err());
        assert!(window.observe("b").is_ok());
        assert!(window.observe("c").is_ok());
        // "a" should have been evicted once capacity-3rd insert happened.
        assert!(window.observe("a").is_ok());
    }
}
