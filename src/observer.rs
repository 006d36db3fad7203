//! One-way event fan-out for external consumers (a dashboard, an alerting
//! sidecar, an audit tailer). Nothing in the pipeline's correctness
//! depends on a subscriber existing or keeping up: `tokio::sync::broadcast`
//! drops the oldest event for a lagging receiver rather than applying
//! backpressure to the publisher, which is exactly the property this
//! interface needs (the pipeline never blocks on an observer).
//!
//! `tokio` is already pulled in with `features = ["full"]`, which
//! includes `sync::broadcast`.

use alloy::primitives::Address;
use tokio::sync::broadcast;

use crate::types::{RiskResult, ThreatAssessment};

/// Every externally-interesting transition the engine can emit. Kept
/// flat rather than one channel per concern, since a single dashboard
/// feed wants total ordering across candidate lifecycle and safety
/// events.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CandidateFound {
        start_token: Address,
        hop_count: usize,
        gross_profit: i128,
    },
    CandidateRejected {
        start_token: Address,
        stage: &'static str,
        reason: String,
    },
    RiskEvaluated {
        start_token: Address,
        result: RiskResult,
    },
    ThreatAssessed {
        start_token: Address,
        assessment: ThreatAssessment,
    },
    Dispatched {
        start_token: Address,
        tx_hash: Option<String>,
        bundle_hash: Option<String>,
        private: bool,
    },
    OraclePriceUpdated {
        symbol: String,
        price_scaled_1e18: String,
    },
    CircuitBreakerTripped {
        reason: String,
    },
    CircuitBreakerReset,
    EmergencyStopLatched {
        reason: String,
    },
    FeedReconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    FeedLost {
        source: String,
    },
}

/// Thin wrapper around a `broadcast::Sender`. Cloneable; every pipeline
/// stage that wants to publish holds a clone rather than sharing a
/// `&Observer` behind a lock, matching `broadcast`'s own cloning model.
#[derive(Clone)]
pub struct Observer {
    sender: broadcast::Sender<EngineEvent>,
}

impl Observer {
    /// `capacity` bounds how many events a lagging subscriber can fall
    /// behind by before it starts missing events; it does not bound how
    /// many subscribers may attach.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishing never fails from the caller's point of view: zero
    /// subscribers is the common case (no dashboard attached) and isn't
    /// an error condition.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let observer = Observer::new(16);
        let mut rx = observer.subscribe();
        observer.publish(EngineEvent::CircuitBreakerReset);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::CircuitBreakerReset));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let observer = Observer::new(4);
        observer.publish(EngineEvent::FeedLost {
            source: "ws".into(),
        });
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_it_missed_events_rather_than_blocking_publisher() {
        let observer = Observer::new(2);
        let mut rx = observer.subscribe();
        for i in 0..5u32 {
            observer.publish(EngineEvent::FeedReconnecting {
                attempt: i,
                delay_ms: 0,
            });
        }
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
