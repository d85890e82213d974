//! Bridge monitoring.
//!
//! Records request/auth/rotation events for the diagnostic WebSocket feed
//! and keeps simple counters. Events identify accounts by email only; no
//! token material ever enters an event.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// What happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestStarted,
    RequestCompleted,
    RequestFailed,
    TokenRefreshed,
    AccountRotated,
    QuotaExhausted,
}

/// One monitoring event, pushed over `/ws` as it happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub kind: EventKind,
    /// Unix millis when the event occurred
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Account identifier, never the credential itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Request wall time in millis, on completion events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl BridgeEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now().timestamp_millis(),
            model: None,
            account: None,
            detail: None,
            duration_ms: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Aggregate counters since process start.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub rotations: u64,
    pub token_refreshes: u64,
}

/// Event sink shared by the gateway and the WebSocket feed.
pub struct BridgeMonitor {
    stats: RwLock<BridgeStats>,
    events: RwLock<VecDeque<BridgeEvent>>,
    max_events: usize,
    sender: broadcast::Sender<BridgeEvent>,
}

impl BridgeMonitor {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            stats: RwLock::new(BridgeStats::default()),
            events: RwLock::new(VecDeque::with_capacity(1024)),
            max_events: 1000,
            sender,
        }
    }

    /// Subscribe for live events (the `/ws` feed).
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub async fn record(&self, event: BridgeEvent) {
        {
            let mut stats = self.stats.write().await;
            match event.kind {
                EventKind::RequestStarted => stats.total_requests += 1,
                EventKind::RequestCompleted => stats.success_count += 1,
                EventKind::RequestFailed => stats.error_count += 1,
                EventKind::TokenRefreshed => stats.token_refreshes += 1,
                EventKind::AccountRotated | EventKind::QuotaExhausted => stats.rotations += 1,
            }
        }

        // Dropped when nobody is listening; the feed is best-effort.
        let _ = self.sender.send(event.clone());

        let mut events = self.events.write().await;
        if events.len() >= self.max_events {
            let excess = events.len() - self.max_events + 1;
            events.drain(..excess);
        }
        events.push_back(event);
    }

    pub async fn stats(&self) -> BridgeStats {
        *self.stats.read().await
    }

    /// Most recent events, newest first.
    pub async fn recent_events(&self, limit: Option<usize>) -> Vec<BridgeEvent> {
        let events = self.events.read().await;
        let limit = limit.unwrap_or(events.len());
        events.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for BridgeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience alias used across the gateway.
pub type SharedMonitor = Arc<BridgeMonitor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_updates_stats_and_buffer() {
        let monitor = BridgeMonitor::new();
        monitor.record(BridgeEvent::new(EventKind::RequestStarted)).await;
        monitor
            .record(
                BridgeEvent::new(EventKind::RequestCompleted)
                    .with_model("agent-default")
                    .with_duration_ms(42),
            )
            .await;

        let stats = monitor.stats().await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.success_count, 1);

        let events = monitor.recent_events(Some(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::RequestCompleted);
    }

    #[tokio::test]
    async fn test_subscribers_receive_live_events() {
        let monitor = BridgeMonitor::new();
        let mut rx = monitor.subscribe();
        monitor
            .record(BridgeEvent::new(EventKind::QuotaExhausted).with_account("a@x.io"))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::QuotaExhausted);
        assert_eq!(event.account.as_deref(), Some("a@x.io"));
    }
}
