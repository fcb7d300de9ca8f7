//! Cross-Window Sync Channel
//!
//! The primary window publishes its coordinates (row, dataset, publish time and
//! optionally the full playback state). Secondary windows read the latest value
//! and render it themselves; they never receive pre-rendered visuals.
//!
//! - Latest value: `ArcSwap`, lock-free reads
//! - Live fan-out: `tokio::sync::broadcast` (WebSocket subscribers)
//! - Publications older than the current one are dropped
//! - Pop-out view registry: which secondary windows are open

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::state::PlaybackState;

/// Age below which a secondary window is considered in sync.
pub const SYNCED_MAX_AGE_MS: i64 = 2_000;
/// Age below which a secondary window is slow but still usable.
pub const SLOW_MAX_AGE_MS: i64 = 5_000;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Current row of the primary window.
    pub value: usize,
    pub filename: String,
    /// Publish time, epoch ms.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "Synced")]
    Synced,
    #[serde(rename = "Slow")]
    Slow,
    #[serde(rename = "Not Synced")]
    NotSynced,
}

impl SyncStatus {
    /// Clock skew that puts the publish time in the future counts as fresh.
    pub fn from_age_ms(age_ms: i64) -> Self {
        if age_ms < SYNCED_MAX_AGE_MS {
            Self::Synced
        } else if age_ms < SLOW_MAX_AGE_MS {
            Self::Slow
        } else {
            Self::NotSynced
        }
    }
}

/// What a secondary window polls.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub message: Option<SyncMessage>,
    pub age_ms: Option<i64>,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewStatus {
    pub view: String,
    pub open: bool,
    pub updated_at: i64,
}

pub struct SyncChannel {
    latest: ArcSwap<Option<SyncMessage>>,
    /// Serializes publishers so the "newer wins" check and the swap are atomic.
    publish_lock: Mutex<()>,
    update_tx: broadcast::Sender<SyncMessage>,
    views: RwLock<HashMap<String, ViewStatus>>,
}

impl Default for SyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncChannel {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            latest: ArcSwap::from_pointee(None),
            publish_lock: Mutex::new(()),
            update_tx,
            views: RwLock::new(HashMap::new()),
        }
    }

    /// Store `message` unless a newer one is already held. Returns whether it was accepted.
    pub fn publish(&self, message: SyncMessage) -> bool {
        let _guard = self.publish_lock.lock();
        let current = self.latest.load();
        if let Some(current) = &**current {
            if message.timestamp < current.timestamp {
                trace!(
                    incoming = message.timestamp,
                    current = current.timestamp,
                    "Dropping stale sync publication"
                );
                return false;
            }
        }

        self.latest.store(Arc::new(Some(message.clone())));
        // No subscribers is fine; pollers still see `latest`.
        let receivers = self.update_tx.send(message).unwrap_or(0);
        trace!(receivers, "Sync publication stored");
        true
    }

    pub fn latest(&self) -> Option<SyncMessage> {
        (**self.latest.load()).clone()
    }

    pub fn snapshot(&self, now_ms: i64) -> SyncSnapshot {
        let message = self.latest();
        let age_ms = message
            .as_ref()
            .map(|m| now_ms.saturating_sub(m.timestamp).max(0));
        let status = age_ms
            .map(SyncStatus::from_age_ms)
            .unwrap_or(SyncStatus::NotSynced);
        SyncSnapshot {
            message,
            age_ms,
            status,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.update_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.update_tx.receiver_count()
    }

    pub fn set_view(&self, view: &str, open: bool, now_ms: i64) -> ViewStatus {
        let status = ViewStatus {
            view: view.to_string(),
            open,
            updated_at: now_ms,
        };
        self.views.write().insert(view.to_string(), status.clone());
        debug!(view, open, "Pop-out view status changed");
        status
    }

    /// All known views, sorted by name.
    pub fn views(&self) -> Vec<ViewStatus> {
        let mut views: Vec<ViewStatus> = self.views.read().values().cloned().collect();
        views.sort_by(|a, b| a.view.cmp(&b.view));
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(value: usize, timestamp: i64) -> SyncMessage {
        SyncMessage {
            value,
            filename: "a.csv".to_string(),
            timestamp,
            playback: None,
        }
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(SyncStatus::from_age_ms(0), SyncStatus::Synced);
        assert_eq!(SyncStatus::from_age_ms(1_999), SyncStatus::Synced);
        assert_eq!(SyncStatus::from_age_ms(2_000), SyncStatus::Slow);
        assert_eq!(SyncStatus::from_age_ms(4_999), SyncStatus::Slow);
        assert_eq!(SyncStatus::from_age_ms(5_000), SyncStatus::NotSynced);
    }

    #[test]
    fn test_latest_wins_and_stale_dropped() {
        let ch = SyncChannel::new();
        assert!(ch.latest().is_none());
        assert!(ch.publish(msg(5, 1_000)));
        assert!(ch.publish(msg(6, 1_500)));
        assert!(!ch.publish(msg(1, 1_200)));
        assert_eq!(ch.latest().map(|m| m.value), Some(6));
    }

    #[test]
    fn test_snapshot_age() {
        let ch = SyncChannel::new();
        assert_eq!(ch.snapshot(10_000).status, SyncStatus::NotSynced);

        ch.publish(msg(3, 10_000));
        let snap = ch.snapshot(13_000);
        assert_eq!(snap.age_ms, Some(3_000));
        assert_eq!(snap.status, SyncStatus::Slow);
        // publish time ahead of local clock
        assert_eq!(ch.snapshot(9_000).status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_subscribers_receive_publications() {
        let ch = SyncChannel::new();
        let mut rx = ch.subscribe();
        ch.publish(msg(42, 1));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.value, 42);
    }

    #[test]
    fn test_view_registry() {
        let ch = SyncChannel::new();
        ch.set_view("orderbook", true, 100);
        ch.set_view("btc", true, 110);
        ch.set_view("orderbook", false, 120);
        let views = ch.views();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].view, "btc");
        assert!(!views[1].open);
        assert_eq!(views[1].updated_at, 120);
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(msg(7, 99)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"value": 7, "filename": "a.csv", "timestamp": 99})
        );
        let status = serde_json::to_value(SyncStatus::NotSynced).unwrap();
        assert_eq!(status, "Not Synced");
    }
}
