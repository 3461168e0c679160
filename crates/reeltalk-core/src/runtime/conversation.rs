//! Short-term conversation memory with per-entry TTL.
//!
//! Entries live in a sharded map so senders on different shards never block
//! each other. `get` enforces the TTL itself; the background sweep only
//! reclaims memory.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::Message;

/// Default time an idle conversation stays visible.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct ConversationEntry {
    history: Vec<Message>,
    last_seen: Instant,
}

impl ConversationEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }
}

pub struct ConversationStore {
    ttl: Duration,
    entries: DashMap<String, ConversationEntry>,
}

impl ConversationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// History for `sender_id`, or `None` if absent or idle for longer than
    /// the TTL.
    pub fn get(&self, sender_id: &str) -> Option<Vec<Message>> {
        let entry = self.entries.get(sender_id)?;
        if entry.is_expired(Instant::now(), self.ttl) {
            return None;
        }
        Some(entry.history.clone())
    }

    /// Replace the sender's history and refresh its last-seen time.
    pub fn set(&self, sender_id: &str, history: Vec<Message>) {
        self.entries.insert(
            sender_id.to_string(),
            ConversationEntry {
                history,
                last_seen: Instant::now(),
            },
        );
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(now, self.ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep on a fixed tick equal to the TTL until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + store.ttl, store.ttl);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Conversation sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            debug!("Evicted {} idle conversations", removed);
                        }
                    }
                }
            }
        })
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(text: &str) -> Vec<Message> {
        vec![Message::system("sys"), Message::user(text)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_visible_until_ttl_elapses() {
        let store = ConversationStore::new(Duration::from_secs(60));
        store.set("u1", history("hello"));

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert_eq!(store.get("u1"), Some(history("hello")));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(store.get("u1"), None);
        // Still physically present until a sweep runs.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refreshes_last_seen() {
        let store = ConversationStore::new(Duration::from_secs(60));
        store.set("u1", history("one"));
        tokio::time::advance(Duration::from_secs(50)).await;
        store.set("u1", history("two"));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(store.get("u1"), Some(history("two")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = ConversationStore::new(Duration::from_secs(60));
        store.set("old", history("a"));
        tokio::time::advance(Duration::from_secs(45)).await;
        store.set("fresh", history("b"));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.sweep(), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_reclaims_and_cancels() {
        let store = Arc::new(ConversationStore::new(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(cancel.clone());

        store.set("u1", history("a"));
        // Two ticks: the first finds the entry fresh, the second expired.
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(store.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .unwrap();
    }
}
