//! In-memory relay for healthcheck messages between operators.
//!
//! Messages are kept ordered by an id derived from the arrival time in
//! microseconds, capped at [`MAX_MESSAGES`] and expired after
//! [`MESSAGE_TTL_SECS`]. Nothing here touches disk; a restart drops the
//! backlog and peers simply resend.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retention cap, evicted oldest-first on insert.
pub const MAX_MESSAGES: usize = 100;
/// Messages older than this are dropped on read.
pub const MESSAGE_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: u64,
    pub text: String,
    /// Unix seconds at arrival.
    pub received_at: i64,
}

#[derive(Default)]
pub struct MessageStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    messages: BTreeMap<u64, RelayMessage>,
    last_id: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a message, evicting the oldest entries beyond the cap.
    pub fn push(&self, text: String) -> u64 {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("message store lock poisoned");

        // Monotonic even if the clock steps backwards.
        let id = (now.timestamp_micros() as u64).max(inner.last_id + 1);
        inner.last_id = id;
        inner.messages.insert(
            id,
            RelayMessage {
                id,
                text,
                received_at: now.timestamp(),
            },
        );

        while inner.messages.len() > MAX_MESSAGES {
            inner.messages.pop_first();
        }
        debug!(id, count = inner.messages.len(), "relay message stored");
        id
    }

    /// All live messages, oldest first. Expired entries are pruned here
    /// rather than on a timer.
    pub fn snapshot(&self) -> Vec<RelayMessage> {
        let cutoff = Utc::now().timestamp() - MESSAGE_TTL_SECS;
        let mut inner = self.inner.lock().expect("message store lock poisoned");
        inner.messages.retain(|_, m| m.received_at >= cutoff);
        inner.messages.values().cloned().collect()
    }

    #[cfg(test)]
    fn push_backdated(&self, text: String, received_at: i64) -> u64 {
        let mut inner = self.inner.lock().expect("message store lock poisoned");
        let id = inner.last_id + 1;
        inner.last_id = id;
        inner.messages.insert(
            id,
            RelayMessage {
                id,
                text,
                received_at,
            },
        );
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_come_back_oldest_first() {
        let store = MessageStore::new();
        store.push("first".into());
        store.push("second".into());
        store.push("third".into());

        let texts: Vec<_> = store.snapshot().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let store = MessageStore::new();
        let a = store.push("a".into());
        let b = store.push("b".into());
        let c = store.push("c".into());
        assert!(a < b && b < c);
    }

    #[test]
    fn cap_keeps_the_most_recent_hundred() {
        let store = MessageStore::new();
        for i in 0..150 {
            store.push(format!("m{i}"));
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), MAX_MESSAGES);
        assert_eq!(snapshot[0].text, "m50");
        assert_eq!(snapshot[MAX_MESSAGES - 1].text, "m149");
    }

    #[test]
    fn expired_messages_are_pruned_on_read() {
        let store = MessageStore::new();
        let stale = Utc::now().timestamp() - MESSAGE_TTL_SECS - 60;
        store.push_backdated("old".into(), stale);
        store.push("fresh".into());

        let texts: Vec<_> = store.snapshot().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["fresh"]);
    }
}
