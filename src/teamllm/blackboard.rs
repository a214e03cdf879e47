//! Blackboard: shared key/value state with coalescing change notifications.
//!
//! Members of a blackboard-topology team communicate indirectly: writers
//! overwrite keys, readers re-read on notification. The notification channel
//! is bounded (capacity 64) and lossy on purpose — it signals "something
//! changed at this key", not an event log. When the buffer is full the
//! notification is dropped; the write itself always lands, and the latest
//! value is observable via [`Blackboard::read`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Capacity of the notification channel.
const NOTIFY_BUFFER: usize = 64;

/// One entry on the blackboard.
#[derive(Debug, Clone)]
pub struct BlackboardEntry {
    pub key: String,
    /// Opaque value; the blackboard enforces no schema.
    pub value: serde_json::Value,
    /// Name of the member that last wrote the key.
    pub author: String,
    pub updated_at: DateTime<Utc>,
}

/// Shared key/value state with change notifications.
pub struct Blackboard {
    entries: Mutex<HashMap<String, BlackboardEntry>>,
    notify_tx: mpsc::Sender<String>,
    notify_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl Blackboard {
    /// Create an empty blackboard.
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_BUFFER);
        Self {
            entries: Mutex::new(HashMap::new()),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
        }
    }

    /// Overwrite `key` and emit a non-blocking notification carrying it.
    ///
    /// The notification is dropped when the channel is full — consumers
    /// coalesce by re-reading state, so a dropped signal loses nothing the
    /// next read would not see.
    pub fn write(&self, key: impl Into<String>, value: serde_json::Value, author: impl Into<String>) {
        let key = key.into();
        let entry = BlackboardEntry {
            key: key.clone(),
            value,
            author: author.into(),
            updated_at: Utc::now(),
        };
        {
            let mut entries = self.entries.lock().expect("blackboard lock");
            entries.insert(key.clone(), entry);
        }
        if self.notify_tx.try_send(key).is_err() {
            log::debug!("blackboard notification dropped (buffer full)");
        }
    }

    /// Latest entry for `key`, if any.
    pub fn read(&self, key: &str) -> Option<BlackboardEntry> {
        let entries = self.entries.lock().expect("blackboard lock");
        entries.get(key).cloned()
    }

    /// All keys currently present, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("blackboard lock");
        entries.keys().cloned().collect()
    }

    /// Take the receive end of the notification channel.
    ///
    /// There is exactly one receiver; the first call returns `Some`,
    /// subsequent calls return `None`.
    pub fn notify(&self) -> Option<mpsc::Receiver<String>> {
        self.notify_rx.lock().expect("blackboard lock").take()
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}
