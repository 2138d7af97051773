use std::collections::HashMap;
use tokio::sync::broadcast;

/// Events a subscriber may fall behind by before it starts losing the oldest.
const BUS_CAPACITY: usize = 256;

/// Published after every cache write. `origin` is the writing instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub revision: i64,
    pub origin: String,
}

/// In-process publish/subscribe channel for cache writes.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no live subscriber is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A key whose stored revision moved since the watcher last looked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    pub key: String,
    pub revision: i64,
    pub writer: String,
}

/// Tracks the last revision seen per key so that writes made by other
/// processes sharing the same cache file can be detected by polling.
#[derive(Debug, Default)]
pub struct RevisionWatcher {
    seen: HashMap<String, i64>,
}

impl RevisionWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a revision without reporting it (own writes, initial snapshot).
    pub fn mark_seen(&mut self, key: &str, revision: i64) {
        let e = self.seen.entry(key.to_string()).or_insert(revision);
        if revision > *e {
            *e = revision;
        }
    }

    /// Feeds the current `(key, revision, writer)` triples and returns the ones
    /// that advanced and were written by someone other than `self_id`.
    pub fn observe<I>(&mut self, current: I, self_id: &str) -> Vec<ExternalChange>
    where
        I: IntoIterator<Item = (String, i64, String)>,
    {
        let mut out = Vec::new();
        for (key, revision, writer) in current {
            let prev = self.seen.get(&key).copied().unwrap_or(0);
            if revision <= prev {
                continue;
            }
            self.seen.insert(key.clone(), revision);
            if writer != self_id {
                out.push(ExternalChange {
                    key,
                    revision,
                    writer,
                });
            }
        }
        out
    }
}
