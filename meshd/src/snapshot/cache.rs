use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::builder::Snapshot;

/// Single-writer, multi-reader snapshot feed for the local data plane.
/// `set_snapshot` is the sole mutation; subscribers observe versions in
/// strictly increasing order with intermediate versions coalesced away.
#[derive(Debug)]
pub struct SnapshotCache {
    tx: watch::Sender<Snapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::empty());
        Self { tx }
    }

    /// Publish a snapshot. A version that does not advance past the
    /// current one is rejected, which keeps observed versions monotonic.
    pub fn set_snapshot(&self, snapshot: Snapshot) -> bool {
        let current = self.tx.borrow().version_number();
        if snapshot.version_number() <= current {
            return false;
        }
        let _ = self.tx.send(snapshot);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// The feed as a stream, for data-plane consumers that poll it.
    pub fn stream(&self) -> WatchStream<Snapshot> {
        WatchStream::new(self.tx.subscribe())
    }

    pub fn current(&self) -> Snapshot {
        self.tx.borrow().clone()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: u64) -> Snapshot {
        Snapshot {
            version: version.to_string(),
            listeners: Vec::new(),
            clusters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_versions_are_monotonic() {
        let cache = SnapshotCache::new();
        assert!(cache.set_snapshot(snapshot(1)));
        assert!(cache.set_snapshot(snapshot(2)));
        assert!(!cache.set_snapshot(snapshot(2)));
        assert!(!cache.set_snapshot(snapshot(1)));
        assert_eq!(cache.current().version, "2");
    }

    #[tokio::test]
    async fn test_watcher_sees_latest() {
        let cache = SnapshotCache::new();
        let mut rx = cache.subscribe();
        cache.set_snapshot(snapshot(1));
        cache.set_snapshot(snapshot(2));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().version, "2");
    }
}
