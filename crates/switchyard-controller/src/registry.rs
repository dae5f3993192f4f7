//! Listening-exporter registry
//!
//! Tracks the live `Listen` stream of each exporter. At most one entry per
//! exporter exists at any instant; a second `Listen` is rejected rather
//! than preempting the first. Entries are tagged with a monotonically
//! increasing id so a stale cleanup never removes a newer listener's entry.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

use switchyard_common::{Error, Result};
use switchyard_proto::ListenResponse;

/// Sender half of an exporter's `Listen` stream
pub type OfferSender = mpsc::Sender<std::result::Result<ListenResponse, Status>>;

/// A registered listener: the cancellation token of its RPC scope and the
/// sender feeding its response stream
pub struct ListenEntry {
    id: u64,
    cancel: CancellationToken,
    sender: OfferSender,
}

impl ListenEntry {
    /// Create an entry; `id` must come from [`ListenRegistry::next_id`]
    pub fn new(id: u64, cancel: CancellationToken, sender: OfferSender) -> Self {
        Self { id, cancel, sender }
    }
}

/// Registry of exporters with an active `Listen` stream
///
/// Thread-safe via DashMap; insertion is atomic insert-if-absent so two
/// concurrent `Listen` calls for the same exporter cannot both win.
#[derive(Default)]
pub struct ListenRegistry {
    entries: DashMap<String, ListenEntry>,
    next_id: AtomicU64,
}

impl ListenRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an entry id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert a listener for `exporter`; fails if one is already present
    pub fn insert(&self, exporter: &str, entry: ListenEntry) -> Result<()> {
        match self.entries.entry(exporter.to_string()) {
            Entry::Occupied(_) => {
                warn!(exporter = %exporter, "Exporter is already listening");
                Err(Error::already_listening(exporter))
            }
            Entry::Vacant(vacant) => {
                info!(exporter = %exporter, "Exporter listening");
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// The offer sender for an exporter's stream, if it is listening
    pub fn sender(&self, exporter: &str) -> Option<OfferSender> {
        self.entries.get(exporter).map(|e| e.sender.clone())
    }

    /// Remove the entry for `exporter` if it is still the one tagged `id`.
    ///
    /// Fires the entry's cancellation token. Returns whether an entry was
    /// removed.
    pub fn remove_if_current(&self, exporter: &str, id: u64) -> bool {
        let removed = self.entries.remove_if(exporter, |_, entry| entry.id == id);
        if let Some((_, entry)) = removed {
            debug!(exporter = %exporter, "Listener removed");
            entry.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Whether an exporter is currently listening
    pub fn is_listening(&self, exporter: &str) -> bool {
        self.entries.contains_key(exporter)
    }

    /// Number of listening exporters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no exporter is listening
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(registry: &ListenRegistry) -> (u64, CancellationToken, ListenEntry, mpsc::Receiver<std::result::Result<ListenResponse, Status>>) {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let id = registry.next_id();
        (id, cancel.clone(), ListenEntry::new(id, cancel, tx), rx)
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = ListenRegistry::new();
        let (_, _, entry, _rx) = make_entry(&registry);

        registry.insert("exporter-01", entry).unwrap();
        assert!(registry.is_listening("exporter-01"));
        assert!(!registry.is_listening("exporter-02"));
        assert!(registry.sender("exporter-01").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = ListenRegistry::new();
        let (_, _, first, _rx1) = make_entry(&registry);
        let (_, _, second, _rx2) = make_entry(&registry);

        registry.insert("exporter-01", first).unwrap();
        let err = registry.insert("exporter-01", second).unwrap_err();
        assert!(matches!(err, Error::AlreadyListening { .. }));

        // The first listener is untouched
        assert!(registry.sender("exporter-01").is_some());
    }

    #[test]
    fn test_remove_fires_cancel() {
        let registry = ListenRegistry::new();
        let (id, cancel, entry, _rx) = make_entry(&registry);

        registry.insert("exporter-01", entry).unwrap();
        assert!(!cancel.is_cancelled());

        assert!(registry.remove_if_current("exporter-01", id));
        assert!(cancel.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_remove_leaves_newer_entry() {
        let registry = ListenRegistry::new();
        let (stale_id, _, first, _rx1) = make_entry(&registry);

        registry.insert("exporter-01", first).unwrap();
        assert!(registry.remove_if_current("exporter-01", stale_id));

        // A fresh listener takes the slot; the stale id must not evict it
        let (_, newer_cancel, second, _rx2) = make_entry(&registry);
        registry.insert("exporter-01", second).unwrap();

        assert!(!registry.remove_if_current("exporter-01", stale_id));
        assert!(registry.is_listening("exporter-01"));
        assert!(!newer_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_sender_delivers_offers_in_order() {
        let registry = ListenRegistry::new();
        let (_, _, entry, mut rx) = make_entry(&registry);
        registry.insert("exporter-01", entry).unwrap();

        let sender = registry.sender("exporter-01").unwrap();
        for i in 0..3 {
            sender
                .send(Ok(ListenResponse {
                    router_endpoint: "router.test:8083".to_string(),
                    router_token: format!("tok-{i}"),
                }))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let offer = rx.recv().await.unwrap().unwrap();
            assert_eq!(offer.router_token, format!("tok-{i}"));
        }
    }
}
