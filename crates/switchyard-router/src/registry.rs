//! Pending-stream registry
//!
//! Holds the first arrival of each session until its peer shows up. The
//! pairing primitive is load-or-store: the first caller parks its entry,
//! the second consumes it atomically, so a third arrival on the same
//! stream id finds an empty slot and parks alone. Entries are tagged with
//! an id so a stale cleanup never evicts a later occupant of the slot.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};
use tracing::debug;

use switchyard_proto::StreamFrame;

/// Sender half of a participant's outbound stream
pub type FrameSender = mpsc::Sender<Result<StreamFrame, Status>>;

/// A parked participant: its RPC-scoped cancellation token, its inbound
/// frames, and the sender feeding its outbound stream
pub struct PendingEntry<S = Streaming<StreamFrame>> {
    id: u64,
    cancel: CancellationToken,
    inbound: S,
    sender: FrameSender,
}

impl<S> PendingEntry<S> {
    /// Create an entry; `id` must come from [`PendingRegistry::next_id`]
    pub fn new(id: u64, cancel: CancellationToken, inbound: S, sender: FrameSender) -> Self {
        Self {
            id,
            cancel,
            inbound,
            sender,
        }
    }

    /// The participant's cancellation token
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Split into the inbound stream and outbound sender for forwarding
    pub fn into_parts(self) -> (S, FrameSender) {
        (self.inbound, self.sender)
    }
}

/// Outcome of claiming a stream id
pub enum Claim<S = Streaming<StreamFrame>> {
    /// First arrival: the entry is parked, wait for a peer
    Waiter,
    /// Second arrival: the parked peer was consumed for pairing
    Paired {
        /// The entry the first arrival parked
        first: PendingEntry<S>,
        /// The entry the second arrival brought
        second: PendingEntry<S>,
    },
}

/// Registry of sessions waiting for their second participant
pub struct PendingRegistry<S = Streaming<StreamFrame>> {
    streams: DashMap<String, PendingEntry<S>>,
    next_id: AtomicU64,
}

impl<S> PendingRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Reserve an entry id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Load-or-store pairing step.
    ///
    /// Atomically either parks `entry` (first arrival) or consumes the
    /// parked peer (second arrival). After a pairing the slot is empty
    /// again, so replayed tokens wait alone and never forward.
    pub fn claim(&self, stream_id: &str, entry: PendingEntry<S>) -> Claim<S> {
        match self.streams.entry(stream_id.to_string()) {
            Entry::Occupied(occupied) => Claim::Paired {
                first: occupied.remove(),
                second: entry,
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Claim::Waiter
            }
        }
    }

    /// Remove the entry for `stream_id` if it is still the one tagged `id`.
    ///
    /// Fires the entry's cancellation token. Returns whether an entry was
    /// removed.
    pub fn remove_if_current(&self, stream_id: &str, id: u64) -> bool {
        let removed = self.streams.remove_if(stream_id, |_, entry| entry.id == id);
        if let Some((_, entry)) = removed {
            debug!(stream = %stream_id, "Pending stream removed");
            entry.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Whether a participant is parked on this stream id
    pub fn is_pending(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    /// Number of parked participants
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no participant is parked
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::Empty;

    type TestStream = Empty<Result<StreamFrame, Status>>;
    type TestRegistry = PendingRegistry<TestStream>;

    fn make_entry(registry: &TestRegistry) -> (u64, CancellationToken, PendingEntry<TestStream>) {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let id = registry.next_id();
        (
            id,
            cancel.clone(),
            PendingEntry::new(id, cancel, futures::stream::empty(), tx),
        )
    }

    #[test]
    fn test_first_arrival_parks() {
        let registry = TestRegistry::new();
        let (_, _, entry) = make_entry(&registry);

        assert!(matches!(registry.claim("s-1", entry), Claim::Waiter));
        assert!(registry.is_pending("s-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_second_arrival_consumes_entry() {
        let registry = TestRegistry::new();
        let (first_id, _, first) = make_entry(&registry);
        let (_, _, second) = make_entry(&registry);

        assert!(matches!(registry.claim("s-1", first), Claim::Waiter));
        match registry.claim("s-1", second) {
            Claim::Paired { first, .. } => assert_eq!(first.id, first_id),
            Claim::Waiter => panic!("expected pairing"),
        }

        // The slot is consumed: pairing happened exactly once
        assert!(!registry.is_pending("s-1"));
        assert!(registry.is_empty());
    }

    /// Story: a replayed token must never produce a second forwarding
    #[test]
    fn test_third_arrival_waits_alone() {
        let registry = TestRegistry::new();
        let (_, _, first) = make_entry(&registry);
        let (_, _, second) = make_entry(&registry);
        let (_, _, third) = make_entry(&registry);

        registry.claim("s-1", first);
        assert!(matches!(
            registry.claim("s-1", second),
            Claim::Paired { .. }
        ));

        // The third arrival parks against an empty slot and waits alone
        assert!(matches!(registry.claim("s-1", third), Claim::Waiter));
        assert!(registry.is_pending("s-1"));
    }

    #[test]
    fn test_remove_fires_cancel() {
        let registry = TestRegistry::new();
        let (id, cancel, entry) = make_entry(&registry);

        registry.claim("s-1", entry);
        assert!(registry.remove_if_current("s-1", id));
        assert!(cancel.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_remove_leaves_newer_entry() {
        let registry = TestRegistry::new();
        let (stale_id, _, first) = make_entry(&registry);

        registry.claim("s-1", first);
        assert!(registry.remove_if_current("s-1", stale_id));

        let (_, newer_cancel, newer) = make_entry(&registry);
        registry.claim("s-1", newer);

        assert!(!registry.remove_if_current("s-1", stale_id));
        assert!(registry.is_pending("s-1"));
        assert!(!newer_cancel.is_cancelled());
    }

    #[test]
    fn test_independent_sessions_do_not_interfere() {
        let registry = TestRegistry::new();
        let (_, _, a1) = make_entry(&registry);
        let (_, _, b1) = make_entry(&registry);
        let (_, _, a2) = make_entry(&registry);

        registry.claim("s-a", a1);
        registry.claim("s-b", b1);
        assert_eq!(registry.len(), 2);

        assert!(matches!(registry.claim("s-a", a2), Claim::Paired { .. }));
        assert!(registry.is_pending("s-b"));
        assert!(!registry.is_pending("s-a"));
    }
}
