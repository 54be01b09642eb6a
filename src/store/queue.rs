//! Time-ordered queues with secondary indices
//!
//! This module handles:
//! - Appending entries at the tail of a `(low, high)` counter pair
//! - Draining due entries from the head in creation-time order
//! - Removing entries anywhere in the queue, leaving holes the drain skips
//! - Point lookups through a per-entry secondary key
//!
//! Entries must be appended in non-decreasing creation time. The drain relies
//! on this to stop at the first entry that is not yet due, so an entry older
//! than the current tail is rejected.

use crate::error::{RegistryError, Result};
use crate::store::keys::{trailing_u64, KeyBuilder, QUEUE_PREFIX};
use crate::store::{KvStore, TypedStore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::debug;

/// Payload stored in a [`TimeQueue`]
pub trait QueueEntry: Serialize + DeserializeOwned + Clone {
    /// Position in the queue, assigned on enqueue
    fn index(&self) -> u64;

    /// Assign the queue position
    fn set_index(&mut self, index: u64);

    /// Timestamp the entry was created at
    fn creation_time(&self) -> u64;

    /// Secondary lookup key, built from [`KeyBuilder`] components
    fn secondary_key(&self) -> Vec<u8>;
}

/// Queue instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Stake waiting to be paid back to a staker
    StakeUnbonding,
    /// Delegation waiting to be paid back to a delegator
    DelegationUnbonding,
    /// Pending commission change of a staker
    CommissionChange,
    /// Redelegation spent by an address
    RedelegationCooldown,
}

impl QueueKind {
    fn tag(self) -> u8 {
        match self {
            QueueKind::StakeUnbonding => 1,
            QueueKind::DelegationUnbonding => 2,
            QueueKind::CommissionChange => 3,
            QueueKind::RedelegationCooldown => 4,
        }
    }
}

/// Counters of a queue. `low_index == high_index` means empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Index of the last consumed entry
    pub low_index: u64,

    /// Index of the last appended entry
    pub high_index: u64,

    /// Creation time of the last appended entry
    pub tail_creation_time: u64,
}

impl QueueState {
    /// Number of slots between head and tail, holes included
    pub fn span(&self) -> u64 {
        self.high_index - self.low_index
    }
}

/// Handle onto one queue instance in a store
#[derive(Debug, Clone, Copy)]
pub struct TimeQueue<E> {
    kind: QueueKind,
    _entry: PhantomData<E>,
}

/// Whether an entry created at `creation_time` is due at `now`
pub fn is_due(creation_time: u64, period: u64, now: u64) -> bool {
    creation_time.saturating_add(period) <= now
}

/// Whether an entry created at `creation_time` is older than `window` at
/// `now`. An entry exactly `window` old is still inside it.
pub fn is_expired(creation_time: u64, window: u64, now: u64) -> bool {
    now.saturating_sub(creation_time) > window
}

impl<E: QueueEntry> TimeQueue<E> {
    /// Handle onto the queue of the given kind
    pub const fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            _entry: PhantomData,
        }
    }

    /// Queue kind
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn state_key(&self) -> Vec<u8> {
        KeyBuilder::new(QUEUE_PREFIX)
            .raw(&[self.kind.tag(), 0])
            .build()
    }

    fn entry_key(&self, index: u64) -> Vec<u8> {
        KeyBuilder::new(QUEUE_PREFIX)
            .raw(&[self.kind.tag(), 1])
            .u64(index)
            .build()
    }

    fn secondary_prefix(&self, secondary: &[u8]) -> Vec<u8> {
        KeyBuilder::new(QUEUE_PREFIX)
            .raw(&[self.kind.tag(), 2])
            .raw(secondary)
            .build()
    }

    fn secondary_entry_key(&self, entry: &E) -> Vec<u8> {
        KeyBuilder::new(&self.secondary_prefix(&entry.secondary_key()))
            .u64(entry.index())
            .build()
    }

    /// Current counters
    pub fn state<S: KvStore + ?Sized>(&self, store: &S) -> Result<QueueState> {
        Ok(store.get_value(&self.state_key())?.unwrap_or_default())
    }

    fn set_state<S: KvStore + ?Sized>(&self, store: &mut S, state: &QueueState) -> Result<()> {
        store.set_value(&self.state_key(), state)
    }

    /// Append an entry at `high_index + 1` and return it with its index set
    pub fn enqueue<S: KvStore + ?Sized>(&self, store: &mut S, mut entry: E) -> Result<E> {
        let mut state = self.state(store)?;

        if entry.creation_time() < state.tail_creation_time {
            return Err(RegistryError::QueueOrderViolation {
                creation_time: entry.creation_time(),
                tail_time: state.tail_creation_time,
            });
        }

        state.high_index += 1;
        state.tail_creation_time = entry.creation_time();
        entry.set_index(state.high_index);

        store.set_value(&self.entry_key(entry.index()), &entry)?;
        store.set(&self.secondary_entry_key(&entry), Vec::new());
        self.set_state(store, &state)?;

        debug!(
            queue = ?self.kind,
            index = entry.index(),
            creation_time = entry.creation_time(),
            "Queue entry appended"
        );

        Ok(entry)
    }

    /// Remove every entry sharing the secondary key, then append `entry`.
    /// The entry restarts its timer at the tail.
    pub fn enqueue_replacing<S: KvStore + ?Sized>(&self, store: &mut S, entry: E) -> Result<E> {
        for existing in self.find_by_secondary(store, &entry.secondary_key())? {
            self.remove(store, &existing)?;
        }
        self.enqueue(store, entry)
    }

    /// Entry at an index
    pub fn get<S: KvStore + ?Sized>(&self, store: &S, index: u64) -> Result<Option<E>> {
        store.get_value(&self.entry_key(index))
    }

    /// Delete an entry and its secondary index, leaving a hole
    pub fn remove<S: KvStore + ?Sized>(&self, store: &mut S, entry: &E) -> Result<()> {
        store.delete(&self.entry_key(entry.index()));
        store.delete(&self.secondary_entry_key(entry));
        Ok(())
    }

    /// Entries whose secondary key starts with `secondary`, in queue order
    pub fn find_by_secondary<S: KvStore + ?Sized>(
        &self,
        store: &S,
        secondary: &[u8],
    ) -> Result<Vec<E>> {
        let mut entries = Vec::new();
        for key in store.keys_with_prefix(&self.secondary_prefix(secondary)) {
            let Some(index) = trailing_u64(&key) else {
                continue;
            };
            if let Some(entry) = self.get(store, index)? {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|entry| entry.index());
        Ok(entries)
    }

    /// All live entries, head first
    pub fn entries<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<E>> {
        let state = self.state(store)?;
        let mut entries = Vec::new();
        for index in state.low_index + 1..=state.high_index {
            if let Some(entry) = self.get(store, index)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Head entry if it is due at `now`.
    ///
    /// Missing slots at the head are skipped and the low counter persisted
    /// past them. The caller applies the entry and then calls
    /// [`TimeQueue::complete`].
    pub fn next_due<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        now: u64,
        period: u64,
    ) -> Result<Option<E>> {
        self.next_due_by(store, |entry| is_due(entry.creation_time(), period, now))
    }

    /// Head entry if `ready` accepts it, with the same skipping as
    /// [`TimeQueue::next_due`]. `ready` must be monotone in creation time.
    pub fn next_due_by<S: KvStore + ?Sized>(
        &self,
        store: &mut S,
        ready: impl Fn(&E) -> bool,
    ) -> Result<Option<E>> {
        let mut state = self.state(store)?;
        let start_low = state.low_index;

        let mut due = None;
        while state.low_index < state.high_index {
            match self.get(store, state.low_index + 1)? {
                None => state.low_index += 1,
                Some(entry) => {
                    if ready(&entry) {
                        due = Some(entry);
                    }
                    break;
                }
            }
        }

        if state.low_index != start_low {
            debug!(
                queue = ?self.kind,
                skipped = state.low_index - start_low,
                "Skipped consumed queue slots"
            );
            self.set_state(store, &state)?;
        }

        Ok(due)
    }

    /// Delete a drained head entry and advance the low counter past it
    pub fn complete<S: KvStore + ?Sized>(&self, store: &mut S, entry: &E) -> Result<()> {
        self.remove(store, entry)?;
        let mut state = self.state(store)?;
        if entry.index() > state.low_index {
            state.low_index = entry.index();
            self.set_state(store, &state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestEntry {
        index: u64,
        owner: String,
        created: u64,
    }

    impl QueueEntry for TestEntry {
        fn index(&self) -> u64 {
            self.index
        }

        fn set_index(&mut self, index: u64) {
            self.index = index;
        }

        fn creation_time(&self) -> u64 {
            self.created
        }

        fn secondary_key(&self) -> Vec<u8> {
            KeyBuilder::new(&[]).str(&self.owner).build()
        }
    }

    fn entry(owner: &str, created: u64) -> TestEntry {
        TestEntry {
            index: 0,
            owner: owner.to_string(),
            created,
        }
    }

    const QUEUE: TimeQueue<TestEntry> = TimeQueue::new(QueueKind::StakeUnbonding);

    fn drain(store: &mut MemoryStore, now: u64, period: u64) -> Vec<TestEntry> {
        let mut drained = Vec::new();
        while let Some(e) = QUEUE.next_due(store, now, period).unwrap() {
            QUEUE.complete(store, &e).unwrap();
            drained.push(e);
        }
        drained
    }

    #[test]
    fn test_enqueue_assigns_sequential_indices() {
        let mut store = MemoryStore::new();
        let a = QUEUE.enqueue(&mut store, entry("a", 10)).unwrap();
        let b = QUEUE.enqueue(&mut store, entry("b", 10)).unwrap();
        assert_eq!(a.index, 1);
        assert_eq!(b.index, 2);

        let state = QUEUE.state(&store).unwrap();
        assert_eq!(state.low_index, 0);
        assert_eq!(state.high_index, 2);
    }

    #[test]
    fn test_backdated_entry_rejected() {
        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 10)).unwrap();
        let result = QUEUE.enqueue(&mut store, entry("b", 9));
        assert!(matches!(
            result,
            Err(RegistryError::QueueOrderViolation { .. })
        ));
    }

    #[test]
    fn test_drain_stops_at_first_not_due() {
        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        QUEUE.enqueue(&mut store, entry("b", 5)).unwrap();
        QUEUE.enqueue(&mut store, entry("c", 20)).unwrap();

        // Period 10: a due at 10, b at 15, c at 30
        let drained = drain(&mut store, 15, 10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].owner, "a");
        assert_eq!(drained[1].owner, "b");

        let remaining = QUEUE.entries(&store).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].owner, "c");
    }

    #[test]
    fn test_expiry_window_is_strict() {
        assert!(is_due(10, 100, 110));
        assert!(!is_expired(10, 100, 110));
        assert!(is_expired(10, 100, 111));

        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 10)).unwrap();
        let expired = |now| move |e: &TestEntry| is_expired(e.created, 100, now);
        assert!(QUEUE.next_due_by(&mut store, expired(110)).unwrap().is_none());
        assert_eq!(
            QUEUE.next_due_by(&mut store, expired(111)).unwrap().map(|e| e.owner),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        QUEUE.enqueue(&mut store, entry("b", 50)).unwrap();

        assert_eq!(drain(&mut store, 20, 10).len(), 1);
        let state = QUEUE.state(&store).unwrap();
        assert!(drain(&mut store, 20, 10).is_empty());
        assert_eq!(QUEUE.state(&store).unwrap(), state);
    }

    #[test]
    fn test_removed_entries_are_skipped() {
        let mut store = MemoryStore::new();
        let a = QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        QUEUE.enqueue(&mut store, entry("b", 0)).unwrap();
        QUEUE.remove(&mut store, &a).unwrap();

        let drained = drain(&mut store, 100, 10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].owner, "b");

        let state = QUEUE.state(&store).unwrap();
        assert_eq!(state.low_index, state.high_index);
    }

    #[test]
    fn test_enqueue_replacing_resets_timer() {
        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        QUEUE.enqueue_replacing(&mut store, entry("a", 50)).unwrap();

        let found = QUEUE.find_by_secondary(&store, &entry("a", 0).secondary_key()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].created, 50);
        assert_eq!(found[0].index, 2);

        // Old entry would have been due at 100
        assert!(drain(&mut store, 100, 100).is_empty());
        assert_eq!(drain(&mut store, 150, 100).len(), 1);
    }

    #[test]
    fn test_secondary_lookup_separates_owners() {
        let mut store = MemoryStore::new();
        QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        QUEUE.enqueue(&mut store, entry("ab", 1)).unwrap();
        QUEUE.enqueue(&mut store, entry("a", 2)).unwrap();

        let key = KeyBuilder::new(&[]).str("a").build();
        let found = QUEUE.find_by_secondary(&store, &key).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|e| e.owner == "a"));
    }

    #[test]
    fn test_queues_are_isolated() {
        let mut store = MemoryStore::new();
        let other: TimeQueue<TestEntry> = TimeQueue::new(QueueKind::CommissionChange);
        QUEUE.enqueue(&mut store, entry("a", 0)).unwrap();
        assert!(other.entries(&store).unwrap().is_empty());
    }
}
