use std::collections::VecDeque;
use std::hash::Hash;

use hashlink::LinkedHashMap;
use parking_lot::Mutex;

use crate::error::ReplacerError;

/// How a page was touched. Only used as a policy hint by the replacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    // Sequential scans do not update history, so one pass over a large table
    // cannot push a frequently used working set out of the pool.
    Scan,
    Index,
}

pub trait Replacer<ID: Eq + Hash + Copy> {
    fn evict(&self) -> Option<ID>;
    fn record_access(&self, entry_id: ID, access_type: AccessType) -> Result<(), ReplacerError>;
    fn set_evictable(&self, entry_id: ID, evictability: bool) -> Result<(), ReplacerError>;
    fn remove(&self, entry_id: ID) -> Result<(), ReplacerError>;
    fn size(&self) -> usize;
}

#[derive(Debug, Default)]
struct LRUKNode {
    // Oldest timestamp at the front, at most k entries
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LRUKNode {
    fn push_timestamp(&mut self, timestamp: u64, k: usize) {
        if self.history.len() == k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp);
    }

    fn kth_entry(&self, k: usize) -> Option<u64> {
        if self.history.len() < k {
            return None;
        }
        self.history.front().copied()
    }

    fn last_entry(&self) -> Option<u64> {
        self.history.back().copied()
    }
}

/// Eviction rank of a candidate. Larger ranks are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Finite(u64),
    // Fewer than k accesses. Ordered so the oldest latest access ranks highest.
    Infinite(std::cmp::Reverse<Option<u64>>),
}

#[derive(Debug)]
struct ReplacerState<ID: Eq + Hash + Copy> {
    node_store: LinkedHashMap<ID, LRUKNode>,
    current_timestamp: u64,
    evictable_size: usize,
}

/// LRU-K replacement policy.
///
/// Evicts the evictable entry with the largest backward k-distance, the time
/// since its k-th most recent access. Entries with fewer than k recorded
/// accesses have an infinite distance; among those the one whose latest
/// access is oldest goes first.
pub struct LRUKReplacer<ID: Eq + Hash + Copy> {
    state: Mutex<ReplacerState<ID>>,
    replacer_size: usize,
    k: usize,
}

impl<ID: Eq + Hash + Copy> LRUKReplacer<ID> {
    pub fn new(number_of_entries: usize, k: usize) -> Self {
        LRUKReplacer {
            state: Mutex::new(ReplacerState {
                node_store: LinkedHashMap::with_capacity(number_of_entries),
                current_timestamp: 0,
                evictable_size: 0,
            }),
            replacer_size: number_of_entries,
            k: k.max(1),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of entries tracked, evictable or not.
    pub fn tracked(&self) -> usize {
        self.state.lock().node_store.len()
    }

    fn rank(&self, node: &LRUKNode, now: u64) -> Rank {
        match node.kth_entry(self.k) {
            Some(kth) => Rank::Finite(now - kth),
            None => Rank::Infinite(std::cmp::Reverse(node.last_entry())),
        }
    }
}

impl<ID: Eq + Hash + Copy> Replacer<ID> for LRUKReplacer<ID> {
    fn record_access(&self, entry_id: ID, access_type: AccessType) -> Result<(), ReplacerError> {
        let mut state = self.state.lock();
        let state = &mut *state;

        if !state.node_store.contains_key(&entry_id) {
            if state.node_store.len() == self.replacer_size {
                return Err(ReplacerError::CapacityExceeded(self.replacer_size));
            }
            state.node_store.insert(entry_id, LRUKNode::default());
        }

        if access_type == AccessType::Scan {
            return Ok(());
        }

        let timestamp = state.current_timestamp;
        state.current_timestamp += 1;

        if let Some(node) = state.node_store.get_mut(&entry_id) {
            node.push_timestamp(timestamp, self.k);
        }
        Ok(())
    }

    fn evict(&self) -> Option<ID> {
        let mut state = self.state.lock();
        if state.evictable_size == 0 {
            return None;
        }

        let now = state.current_timestamp;
        let victim = state
            .node_store
            .iter()
            .filter(|(_, node)| node.is_evictable)
            // First tracked wins ties between empty histories
            .min_by_key(|(_, node)| std::cmp::Reverse(self.rank(node, now)))
            .map(|(id, _)| *id)?;

        state.node_store.remove(&victim);
        state.evictable_size -= 1;
        Some(victim)
    }

    fn remove(&self, entry_id: ID) -> Result<(), ReplacerError> {
        let mut state = self.state.lock();

        match state.node_store.get(&entry_id) {
            None => Ok(()),
            Some(node) if !node.is_evictable => Err(ReplacerError::NotEvictable),
            Some(_) => {
                state.node_store.remove(&entry_id);
                state.evictable_size -= 1;
                Ok(())
            }
        }
    }

    fn set_evictable(&self, entry_id: ID, evictability: bool) -> Result<(), ReplacerError> {
        let mut state = self.state.lock();
        let state = &mut *state;

        if !state.node_store.contains_key(&entry_id) {
            if state.node_store.len() == self.replacer_size {
                return Err(ReplacerError::CapacityExceeded(self.replacer_size));
            }
            state.node_store.insert(entry_id, LRUKNode::default());
        }

        if let Some(node) = state.node_store.get_mut(&entry_id) {
            if node.is_evictable != evictability {
                match evictability {
                    true => state.evictable_size += 1,
                    false => state.evictable_size -= 1,
                }
                node.is_evictable = evictability;
            }
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().evictable_size
    }
}
