//! Indexed binary min-heap of idle deadlines.
//!
//! Entries live in a dense array ordered by expiry, and an `id -> index` map
//! lets any entry be located in O(1) and repositioned in O(log n). Every
//! swap, insert and removal updates both structures together.
//!
//! Entries carry tagged data rather than closures: the reactor stores the
//! connection identity and re-resolves the connection when the timer fires.
//!
//! The manager is owned by the reactor thread and has no internal locking.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Key of a timer entry. The reactor uses the connection's fd.
pub type TimerId = RawFd;

#[derive(Debug, Clone)]
struct TimerNode<T> {
    id: TimerId,
    expiry: Instant,
    payload: T,
}

#[derive(Debug)]
pub struct TimerManager<T> {
    heap: Vec<TimerNode<T>>,
    index: HashMap<TimerId, usize>,
}

impl<T> TimerManager<T> {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Arm a timer for `id`, or refresh its expiry and payload if one exists.
    pub fn add(&mut self, id: TimerId, timeout: Duration, payload: T) {
        self.add_at(id, Instant::now() + timeout, payload);
    }

    pub fn add_at(&mut self, id: TimerId, expiry: Instant, payload: T) {
        if let Some(&i) = self.index.get(&id) {
            let node = &mut self.heap[i];
            node.expiry = expiry;
            node.payload = payload;
            // expiries normally move forward, so try down first
            if !self.sift_down(i, self.heap.len()) {
                self.sift_up(i);
            }
        } else {
            let i = self.heap.len();
            self.index.insert(id, i);
            self.heap.push(TimerNode { id, expiry, payload });
            self.sift_up(i);
        }
    }

    /// Push the expiry of `id` to `now + timeout`. Returns `false` when no
    /// timer is armed for `id`.
    pub fn update(&mut self, id: TimerId, timeout: Duration) -> bool {
        self.update_at(id, Instant::now() + timeout)
    }

    pub fn update_at(&mut self, id: TimerId, expiry: Instant) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        self.heap[i].expiry = expiry;
        if !self.sift_down(i, self.heap.len()) {
            self.sift_up(i);
        }
        true
    }

    /// Remove the timer for `id`, returning its payload.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let i = self.index.get(&id).copied()?;
        Some(self.remove_at(i).payload)
    }

    /// Fire every entry whose expiry is `<= now`, earliest first. Each entry
    /// is handed to `on_expire` and then removed.
    pub fn pop_expired<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(TimerId, T),
    {
        let mut fired = 0;
        while self.heap.first().is_some_and(|node| node.expiry <= now) {
            let node = self.remove_at(0);
            on_expire(node.id, node.payload);
            fired += 1;
        }
        fired
    }

    /// Time until the earliest expiry, or `None` when nothing is armed.
    /// An overdue entry reports zero.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.heap
            .first()
            .map(|node| node.expiry.saturating_duration_since(now))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn remove_at(&mut self, i: usize) -> TimerNode<T> {
        let node = self.heap.swap_remove(i);
        self.index.remove(&node.id);
        if i < self.heap.len() {
            self.index.insert(self.heap[i].id, i);
            if !self.sift_down(i, self.heap.len()) {
                self.sift_up(i);
            }
        }
        node
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expiry <= self.heap[i].expiry {
                break;
            }
            self.swap_nodes(i, parent);
            i = parent;
        }
    }

    /// Returns `true` if the node moved.
    fn sift_down(&mut self, start: usize, n: usize) -> bool {
        let mut i = start;
        let mut child = 2 * i + 1;
        while child < n {
            if child + 1 < n && self.heap[child + 1].expiry < self.heap[child].expiry {
                child += 1;
            }
            if self.heap[i].expiry <= self.heap[child].expiry {
                break;
            }
            self.swap_nodes(i, child);
            i = child;
            child = 2 * i + 1;
        }
        i > start
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.heap.len(), self.index.len());
        for (i, node) in self.heap.iter().enumerate() {
            assert_eq!(self.index.get(&node.id), Some(&i));
            if i > 0 {
                assert!(self.heap[(i - 1) / 2].expiry <= node.expiry);
            }
        }
    }
}

impl<T> Default for TimerManager<T> {
    fn default() -> Self {
        Self::new()
    }
}
