use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::worker::WorkerId;

/// A deadline queue over workers, keyed by a monotonic clock.
///
/// Each worker has at most one live entry. Inserting again moves the
/// worker's deadline; stale heap entries are skipped lazily via a
/// per-worker sequence counter, so neither insert nor cancel has to
/// search the heap.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    live: HashMap<WorkerId, u64>,
    next_seq: u64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    deadline: Instant,
    seq: u64,
    worker: WorkerId,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `worker` for `deadline`, replacing any earlier entry.
    pub fn insert(&mut self, worker: WorkerId, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(worker, seq);
        self.heap.push(Reverse(QueueEntry { deadline, seq, worker }));
    }

    pub fn cancel(&mut self, worker: WorkerId) {
        self.live.remove(&worker);
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.live.contains_key(&worker)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// All workers whose deadline is at or before `now`, in deadline order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<WorkerId> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.live.get(&head.worker) != Some(&head.seq) {
                self.heap.pop();
                continue;
            }
            if head.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry is gone").0;
            self.live.remove(&entry.worker);
            due.push(entry.worker);
        }
        due
    }

    /// The earliest live deadline, if any. Prunes stale heap entries on
    /// the way, which is why it needs `&mut self`.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.live.get(&head.worker) == Some(&head.seq) {
                return Some(head.deadline);
            }
            self.heap.pop();
        }
        None
    }
}

/// Allows one acquisition per window. Used at 10 Hz to keep refresh storms
/// from click events, device events and the control socket in check.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// The refresh pipelines all share this window.
    pub const REFRESH_WINDOW: Duration = Duration::from_millis(100);

    pub fn new(window: Duration) -> Self {
        RateLimiter { window, last: None }
    }

    /// True if the caller may proceed; false while the window is still open.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
