//! In-memory priority queue with per-owner admission.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use dispatch::{Priority, WorkItemId};

/// Owner used for payloads that do not name one.
pub const DEFAULT_OWNER: &str = "default";

// ---------------------------------------------------------------------------
// QueueItem
// ---------------------------------------------------------------------------

/// One pending unit of work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub ticket: WorkItemId,
    pub owner: String,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    /// Insertion counter; breaks ties between identical timestamps.
    seq: u64,
}

// `BinaryHeap` is a max-heap: the "greatest" item is served first.
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .weight()
            .cmp(&other.priority.weight())
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueItem {}

// ---------------------------------------------------------------------------
// QueueStats
// ---------------------------------------------------------------------------

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total_pending: usize,
    pub total_running: usize,
    pub by_priority: BTreeMap<String, usize>,
    pub by_owner: BTreeMap<String, usize>,
    pub avg_wait: Duration,
    pub max_wait: Duration,
    pub max_wait_ticket: Option<WorkItemId>,
}

// ---------------------------------------------------------------------------
// FairQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FairQueue {
    heap: BinaryHeap<QueueItem>,
    running: HashMap<String, usize>,
    /// `0` disables the per-owner limit.
    max_per_owner: usize,
    next_seq: u64,
}

impl FairQueue {
    pub fn new(max_per_owner: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            running: HashMap::new(),
            max_per_owner,
            next_seq: 0,
        }
    }

    pub fn push(&mut self, ticket: WorkItemId, owner: impl Into<String>, priority: Priority) {
        self.push_at(ticket, owner, priority, Utc::now());
    }

    pub fn push_at(
        &mut self,
        ticket: WorkItemId,
        owner: impl Into<String>,
        priority: Priority,
        queued_at: DateTime<Utc>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueItem {
            ticket,
            owner: owner.into(),
            priority,
            queued_at,
            seq,
        });
    }

    fn has_capacity(&self, owner: &str) -> bool {
        self.max_per_owner == 0
            || self.running.get(owner).copied().unwrap_or(0) < self.max_per_owner
    }

    /// Pop the best item whose owner is below its limit and count it as
    /// running. Items of saturated owners stay queued.
    pub fn pop_eligible(&mut self) -> Option<QueueItem> {
        let mut held = Vec::new();
        let mut found = None;

        while let Some(item) = self.heap.pop() {
            if self.has_capacity(&item.owner) {
                found = Some(item);
                break;
            }
            debug!(
                owner = %item.owner,
                ticket = %item.ticket,
                "owner at concurrency limit; holding item"
            );
            held.push(item);
        }
        self.heap.extend(held);

        if let Some(item) = &found {
            *self.running.entry(item.owner.clone()).or_default() += 1;
        }
        found
    }

    /// Mark one running item of `owner` as finished.
    pub fn release(&mut self, owner: &str) {
        if let Some(count) = self.running.get_mut(owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.running.remove(owner);
            }
        }
    }

    /// Drop a still-pending item.
    pub fn remove(&mut self, ticket: &WorkItemId) -> Option<QueueItem> {
        let mut removed = None;
        self.heap.retain(|item| {
            if item.ticket == *ticket {
                removed = Some(item.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn running_for(&self, owner: &str) -> usize {
        self.running.get(owner).copied().unwrap_or(0)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let mut stats = QueueStats {
            total_pending: self.heap.len(),
            total_running: self.running.values().sum(),
            ..QueueStats::default()
        };

        let mut total_wait = Duration::ZERO;
        for item in self.heap.iter() {
            *stats.by_priority.entry(item.priority.to_string()).or_default() += 1;
            *stats.by_owner.entry(item.owner.clone()).or_default() += 1;

            let wait = (now - item.queued_at).to_std().unwrap_or_default();
            total_wait += wait;
            if stats.max_wait_ticket.is_none() || wait > stats.max_wait {
                stats.max_wait = wait;
                stats.max_wait_ticket = Some(item.ticket);
            }
        }

        if stats.total_pending > 0 {
            stats.avg_wait = total_wait / stats.total_pending as u32;
        }
        stats
    }
}
