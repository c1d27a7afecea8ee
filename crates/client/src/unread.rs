//! Unread-count reconciliation.
//!
//! Two provenances compete for a thread's unread count: REST snapshots from
//! a full thread-list fetch, and push events from either socket. The two
//! race freely (no cross-socket ordering), so a push record overrides a
//! snapshot only within a bounded freshness window; after that the snapshot
//! is trusted again. Pushes for threads that have not been fetched yet are
//! buffered until the thread materializes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use intrachat_shared::Thread;

#[derive(Debug, Clone, Copy)]
struct PushRecord {
    count: u32,
    at: Instant,
}

#[derive(Debug)]
pub struct UnreadReconciler {
    window: Duration,
    /// Last push-sourced count per thread, last-write-wins.
    push: HashMap<String, PushRecord>,
    /// Counts for threads not yet present in the canonical set.
    pending: HashMap<String, u32>,
}

impl UnreadReconciler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            push: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn fresh(&self, record: &PushRecord, now: Instant) -> bool {
        now.duration_since(record.at) < self.window
    }

    /// Stamp a push-sourced count with the current time.
    pub fn record_push(&mut self, thread_id: &str, count: u32) {
        self.record_push_at(thread_id, count, Instant::now());
    }

    pub(crate) fn record_push_at(&mut self, thread_id: &str, count: u32, now: Instant) {
        self.push
            .insert(thread_id.to_string(), PushRecord { count, at: now });
    }

    /// Buffer a count for a thread that is not in the canonical set yet.
    pub fn buffer_pending(&mut self, thread_id: &str, count: u32) {
        self.pending.insert(thread_id.to_string(), count);
    }

    pub fn has_pending(&self, thread_id: &str) -> bool {
        self.pending.contains_key(thread_id)
    }

    /// Merge a REST snapshot into the given threads in place: an in-window
    /// push record overrides the snapshot's count, else a buffered pending
    /// count, else the snapshot value stands. Consumed pending entries and
    /// expired push records are purged afterwards.
    pub fn apply_rest_snapshot(&mut self, threads: &mut [Thread]) {
        self.apply_rest_snapshot_at(threads, Instant::now());
    }

    pub(crate) fn apply_rest_snapshot_at(&mut self, threads: &mut [Thread], now: Instant) {
        for thread in threads.iter_mut() {
            if let Some(record) = self.push.get(&thread.id) {
                if self.fresh(record, now) {
                    thread.unread_count = record.count;
                    continue;
                }
            }
            if let Some(count) = self.pending.get(&thread.id) {
                thread.unread_count = *count;
            }
        }

        for thread in threads.iter() {
            self.pending.remove(&thread.id);
        }
        let window = self.window;
        self.push
            .retain(|_, record| now.duration_since(record.at) < window);
    }

    /// Total unread across everything known: per materialized thread the
    /// fresher of {in-window push, stored value}, plus buffered pending
    /// counts, plus in-window push records for threads that are neither
    /// materialized nor pending. Pushes can legitimately arrive before the
    /// owning thread's metadata has been fetched.
    pub fn total(&self, threads: &[Thread]) -> u64 {
        self.total_at(threads, Instant::now())
    }

    pub(crate) fn total_at(&self, threads: &[Thread], now: Instant) -> u64 {
        let mut total: u64 = 0;

        for thread in threads {
            match self.push.get(&thread.id) {
                Some(record) if self.fresh(record, now) => total += u64::from(record.count),
                _ => total += u64::from(thread.unread_count),
            }
        }

        for (thread_id, count) in &self.pending {
            if !threads.iter().any(|t| &t.id == thread_id) {
                total += u64::from(*count);
            }
        }

        for (thread_id, record) in &self.push {
            if self.fresh(record, now)
                && !threads.iter().any(|t| &t.id == thread_id)
                && !self.pending.contains_key(thread_id)
            {
                total += u64::from(record.count);
            }
        }

        total
    }
}
