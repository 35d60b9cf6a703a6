//! Async write/commit queue (spec.md §4.4 Write serialization & async
//! commits).
//!
//! The single-writer-many-readers queue, guarded by one mutex granting
//! exclusive access to whichever task currently holds the write slot,
//! follows the `RwLock<OperationMode>`-guarded single-owner state in
//! `lib_common::core::upstream_manager::UpstreamManager`, generalized from
//! one shared mode value to a FIFO of pending writers.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cap on how many grouped (buffer-cache-only) commits may be chained
/// before a disk sync is forced, per the design note's "≈20".
pub const MAX_GROUPED_COMMITS: u32 = 20;

pub struct QueuedWrite {
    pub handle: u64,
    pub notify_only: bool,
}

pub struct QueuedCommit {
    pub handle: u64,
    pub allow_grouping: bool,
}

/// Serializes write access to one database and tracks how many grouped
/// (not-yet-synced) commits have been chained since the last disk flush.
pub struct WriteQueue {
    mutex: Arc<Mutex<()>>,
    pending_writers: VecDeque<QueuedWrite>,
    pending_commits: VecDeque<QueuedCommit>,
    grouped_since_flush: u32,
    next_handle: u64,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            pending_writers: VecDeque::new(),
            pending_commits: VecDeque::new(),
            grouped_since_flush: 0,
            next_handle: 1,
        }
    }
}

impl WriteQueue {
    /// Enqueues an asynchronous write request and returns its opaque
    /// handle. If no writer currently holds the mutex, the caller should
    /// request it (`acquire_write_mutex`) right away.
    pub fn enqueue_write(&mut self, notify_only: bool) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.pending_writers.push_back(QueuedWrite { handle, notify_only });
        handle
    }

    pub fn enqueue_commit(&mut self, allow_grouping: bool) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.pending_commits.push_back(QueuedCommit { handle, allow_grouping });
        handle
    }

    /// Returns an owned clone of the write mutex, so a caller can await the
    /// lock without holding any borrow on the queue itself.
    pub fn write_mutex(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.mutex)
    }

    pub fn next_writer(&mut self) -> Option<QueuedWrite> {
        self.pending_writers.pop_front()
    }

    /// Whether the next queued commit should be grouped (chained into the
    /// in-progress buffer-cache transaction) rather than forcing a disk
    /// sync now.
    pub fn should_group(&self, allow_grouping: bool) -> bool {
        allow_grouping && self.grouped_since_flush < MAX_GROUPED_COMMITS && !self.pending_commits.is_empty()
    }

    pub fn record_grouped_commit(&mut self) {
        self.grouped_since_flush += 1;
    }

    /// Records a full disk-sync flush, draining every pending commit and
    /// resetting the grouping counter. Returns the handles whose
    /// completion callbacks should now fire.
    pub fn flush(&mut self) -> Vec<u64> {
        self.grouped_since_flush = 0;
        self.pending_commits.drain(..).map(|c| c.handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_assigns_monotonic_handles() {
        let mut q = WriteQueue::default();
        let a = q.enqueue_write(false);
        let b = q.enqueue_write(true);
        assert!(b > a);
    }

    #[test]
    fn grouping_stops_at_cap() {
        let mut q = WriteQueue::default();
        q.enqueue_commit(true);
        for _ in 0..MAX_GROUPED_COMMITS {
            q.record_grouped_commit();
        }
        assert!(!q.should_group(true));
    }

    #[test]
    fn flush_drains_pending_commits_and_resets_counter() {
        let mut q = WriteQueue::default();
        q.enqueue_commit(true);
        q.enqueue_commit(true);
        q.record_grouped_commit();
        let handles = q.flush();
        assert_eq!(handles.len(), 2);
        assert_eq!(q.grouped_since_flush, 0);
    }

    #[tokio::test]
    async fn write_mutex_serializes_access() {
        let q = WriteQueue::default();
        let guard = q.write_mutex().lock_owned().await;
        drop(guard);
        let _guard2 = q.write_mutex().lock_owned().await;
    }
}
