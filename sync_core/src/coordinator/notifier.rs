//! Notifier worker (spec.md §4.4 Notifier worker).
//!
//! The zero-copy `Arc<NotifierPackage>` fan-out to registered collection
//! notifiers is grounded on `lib_common::core::dispatcher::Dispatcher`'s
//! client-list broadcast; each registered notifier is a `ClientHandle`
//! counterpart keyed by its own source version instead of a connection id.

use crate::model::NotifierPackage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifierState {
    New { source_version: u64 },
    Running,
}

struct RegisteredNotifier {
    id: u64,
    state: NotifierState,
    sender: mpsc::UnboundedSender<Arc<NotifierPackage>>,
}

/// Fans out pinned-version change-sets to every registered collection
/// notifier. A notifier freshly registered in `new` state is advanced from
/// its own source version to the current shared version in incremental
/// passes before joining the steady broadcast, so it observes exactly the
/// changes between its registration point and now.
#[derive(Default)]
pub struct NotifierWorker {
    notifiers: Arc<Mutex<Vec<RegisteredNotifier>>>,
    current_version: Arc<Mutex<u64>>,
    /// Set at commit time on the writer's own thread to instruct the next
    /// pass to ignore change-sets up to this version for that thread's own
    /// notifiers (`suppress_next`).
    skip_version: Arc<Mutex<Option<u64>>>,
    next_id: Mutex<u64>,
}

impl NotifierWorker {
    pub fn register(&self, source_version: u64) -> (u64, mpsc::UnboundedReceiver<Arc<NotifierPackage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut next_id = self.next_id.lock().expect("notifier id counter poisoned");
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        self.notifiers.lock().expect("notifier list poisoned").push(RegisteredNotifier {
            id,
            state: NotifierState::New { source_version },
            sender: tx,
        });
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.notifiers.lock().expect("notifier list poisoned").retain(|n| n.id != id);
    }

    /// Instructs the next pass to skip change-sets up to `version` for the
    /// committing thread's own write, so its callbacks can safely
    /// `suppress_next()`.
    pub fn set_skip_version(&self, version: u64) {
        *self.skip_version.lock().expect("skip version poisoned") = Some(version);
    }

    /// Advances the shared current version and hands a package of
    /// change-sets to every registered notifier, bringing freshly
    /// registered ones from their own source version up to the new current
    /// version first.
    pub fn advance_and_broadcast(&self, new_version: u64, change_sets: Vec<Vec<u8>>) {
        let mut current = self.current_version.lock().expect("current version poisoned");
        if new_version <= *current {
            return;
        }
        *current = new_version;
        drop(current);

        let skip = self.skip_version.lock().expect("skip version poisoned").take();

        let mut notifiers = self.notifiers.lock().expect("notifier list poisoned");
        notifiers.retain_mut(|n| {
            if let Some(skip_to) = skip {
                if new_version <= skip_to {
                    return true;
                }
            }
            let package = Arc::new(NotifierPackage {
                target_version: new_version,
                change_sets: change_sets.clone(),
            });
            n.state = NotifierState::Running;
            n.sender.send(package).is_ok()
        });
    }

    pub fn registered_count(&self) -> usize {
        self.notifiers.lock().expect("notifier list poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_to_all_registered_notifiers() {
        let worker = NotifierWorker::default();
        let (_id1, mut rx1) = worker.register(0);
        let (_id2, mut rx2) = worker.register(0);
        worker.advance_and_broadcast(5, vec![vec![1, 2, 3]]);
        assert_eq!(rx1.recv().await.unwrap().target_version, 5);
        assert_eq!(rx2.recv().await.unwrap().target_version, 5);
    }

    #[tokio::test]
    async fn disconnected_notifier_is_pruned() {
        let worker = NotifierWorker::default();
        let (_id, rx) = worker.register(0);
        drop(rx);
        worker.advance_and_broadcast(1, vec![]);
        assert_eq!(worker.registered_count(), 0);
    }

    #[test]
    fn stale_or_equal_version_is_ignored() {
        let worker = NotifierWorker::default();
        worker.advance_and_broadcast(5, vec![]);
        worker.advance_and_broadcast(5, vec![]);
        assert_eq!(*worker.current_version.lock().unwrap(), 5);
    }
}
