//! Process-wide weak-cached coordinator registry, keyed by absolute
//! database path (spec.md §4.4 Responsibilities: "one Coordinator per
//! absolute database path; globally weak-cached").
//!
//! Grounded on `lib_common::core::registry::Registry`'s refcount +
//! CancellationToken linger pattern, generalized from a symbol string key
//! to a filesystem path and from "drop after linger" to "keep a strong
//! handle alive only while refcount > 0".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::RealmCoordinator;

struct Entry {
    coordinator: Arc<RealmCoordinator>,
    refcount: u32,
    linger_token: CancellationToken,
}

/// Global registry of open coordinators, one per path.
#[derive(Default)]
pub struct CoordinatorRegistry {
    entries: Arc<Mutex<HashMap<PathBuf, Entry>>>,
    linger: std::time::Duration,
}

impl CoordinatorRegistry {
    pub fn new(linger: std::time::Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            linger,
        }
    }

    /// Returns the coordinator for `path`, creating it via `make` on first
    /// use. Every call increments the refcount; pair with `release`.
    pub fn get_or_create(&self, path: PathBuf, make: impl FnOnce() -> RealmCoordinator) -> Arc<RealmCoordinator> {
        let mut entries = self.entries.lock().expect("coordinator registry poisoned");
        let entry = entries.entry(path).or_insert_with(|| Entry {
            coordinator: Arc::new(make()),
            refcount: 0,
            linger_token: CancellationToken::new(),
        });
        entry.refcount += 1;
        if entry.refcount == 1 {
            entry.linger_token.cancel();
            entry.linger_token = CancellationToken::new();
        }
        Arc::clone(&entry.coordinator)
    }

    /// Releases one reference. When the last reference drops, the
    /// coordinator is kept alive for `linger` before eviction, in case a
    /// new caller reopens the same path shortly after (avoids thrashing
    /// the schema cache and notifier thread on rapid open/close).
    pub fn release(&self, path: &std::path::Path) {
        let mut entries = self.entries.lock().expect("coordinator registry poisoned");
        if let Some(entry) = entries.get_mut(path) {
            if entry.refcount > 0 {
                entry.refcount -= 1;
            }
            if entry.refcount == 0 {
                let token = entry.linger_token.clone();
                let path = path.to_path_buf();
                let entries_handle = Arc::clone(&self.entries);
                let linger = self.linger;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = sleep(linger) => {
                            let mut lock = entries_handle.lock().expect("coordinator registry poisoned");
                            if let Some(e) = lock.get(&path) {
                                if e.refcount == 0 {
                                    lock.remove(&path);
                                }
                            }
                        }
                    }
                });
            }
        }
    }

    pub fn is_open(&self, path: &std::path::Path) -> bool {
        self.entries.lock().expect("coordinator registry poisoned").contains_key(path)
    }
}
