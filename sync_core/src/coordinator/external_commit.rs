//! External commit helper (spec.md §4.4 External commit helper).
//!
//! An out-of-band mechanism by which a writer in another process wakes
//! readers in this process once a new snapshot exists. In-process delivery
//! uses `tokio::sync::Notify`; a cross-process transport (named pipe or
//! platform equivalent) is an open question, recorded in the design notes.

use std::sync::Arc;
use tokio::sync::Notify;

/// Receives wake-ups and triggers the notifier worker's next pass.
#[derive(Clone, Default)]
pub struct ExternalCommitHelper {
    notify: Arc<Notify>,
}

impl ExternalCommitHelper {
    /// Called by a writer (in this process or, in a full deployment, via
    /// the cross-process transport) after a commit lands.
    pub fn notify_new_snapshot(&self) {
        self.notify.notify_waiters();
    }

    /// Awaits the next wake-up; the notifier worker's background task
    /// loops on this between its own polling passes.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
