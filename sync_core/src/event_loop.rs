//! The network event loop (spec.md §5 Scheduling model, tier 1).
//!
//! All Connection and Session state is read and mutated only on this
//! single cooperative task. Every external call into that machinery is
//! "post this closure to the event loop"; the closure observes whatever
//! state exists when it actually runs and no-ops if the target has since
//! been finalized — callers never assume synchronous effect.

use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle to post closures onto the event loop from any thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    jobs: mpsc::UnboundedSender<Job>,
}

impl EventLoopHandle {
    /// Posts `job` to run on the event loop. Never blocks; if the loop has
    /// already shut down the job is simply dropped, matching "no-ops if the
    /// session has been finalized".
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.jobs.send(Box::new(job));
    }
}

/// Owns and drives the event loop task. Every posted closure runs to
/// completion before the next is started — there is no interleaving.
pub struct EventLoop {
    jobs: mpsc::UnboundedReceiver<Job>,
}

impl EventLoop {
    pub fn new() -> (EventLoopHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventLoopHandle { jobs: tx }, EventLoop { jobs: rx })
    }

    /// Runs until every handle has been dropped and the queue drains.
    pub async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            job();
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn posted_jobs_run_in_order() {
        let (handle, loop_) = EventLoop::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            handle.post(move || order.lock().unwrap().push(i));
        }
        drop(handle);
        loop_.run().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropped_loop_silently_discards_jobs() {
        let (handle, loop_) = EventLoop::new();
        drop(loop_);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        handle.post(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
