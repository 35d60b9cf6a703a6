//! Compensating write deferral (spec.md §4.3 Compensating writes).
//!
//! Compensating-write errors are deferred until the DOWNLOAD carrying the
//! rejecting server version arrives, then delivered alongside that batch.

use crate::error::CompensatingWriteError;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CompensatingWriteQueue {
    by_server_version: HashMap<u64, Vec<CompensatingWriteError>>,
}

impl CompensatingWriteQueue {
    pub fn defer(&mut self, error: CompensatingWriteError) {
        self.by_server_version
            .entry(error.server_version)
            .or_default()
            .push(error);
    }

    /// Drains and returns every deferred error whose server version is
    /// covered by a DOWNLOAD now integrated up to `integrated_server_version`.
    pub fn drain_up_to(&mut self, integrated_server_version: u64) -> Vec<CompensatingWriteError> {
        let ready_versions: Vec<u64> = self
            .by_server_version
            .keys()
            .copied()
            .filter(|v| *v <= integrated_server_version)
            .collect();
        let mut out = Vec::new();
        for v in ready_versions {
            if let Some(mut errors) = self.by_server_version.remove(&v) {
                out.append(&mut errors);
            }
        }
        out.sort_by_key(|e| e.server_version);
        out
    }
}
