//! Flexible-sync query bootstrap buffering (spec.md §4.3 step 3).
//!
//! A bootstrap batch is never applied until its `LastInBatch` record has
//! been stored; the in-progress batch is mirrored to an on-disk sidecar
//! file after every append so a partial batch survives a process crash, and
//! `PendingBootstrapStore::recover` discards it (rather than resuming a
//! batch that can no longer be trusted) when the `LastInBatch` record never
//! arrived.

use crate::model::{BatchState, Changeset, PendingBootstrap, SyncProgress};
use std::path::{Path, PathBuf};

/// Sidecar file path for one realm's pending bootstrap, next to the realm
/// file itself (the same sibling-file idiom as `EngineConfig::fresh_copy_path`).
pub fn sidecar_path_for(realm_path: &Path) -> PathBuf {
    let mut name = realm_path.as_os_str().to_os_string();
    name.push(".bootstrap.json");
    PathBuf::from(name)
}

#[derive(Debug, Default)]
pub struct PendingBootstrapStore {
    current: Option<PendingBootstrap>,
    sidecar_path: Option<PathBuf>,
}

impl PendingBootstrapStore {
    /// An on-disk-backed store; every completed append persists the batch
    /// so far to `sidecar_path`, and `recover` reads it back after a restart.
    pub fn new(sidecar_path: PathBuf) -> Self {
        Self { current: None, sidecar_path: Some(sidecar_path) }
    }

    /// Buffers one DOWNLOAD's changesets under `query_version`. Returns the
    /// completed bootstrap once `LastInBatch` has been appended, draining
    /// the store.
    pub fn append(
        &mut self,
        query_version: u64,
        batch_state: BatchState,
        changesets: Vec<Changeset>,
        final_progress: SyncProgress,
    ) -> Option<PendingBootstrap> {
        let entry = self.current.get_or_insert_with(|| PendingBootstrap {
            query_version,
            ..Default::default()
        });
        debug_assert_eq!(entry.query_version, query_version);
        entry.changesets.extend(changesets);
        entry.final_progress = Some(final_progress);

        if matches!(batch_state, BatchState::LastInBatch) {
            entry.last_in_batch_received = true;
            let completed = self.current.take();
            self.clear_sidecar();
            completed
        } else {
            self.persist();
            None
        }
    }

    /// Loads whatever batch is on disk from a previous run and discards it
    /// unless it was already marked `LastInBatch` (which `append` would have
    /// drained before persisting again, so in practice this always discards).
    pub fn recover(&mut self) {
        if let Some(path) = self.sidecar_path.clone() {
            self.current = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<PendingBootstrap>(&raw).ok());
            let complete = self.current.as_ref().map(|e| e.last_in_batch_received).unwrap_or(false);
            if !complete {
                self.current = None;
                let _ = std::fs::remove_file(&path);
            }
            return;
        }
        if let Some(entry) = &self.current {
            if !entry.last_in_batch_received {
                self.current = None;
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.current.is_some()
    }

    fn persist(&self) {
        let (Some(path), Some(entry)) = (&self.sidecar_path, &self.current) else { return };
        if let Ok(json) = serde_json::to_string(entry) {
            let _ = std::fs::write(path, json);
        }
    }

    fn clear_sidecar(&self) {
        if let Some(path) = &self.sidecar_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Splits a completed bootstrap's changesets into chunks no larger than
/// `chunk_bytes`, applied atomically one chunk at a time.
pub fn chunk_for_apply(bootstrap: &PendingBootstrap, chunk_bytes: u64) -> Vec<Vec<Changeset>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size: u64 = 0;

    for cs in &bootstrap.changesets {
        let size = cs.payload.len() as u64;
        if current_size + size > chunk_bytes && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(cs.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(bytes: usize) -> Changeset {
        Changeset {
            remote_version: 1,
            last_integrated_local_version: 0,
            origin_file_ident: 2,
            origin_timestamp: 0,
            payload: vec![0u8; bytes],
        }
    }

    #[test]
    fn buffers_until_last_in_batch() {
        let mut store = PendingBootstrapStore::default();
        assert!(store
            .append(1, BatchState::MoreToCome, vec![cs(10)], SyncProgress::default())
            .is_none());
        assert!(store.has_pending());
        let done = store.append(1, BatchState::LastInBatch, vec![cs(10)], SyncProgress::default());
        assert!(done.is_some());
        assert!(!store.has_pending());
        assert_eq!(done.unwrap().changesets.len(), 2);
    }

    #[test]
    fn recover_discards_incomplete_batch() {
        let mut store = PendingBootstrapStore::default();
        store.append(1, BatchState::MoreToCome, vec![cs(10)], SyncProgress::default());
        store.recover();
        assert!(!store.has_pending());
    }

    #[test]
    fn partial_batch_survives_a_simulated_process_restart_then_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("default.realm.bootstrap.json");

        {
            let mut store = PendingBootstrapStore::new(sidecar.clone());
            store.append(7, BatchState::MoreToCome, vec![cs(10)], SyncProgress::default());
            assert!(sidecar.exists());
            // `store` is dropped here, simulating the process exiting mid-batch;
            // the sidecar file is the only surviving record of the partial batch.
        }

        let mut recovered = PendingBootstrapStore::new(sidecar.clone());
        assert!(!recovered.has_pending());
        recovered.recover();
        // The batch was never completed with LastInBatch, so it's discarded
        // rather than resumed, and its sidecar file is cleaned up.
        assert!(!recovered.has_pending());
        assert!(!sidecar.exists());
    }

    #[test]
    fn completed_batch_clears_its_sidecar_file() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("default.realm.bootstrap.json");
        let mut store = PendingBootstrapStore::new(sidecar.clone());
        store.append(7, BatchState::MoreToCome, vec![cs(10)], SyncProgress::default());
        assert!(sidecar.exists());
        let done = store.append(7, BatchState::LastInBatch, vec![cs(10)], SyncProgress::default());
        assert!(done.is_some());
        assert!(!sidecar.exists());
    }

    #[test]
    fn chunking_respects_byte_cap() {
        let bootstrap = PendingBootstrap {
            query_version: 1,
            changesets: vec![cs(50), cs(50), cs(50)],
            final_progress: None,
            last_in_batch_received: true,
        };
        let chunks = chunk_for_apply(&bootstrap, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
    }
}
