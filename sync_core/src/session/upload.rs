//! Upload selection (spec.md §4.3 Upload selection).

use crate::model::UploadChangeset;

/// One outbound UPLOAD message body.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub progress_client_version: u64,
    pub progress_server_version: u64,
    pub locked_server_version: u64,
    pub changesets: Vec<UploadChangeset>,
}

/// Selects changesets strictly after `from_client_version` up to
/// `upload_target_version`, lowering the cap to `next_query_snapshot` when a
/// flexible-sync subscription change is pending, to keep QUERY ordered with
/// respect to UPLOAD.
pub fn select_for_upload(
    history: &[UploadChangeset],
    from_client_version: u64,
    upload_target_version: u64,
    next_query_snapshot: Option<u64>,
) -> Vec<UploadChangeset> {
    let cap = match next_query_snapshot {
        Some(snapshot) => upload_target_version.min(snapshot),
        None => upload_target_version,
    };
    history
        .iter()
        .filter(|cs| cs.client_version > from_client_version && cs.client_version <= cap)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changeset(v: u64) -> UploadChangeset {
        UploadChangeset {
            client_version: v,
            last_integrated_server_version: 0,
            origin_timestamp: 0,
            origin_file_ident: 1,
            payload: vec![],
        }
    }

    #[test]
    fn selects_strictly_after_bound() {
        let history: Vec<_> = (1..=5).map(changeset).collect();
        let selected = select_for_upload(&history, 2, 10, None);
        let versions: Vec<_> = selected.iter().map(|c| c.client_version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[test]
    fn caps_at_pending_query_snapshot() {
        let history: Vec<_> = (1..=5).map(changeset).collect();
        let selected = select_for_upload(&history, 0, 10, Some(3));
        let versions: Vec<_> = selected.iter().map(|c| c.client_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }
}
