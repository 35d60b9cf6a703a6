//! Per-changeset header validation and cursor bookkeeping (spec.md §4.3
//! Download integration, steps 1-2).

use crate::error::ClientProtocolError;
use crate::model::{Changeset, ClientFileIdent, SyncProgress};

/// Validates one inbound changeset's header against the running state.
/// `weak_server_version` relaxes the server-version check to weakly
/// increasing, used for flexible-sync bootstrap batches where changesets
/// at the same server version can span multiple records.
pub fn validate_changeset(
    changeset: &Changeset,
    self_ident: &ClientFileIdent,
    last_remote_version: u64,
    upload_bound: u64,
    weak_server_version: bool,
) -> Result<(), ClientProtocolError> {
    let strictly_ok = changeset.remote_version > last_remote_version;
    let weakly_ok = changeset.remote_version >= last_remote_version;
    if weak_server_version {
        if !weakly_ok {
            return Err(ClientProtocolError::BadServerVersion);
        }
    } else if !strictly_ok {
        return Err(ClientProtocolError::BadServerVersion);
    }

    if changeset.last_integrated_local_version > upload_bound {
        return Err(ClientProtocolError::BadClientVersion);
    }

    if changeset.origin_file_ident == self_ident.ident || changeset.origin_file_ident == 0 {
        return Err(ClientProtocolError::BadOriginFileIdent);
    }

    Ok(())
}

/// Advances the running `SyncProgress` to `next`, failing if any of the
/// seven monotonicity invariants (spec.md §3/§4.3) are violated.
pub fn advance(current: &mut SyncProgress, next: SyncProgress) -> Result<(), ClientProtocolError> {
    current
        .validate_advance(&next)
        .map_err(|v| ClientProtocolError::BadProgress(format!("{v:?}")))?;
    *current = next;
    Ok(())
}
