// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The snapshot/timestamp scheduler: after any edit to a targets role, snapshot and timestamp
//! must be bumped and re-signed so clients can detect the change. Idempotent -- calling this
//! twice with no intervening edit is a no-op, since `sync_snapshot_meta` finds nothing stale.

use crate::error::Result;
use crate::repo::MetadataRepository;
use log::debug;

/// Recomputes `snapshot.json`'s `meta` map from the repository's current targets trackers,
/// re-signs snapshot if anything changed, then points `timestamp.json` at the new snapshot and
/// re-signs it. Must be called after every edit to `targets` or a delegated targets role; a
/// no-op if snapshot already reflects the trackers.
pub fn cascade_after_edit(repo: &mut MetadataRepository) -> Result<()> {
    if !repo.sync_snapshot_meta() {
        debug!("scheduler: snapshot already reflects current targets state, skipping cascade");
        return Ok(());
    }

    repo.edit_snapshot()?;
    repo.sync_timestamp_meta();
    repo.edit_timestamp()
}
