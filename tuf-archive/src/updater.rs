// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The historical updater: replays every commit between a local authentication repository's
//! last-validated commit and a remote's head, treating each commit as a distinct TUF snapshot.
//! Unlike a live TUF refresh, which fetches only the latest metadata, this walks forward through
//! history one commit at a time so that metadata which was deliberately expired at some earlier
//! point in time is never rejected for it -- see [`crate::clock`].

use crate::clock::{Clock, HistoricalClock};
use crate::datastore::Datastore;
use crate::error::{self, Result};
use crate::git::{CommitId, GitStore};
use crate::schema::{Role, Root, RoleType, Signed, Snapshot, Targets, Timestamp};
use log::{debug, info};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const METADATA_DIR: &str = "metadata";
const LAST_VALIDATED_FILE: &str = "last_validated_commit.json";

/// The trust anchor carried forward as the updater walks through history. Each successfully
/// verified commit replaces some subset of these fields.
struct TrustedSet {
    root: Signed<Root>,
    timestamp: Signed<Timestamp>,
    snapshot: Signed<Snapshot>,
    targets: Signed<Targets>,
}

/// Replays an authentication repository's commit history against a remote, verifying TUF
/// metadata at every commit in between. Never fast-forwards the local working repository until
/// every intermediate commit has validated.
#[derive(Debug)]
pub struct HistoricalUpdater {
    local: GitStore,
    state: Datastore,
    clock: Box<dyn Clock>,
}

impl HistoricalUpdater {
    /// Opens the local authentication repository at `local_path`. `state_dir` holds the
    /// out-of-band `last_validated_commit` cursor, independent of the git object store.
    pub fn new(local_path: impl AsRef<Path>, state_dir: impl AsRef<Path>) -> Result<Self> {
        let local = GitStore::open(local_path)?;
        let state = Datastore::new(Some(state_dir.as_ref().to_path_buf()))?;
        Ok(Self {
            local,
            state,
            clock: Box::new(HistoricalClock),
        })
    }

    /// Overrides the clock used for expiration checks. The historical replay algorithm always
    /// uses [`HistoricalClock`] by default; this exists so the same trusted-set machinery can
    /// also serve a live caller who wants real expiration enforcement against a single commit.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn last_validated_commit(&self) -> Result<Option<CommitId>> {
        match self.state.reader(LAST_VALIDATED_FILE)? {
            None => Ok(None),
            Some(reader) => {
                let id: String = serde_json::from_reader(reader).context(error::FileParseJsonSnafu {
                    path: PathBuf::from(LAST_VALIDATED_FILE),
                })?;
                Ok(Some(CommitId(id)))
            }
        }
    }

    fn set_last_validated_commit(&self, commit: &CommitId) -> Result<()> {
        self.state.create(LAST_VALIDATED_FILE, &commit.0)
    }

    /// Runs the replay algorithm against `remote_url`, using `clone_dir` as scratch space for a
    /// read-only bare clone. Returns the commit the local repository was fast-forwarded to.
    pub fn refresh(&mut self, remote_url: &str, clone_dir: impl AsRef<Path>) -> Result<CommitId> {
        let remote = GitStore::bare_clone(remote_url, clone_dir.as_ref())?;
        let remote_head = remote.head_commit()?;

        let anchor = match self.last_validated_commit()? {
            Some(commit) => commit,
            None => {
                let history = remote.list_commits(None, &remote_head)?;
                history
                    .into_iter()
                    .next()
                    .context(error::CommitNotFoundSnafu {
                        commit: remote_head.to_string(),
                    })?
            }
        };

        ensure!(
            remote.is_ancestor(&anchor, &remote_head)?,
            error::ForcePushDetectedSnafu {
                local: anchor.to_string(),
                remote: remote_head.to_string(),
            }
        );

        let mut pending = vec![anchor.clone()];
        pending.extend(remote.list_commits(Some(&anchor), &remote_head)?);

        if pending.len() == 1 {
            info!("already up to date at commit {anchor}");
            return Ok(anchor);
        }

        let mut trusted = self.seed_trust(&remote, &anchor)?;
        let mut cursors: HashMap<String, usize> = HashMap::new();
        cursors.insert("root.json".to_string(), 0);
        cursors.insert("timestamp.json".to_string(), 0);
        cursors.insert("snapshot.json".to_string(), 0);
        cursors.insert("targets.json".to_string(), 0);
        for name in trusted.targets.signed.role_names() {
            cursors.insert(format!("{name}.json"), 0);
        }

        for (index, commit) in pending.iter().enumerate().skip(1) {
            let root_advanced = self.advance_root(&remote, commit, &mut trusted)?;
            if root_advanced {
                *cursors.get_mut("root.json").expect("seeded above") = index;
            }

            let timestamp_advanced = self.advance_timestamp(&remote, commit, &mut trusted)?;
            if timestamp_advanced {
                *cursors.get_mut("timestamp.json").expect("seeded above") = index;
            }

            let snapshot_advanced = self.advance_snapshot(&remote, commit, &mut trusted)?;
            if snapshot_advanced {
                *cursors.get_mut("snapshot.json").expect("seeded above") = index;
            }

            self.advance_targets(&remote, commit, &mut trusted, &mut cursors, index)?;
        }

        debug!(
            "historical replay reached commit {} ({} commits validated)",
            remote_head,
            pending.len() - 1
        );

        self.set_last_validated_commit(&remote_head)?;
        self.local.fetch(remote.path().to_str().unwrap_or_default(), true)?;
        self.local.reset_hard(&remote_head)?;
        self.local.clean_untracked()?;
        Ok(remote_head)
    }

    /// Rejects `signed` if its `expires` field is in the past relative to `self.clock`. The
    /// default [`HistoricalClock`] is fixed at the minimum representable instant, so this never
    /// fires during a historical replay; a caller that swaps in a wall-clock implementation gets
    /// real expiration enforcement from the same code path.
    fn check_not_expired<T: Role>(&self, signed: &Signed<T>, commit: &CommitId, file: &str) -> Result<()> {
        let expires = signed.signed.expires();
        if expires < self.clock.reference_time() {
            return Err(error::Error::InvalidMetadataAt {
                commit: commit.to_string(),
                file: file.to_string(),
                reason: format!("expired at {expires}"),
            });
        }
        Ok(())
    }

    /// Loads root, timestamp, snapshot, and top-level targets as they existed at `anchor`,
    /// trusting them as the initial anchor (the commit the caller has already authenticated
    /// out of band).
    fn seed_trust(&self, remote: &GitStore, anchor: &CommitId) -> Result<TrustedSet> {
        let root: Signed<Root> = read_metadata(remote, anchor, "root.json")?;
        root.signed.verify(RoleType::Root, &root)?;
        self.check_not_expired(&root, anchor, "root.json")?;

        let timestamp: Signed<Timestamp> = read_metadata(remote, anchor, "timestamp.json")?;
        root.signed.verify(RoleType::Timestamp, &timestamp)?;
        self.check_not_expired(&timestamp, anchor, "timestamp.json")?;

        let snapshot: Signed<Snapshot> = read_metadata(remote, anchor, "snapshot.json")?;
        root.signed.verify(RoleType::Snapshot, &snapshot)?;
        self.check_not_expired(&snapshot, anchor, "snapshot.json")?;

        let targets: Signed<Targets> = read_metadata(remote, anchor, "targets.json")?;
        root.signed.verify(RoleType::Targets, &targets)?;
        self.check_not_expired(&targets, anchor, "targets.json")?;

        Ok(TrustedSet { root, timestamp, snapshot, targets })
    }

    /// If `commit` carries a `root.json` (or a `<version>.root.json`) one version ahead of the
    /// trusted root, verifies the rotation is authorized by both the old and new root's key sets
    /// and advances `trusted.root`. A root unchanged since the last trusted commit is a no-op.
    fn advance_root(&self, remote: &GitStore, commit: &CommitId, trusted: &mut TrustedSet) -> Result<bool> {
        let candidate: Signed<Root> = read_metadata(remote, commit, "root.json")?;

        let from = trusted.root.signed.version.get();
        let to = candidate.signed.version.get();
        if to == from {
            return Ok(false);
        }
        ensure!(
            to == from + 1,
            error::RollbackAttackSnafu {
                role: RoleType::Root,
                found: to,
                trusted: from,
                commit: commit.to_string(),
            }
        );

        trusted
            .root
            .signed
            .verify(RoleType::Root, &candidate)
            .map_err(|source| error::Error::RootRotation { from, to, source })?;
        candidate
            .signed
            .verify(RoleType::Root, &candidate)
            .map_err(|source| error::Error::RootRotation { from, to, source })?;
        self.check_not_expired(&candidate, commit, "root.json")?;

        debug!("root rotated {from} -> {to} at commit {commit}");
        trusted.root = candidate;
        Ok(true)
    }

    /// Fetches timestamp at `commit` and, if its version is newer than trusted, verifies and
    /// adopts it. Returns whether the trusted timestamp advanced.
    fn advance_timestamp(&self, remote: &GitStore, commit: &CommitId, trusted: &mut TrustedSet) -> Result<bool> {
        let candidate: Signed<Timestamp> = read_metadata(remote, commit, "timestamp.json")?;
        let from = trusted.timestamp.signed.version.get();
        let to = candidate.signed.version.get();
        if to == from {
            return Ok(false);
        }
        ensure!(
            to > from,
            error::RollbackAttackSnafu {
                role: RoleType::Timestamp,
                found: to,
                trusted: from,
                commit: commit.to_string(),
            }
        );
        trusted.root.signed.verify(RoleType::Timestamp, &candidate)?;
        self.check_not_expired(&candidate, commit, "timestamp.json")?;
        trusted.timestamp = candidate;
        Ok(true)
    }

    /// If trusted timestamp's `snapshot.json` entry names a version newer than trusted snapshot,
    /// fetches and verifies it. Returns whether the trusted snapshot advanced.
    fn advance_snapshot(&self, remote: &GitStore, commit: &CommitId, trusted: &mut TrustedSet) -> Result<bool> {
        let Some(meta) = trusted.timestamp.signed.meta.get("snapshot.json") else {
            return Ok(false);
        };
        if meta.version == trusted.snapshot.signed.version {
            return Ok(false);
        }

        let candidate: Signed<Snapshot> =
            read_metadata_checked(remote, commit, "snapshot.json", &meta.hashes.sha256)?;
        ensure!(
            candidate.signed.version == meta.version,
            error::SnapshotMismatchSnafu {
                name: "snapshot.json".to_string(),
                snapshot_version: meta.version.get(),
                loaded_version: candidate.signed.version.get(),
            }
        );
        trusted.root.signed.verify(RoleType::Snapshot, &candidate)?;
        self.check_not_expired(&candidate, commit, "snapshot.json")?;
        trusted.snapshot = candidate;
        Ok(true)
    }

    /// Fetches top-level targets and any delegated targets role whose recorded version in the
    /// (now-trusted) snapshot is newer than what's currently loaded, verifying each against its
    /// owning role's key set.
    fn advance_targets(
        &self,
        remote: &GitStore,
        commit: &CommitId,
        trusted: &mut TrustedSet,
        cursors: &mut HashMap<String, usize>,
        index: usize,
    ) -> Result<()> {
        if let Some(meta) = trusted.snapshot.signed.meta.get("targets.json") {
            if meta.version != trusted.targets.signed.version {
                let candidate: Signed<Targets> = match &meta.hashes {
                    Some(hashes) => {
                        read_metadata_checked(remote, commit, "targets.json", &hashes.sha256)?
                    }
                    None => read_metadata(remote, commit, "targets.json")?,
                };
                ensure!(
                    candidate.signed.version == meta.version,
                    error::SnapshotMismatchSnafu {
                        name: "targets.json".to_string(),
                        snapshot_version: meta.version.get(),
                        loaded_version: candidate.signed.version.get(),
                    }
                );
                trusted.root.signed.verify(RoleType::Targets, &candidate)?;
                self.check_not_expired(&candidate, commit, "targets.json")?;

                // Deserializing a fresh targets.json always has `DelegatedRole::targets == None`
                // (that field is `#[serde(skip)]`); carry forward whatever was already loaded for
                // any delegated role the new tree still lists, so it isn't re-fetched here only to
                // be dropped again.
                let previously_loaded = collect_loaded_delegated(&trusted.targets.signed);
                trusted.targets = candidate;
                for (name, signed) in previously_loaded {
                    if let Ok(role) = trusted.targets.signed.get_delegated_role_by_name(&name) {
                        if role.targets.is_none() {
                            role.targets = Some(signed);
                        }
                    }
                }
                *cursors.get_mut("targets.json").expect("seeded above") = index;
            }
        }

        let delegated_names: Vec<String> = trusted
            .targets
            .signed
            .role_names()
            .into_iter()
            .cloned()
            .collect();

        for name in delegated_names {
            let file = format!("{name}.json");
            let recorded_version = trusted.snapshot.signed.meta.get(&file).map(|m| m.version);
            let Some(recorded_version) = recorded_version else {
                continue;
            };

            let currently_loaded = trusted
                .targets
                .signed
                .get_delegated_role_by_name(&name)
                .ok()
                .and_then(|role| role.targets.as_ref())
                .map(|t| t.signed.version);
            if currently_loaded == Some(recorded_version) {
                continue;
            }

            let candidate: Signed<Targets> = read_metadata(remote, commit, &file)?;
            ensure!(
                candidate.signed.version == recorded_version,
                error::SnapshotMismatchSnafu {
                    name: file.clone(),
                    snapshot_version: recorded_version.get(),
                    loaded_version: candidate.signed.version.get(),
                }
            );

            let delegations = trusted
                .targets
                .signed
                .parent_of(&name)
                .map_err(|_| error::Error::DelegateNotFound { name: name.clone() })?
                .clone();
            delegations.verify(&name, &candidate)?;
            self.check_not_expired(&candidate, commit, &file)?;

            let role = trusted.targets.signed.get_delegated_role_by_name(&name)?;
            role.targets = Some(candidate);
            cursors.insert(file, index);
        }

        Ok(())
    }
}

/// Recursively collects every delegated role's already-loaded `Signed<Targets>`, by name.
fn collect_loaded_delegated(targets: &Targets) -> HashMap<String, Signed<Targets>> {
    let mut out = HashMap::new();
    let Some(delegations) = &targets.delegations else {
        return out;
    };
    for role in &delegations.roles {
        if let Some(signed) = &role.targets {
            out.extend(collect_loaded_delegated(&signed.signed));
            out.insert(role.name.clone(), signed.clone());
        }
    }
    out
}

fn read_metadata<T: serde::de::DeserializeOwned>(
    remote: &GitStore,
    commit: &CommitId,
    file: &str,
) -> Result<Signed<T>> {
    let bytes = read_metadata_bytes(remote, commit, file, None)?;
    serde_json::from_slice(&bytes).map_err(|source| {
        error::Error::InvalidMetadataAt {
            commit: commit.to_string(),
            file: file.to_string(),
            reason: source.to_string(),
        }
    })
}

/// As [`read_metadata`], but also checks the file's content against `expected_sha256`, the hash
/// its parent role recorded, before parsing it -- mirrors the hash pinning a live TUF client
/// performs against `snapshot.json`'s and `timestamp.json`'s `meta` entries.
fn read_metadata_checked<T: serde::de::DeserializeOwned>(
    remote: &GitStore,
    commit: &CommitId,
    file: &str,
    expected_sha256: &crate::schema::decoded::Decoded<crate::schema::decoded::Hex>,
) -> Result<Signed<T>> {
    let bytes = read_metadata_bytes(remote, commit, file, Some(expected_sha256))?;
    serde_json::from_slice(&bytes).map_err(|source| {
        error::Error::InvalidMetadataAt {
            commit: commit.to_string(),
            file: file.to_string(),
            reason: source.to_string(),
        }
    })
}

fn read_metadata_bytes(
    remote: &GitStore,
    commit: &CommitId,
    file: &str,
    expected_sha256: Option<&crate::schema::decoded::Decoded<crate::schema::decoded::Hex>>,
) -> Result<Vec<u8>> {
    let bytes = remote.read_blob(commit, &format!("{METADATA_DIR}/{file}"))?;
    if let Some(expected) = expected_sha256 {
        let actual = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &bytes);
        ensure!(
            actual.as_ref() == &**expected,
            error::MetadataHashMismatchSnafu {
                file: file.to_string(),
                commit: commit.to_string(),
            }
        );
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::decoded::{Decoded, Hex};
    use git2::Repository as Git2Repository;
    use tempfile::TempDir;

    fn repo_with_metadata(file: &str, contents: &str) -> (TempDir, GitStore, CommitId) {
        let dir = TempDir::new().unwrap();
        let git2_repo = Git2Repository::init(dir.path()).unwrap();
        let mut config = git2_repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        let store = GitStore::open(dir.path()).unwrap();
        let rel = std::path::PathBuf::from(format!("{METADATA_DIR}/{file}"));
        let full = dir.path().join(&rel);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, contents).unwrap();
        let commit = store.commit("initial", &[rel.as_path()]).unwrap();
        (dir, store, commit)
    }

    #[test]
    fn read_metadata_checked_accepts_matching_hash() {
        let (_dir, store, commit) = repo_with_metadata("snapshot.json", "hello");
        let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, b"hello");
        let expected: Decoded<Hex> = digest.as_ref().to_vec().into();

        let bytes = read_metadata_bytes(&store, &commit, "snapshot.json", Some(&expected)).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn read_metadata_checked_rejects_mismatched_hash() {
        let (_dir, store, commit) = repo_with_metadata("snapshot.json", "hello");
        let wrong: Decoded<Hex> = vec![0u8; 32].into();

        assert!(read_metadata_bytes(&store, &commit, "snapshot.json", Some(&wrong)).is_err());
    }
}
