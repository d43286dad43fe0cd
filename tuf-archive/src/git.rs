// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed access to a local git repository: everything the metadata repository and
//! the historical updater need, without exposing raw `git2` plumbing to callers.

use crate::error::{self, Result};
use git2::{
    build::RepoBuilder, Commit, FetchOptions, Oid, Repository as Git2Repository, Sort,
};
use log::debug;
use snafu::ResultExt;
use std::path::{Path, PathBuf};

/// The hash of a git commit, as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CommitId {
    fn to_oid(&self) -> Result<Oid> {
        Oid::from_str(&self.0).map_err(|source| {
            error::Git2Snafu {
                operation: "parse commit id",
                path: PathBuf::new(),
            }
            .into_error(source)
        })
    }
}

/// A git repository used as the authentication repo's content-addressed store.
#[derive(Debug)]
pub struct GitStore {
    path: PathBuf,
    repo: Git2Repository,
}

impl GitStore {
    /// Opens an existing repository at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = Git2Repository::open(&path).context(error::Git2Snafu {
            operation: "open",
            path: path.clone(),
        })?;
        Ok(Self { path, repo })
    }

    /// Clones `url` into a fresh bare repository at `dest`. Used for the updater's read-only
    /// validation clone, which must not share object storage with the working repo until
    /// validation succeeds.
    pub fn bare_clone(url: &str, dest: impl AsRef<Path>) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        debug!("bare-cloning {url} into {}", dest.display());
        let repo = RepoBuilder::new()
            .bare(true)
            .clone(url, &dest)
            .context(error::Git2Snafu {
                operation: "bare_clone",
                path: dest.clone(),
            })?;
        Ok(Self { path: dest, repo })
    }

    /// The path this store was opened or cloned at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The commit `HEAD` currently points at.
    pub fn head_commit(&self) -> Result<CommitId> {
        let head = self.repo.head().context(error::Git2Snafu {
            operation: "head",
            path: self.path.clone(),
        })?;
        let commit = head.peel_to_commit().context(error::Git2Snafu {
            operation: "peel_to_commit",
            path: self.path.clone(),
        })?;
        Ok(CommitId(commit.id().to_string()))
    }

    /// The name of the repository's default branch (the short name `HEAD` resolves to).
    pub fn default_branch(&self) -> Result<String> {
        let head = self.repo.head().context(error::Git2Snafu {
            operation: "head",
            path: self.path.clone(),
        })?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    /// Lists the commits strictly after `from_exclusive` up to and including `to_inclusive`, in
    /// chronological (oldest-first) order. If `from_exclusive` is `None`, starts from the root
    /// of `to_inclusive`'s history.
    pub fn list_commits(
        &self,
        from_exclusive: Option<&CommitId>,
        to_inclusive: &CommitId,
    ) -> Result<Vec<CommitId>> {
        let mut walk = self.repo.revwalk().context(error::Git2Snafu {
            operation: "revwalk",
            path: self.path.clone(),
        })?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .context(error::Git2Snafu {
                operation: "revwalk.set_sorting",
                path: self.path.clone(),
            })?;
        walk.push(to_inclusive.to_oid()?).context(error::Git2Snafu {
            operation: "revwalk.push",
            path: self.path.clone(),
        })?;
        if let Some(from) = from_exclusive {
            walk.hide(from.to_oid()?).context(error::Git2Snafu {
                operation: "revwalk.hide",
                path: self.path.clone(),
            })?;
        }

        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid.context(error::Git2Snafu {
                operation: "revwalk.next",
                path: self.path.clone(),
            })?;
            commits.push(CommitId(oid.to_string()));
        }
        Ok(commits)
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool> {
        if ancestor.0 == descendant.0 {
            return Ok(true);
        }
        self.repo
            .graph_descendant_of(descendant.to_oid()?, ancestor.to_oid()?)
            .context(error::Git2Snafu {
                operation: "graph_descendant_of",
                path: self.path.clone(),
            })
    }

    fn commit_at(&self, commit: &CommitId) -> Result<Commit<'_>> {
        self.repo
            .find_commit(commit.to_oid()?)
            .context(error::Git2Snafu {
                operation: "find_commit",
                path: self.path.clone(),
            })
    }

    /// Reads the bytes of the blob at `rel_path` as it existed at `commit`.
    pub fn read_blob(&self, commit: &CommitId, rel_path: &str) -> Result<Vec<u8>> {
        let tree = self.commit_at(commit)?.tree().context(error::Git2Snafu {
            operation: "tree",
            path: self.path.clone(),
        })?;
        let entry = tree.get_path(Path::new(rel_path)).map_err(|_| {
            error::Error::GitPathNotFound {
                path: rel_path.to_string(),
                commit: commit.0.clone(),
            }
        })?;
        let blob = entry
            .to_object(&self.repo)
            .context(error::Git2Snafu {
                operation: "to_object",
                path: self.path.clone(),
            })?
            .peel_to_blob()
            .context(error::Git2Snafu {
                operation: "peel_to_blob",
                path: self.path.clone(),
            })?;
        Ok(blob.content().to_vec())
    }

    /// Lists the (non-recursive) file names directly under `dir` as of `commit`.
    pub fn list_files(&self, commit: &CommitId, dir: &str) -> Result<Vec<String>> {
        let tree = self.commit_at(commit)?.tree().context(error::Git2Snafu {
            operation: "tree",
            path: self.path.clone(),
        })?;
        let subtree = if dir.is_empty() {
            tree
        } else {
            let entry = tree
                .get_path(Path::new(dir))
                .map_err(|_| error::Error::GitPathNotFound {
                    path: dir.to_string(),
                    commit: commit.0.clone(),
                })?;
            entry
                .to_object(&self.repo)
                .context(error::Git2Snafu {
                    operation: "to_object",
                    path: self.path.clone(),
                })?
                .peel_to_tree()
                .context(error::Git2Snafu {
                    operation: "peel_to_tree",
                    path: self.path.clone(),
                })?
        };

        Ok(subtree
            .iter()
            .filter_map(|entry| entry.name().map(ToString::to_string))
            .collect())
    }

    /// Stages `paths` (relative to the working tree root) and commits them with `message`.
    /// Requires a non-bare repository with a live index.
    pub fn commit(&self, message: &str, paths: &[&Path]) -> Result<CommitId> {
        debug!("committing {} path(s) in {}", paths.len(), self.path.display());
        let mut index = self.repo.index().context(error::Git2Snafu {
            operation: "index",
            path: self.path.clone(),
        })?;
        for p in paths {
            index.add_path(p).context(error::Git2Snafu {
                operation: "index.add_path",
                path: self.path.clone(),
            })?;
        }
        index.write().context(error::Git2Snafu {
            operation: "index.write",
            path: self.path.clone(),
        })?;
        let tree_id = index.write_tree().context(error::Git2Snafu {
            operation: "index.write_tree",
            path: self.path.clone(),
        })?;
        let tree = self.repo.find_tree(tree_id).context(error::Git2Snafu {
            operation: "find_tree",
            path: self.path.clone(),
        })?;
        let sig = self.repo.signature().context(error::Git2Snafu {
            operation: "signature",
            path: self.path.clone(),
        })?;

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context(error::Git2Snafu {
                operation: "commit",
                path: self.path.clone(),
            })?;
        Ok(CommitId(oid.to_string()))
    }

    /// Resets the working tree and `HEAD` to `commit`, discarding any uncommitted edit.
    pub fn reset_hard(&self, commit: &CommitId) -> Result<()> {
        debug!("hard-resetting {} to {commit}", self.path.display());
        let obj = self
            .repo
            .find_object(commit.to_oid()?, None)
            .context(error::Git2Snafu {
                operation: "find_object",
                path: self.path.clone(),
            })?;
        self.repo
            .reset(&obj, git2::ResetType::Hard, None)
            .context(error::Git2Snafu {
                operation: "reset_hard",
                path: self.path.clone(),
            })
    }

    /// Removes untracked files from the working tree.
    pub fn clean_untracked(&self) -> Result<()> {
        debug!("cleaning untracked files in {}", self.path.display());
        let mut opts = git2::build::CheckoutBuilder::new();
        opts.remove_untracked(true).force();
        self.repo
            .checkout_head(Some(&mut opts))
            .context(error::Git2Snafu {
                operation: "clean_untracked",
                path: self.path.clone(),
            })
    }

    /// Fetches from `url`. `all` mirrors every remote ref; otherwise only the default refspec.
    pub fn fetch(&self, url: &str, all: bool) -> Result<()> {
        debug!("fetching {url} into {} (all={all})", self.path.display());
        let mut remote = self
            .repo
            .remote_anonymous(url)
            .context(error::Git2Snafu {
                operation: "remote_anonymous",
                path: self.path.clone(),
            })?;
        let mut opts = FetchOptions::new();
        let refspecs: &[&str] = if all {
            &["+refs/*:refs/*"]
        } else {
            &[]
        };
        remote
            .fetch(refspecs, Some(&mut opts), None)
            .context(error::Git2Snafu {
                operation: "fetch",
                path: self.path.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitStore) {
        let dir = TempDir::new().unwrap();
        let repo = Git2Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        let store = GitStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn write_and_commit(dir: &TempDir, store: &GitStore, rel_path: &str, contents: &str, message: &str) -> CommitId {
        let full = dir.path().join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full, contents).unwrap();
        store.commit(message, &[Path::new(rel_path)]).unwrap()
    }

    #[test]
    fn commit_and_read_blob_round_trip() {
        let (dir, store) = init_repo();
        let commit = write_and_commit(&dir, &store, "metadata/root.json", "{}", "initial");

        assert_eq!(store.read_blob(&commit, "metadata/root.json").unwrap(), b"{}");
        assert_eq!(store.head_commit().unwrap(), commit);
    }

    #[test]
    fn read_blob_missing_path_fails() {
        let (dir, store) = init_repo();
        let commit = write_and_commit(&dir, &store, "metadata/root.json", "{}", "initial");
        assert!(store.read_blob(&commit, "metadata/nope.json").is_err());
    }

    #[test]
    fn list_commits_is_chronological_and_excludes_from() {
        let (dir, store) = init_repo();
        let c1 = write_and_commit(&dir, &store, "a.txt", "1", "c1");
        let c2 = write_and_commit(&dir, &store, "a.txt", "2", "c2");
        let c3 = write_and_commit(&dir, &store, "a.txt", "3", "c3");

        let all = store.list_commits(None, &c3).unwrap();
        assert_eq!(all, vec![c1.clone(), c2.clone(), c3.clone()]);

        let since_c1 = store.list_commits(Some(&c1), &c3).unwrap();
        assert_eq!(since_c1, vec![c2, c3]);
    }

    #[test]
    fn is_ancestor_detects_divergent_history() {
        let (dir, store) = init_repo();
        let c1 = write_and_commit(&dir, &store, "a.txt", "1", "c1");
        let c2 = write_and_commit(&dir, &store, "a.txt", "2", "c2");
        assert!(store.is_ancestor(&c1, &c2).unwrap());

        // Reset back to c1 and commit a divergent history; c2 is no longer an ancestor of the
        // new head, the same shape a force-push leaves behind.
        store.reset_hard(&c1).unwrap();
        let c2_alt = write_and_commit(&dir, &store, "a.txt", "2-alt", "c2-alt");
        assert_ne!(c2, c2_alt);
        assert!(!store.is_ancestor(&c2, &c2_alt).unwrap());
    }

    #[test]
    fn list_files_enumerates_directory_contents() {
        let (dir, store) = init_repo();
        write_and_commit(&dir, &store, "targets/a.txt", "a", "a");
        let commit = write_and_commit(&dir, &store, "targets/b.txt", "b", "b");

        let mut files = store.list_files(&commit, "targets").unwrap();
        files.sort();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn reset_hard_and_clean_untracked_restore_working_tree() {
        let (dir, store) = init_repo();
        let commit = write_and_commit(&dir, &store, "a.txt", "1", "c1");
        std::fs::write(dir.path().join("a.txt"), "modified").unwrap();
        std::fs::write(dir.path().join("untracked.txt"), "junk").unwrap();

        store.reset_hard(&commit).unwrap();
        store.clean_untracked().unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "1");
        assert!(!dir.path().join("untracked.txt").exists());
    }
}
