// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dependent repositories database: `repositories.json`, `mirrors.json`, and
//! `dependencies.json`, three target files an authentication repository may carry to describe
//! the target repositories it authenticates and the sub-authentication repositories it pins.

use crate::error::{self, Result};
use crate::git::{CommitId, GitStore};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const REPOSITORIES_FILE: &str = "targets/repositories.json";
const MIRRORS_FILE: &str = "targets/mirrors.json";
const DEPENDENCIES_FILE: &str = "targets/dependencies.json";

#[derive(Debug, Deserialize)]
struct RepositoriesFile {
    repositories: HashMap<String, RepositoryEntry>,
}

#[derive(Debug, Default, Deserialize, Clone)]
struct RepositoryEntry {
    #[serde(default)]
    urls: Option<Vec<String>>,
    #[serde(default)]
    custom: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MirrorsFile {
    mirrors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DependenciesFile {
    dependencies: HashMap<String, DependencyEntry>,
}

#[derive(Debug, Deserialize, Clone)]
struct DependencyEntry {
    out_of_band_authentication: String,
    #[serde(default)]
    branch: Option<String>,
}

/// One target repository this authentication repository has something to say about, as recorded
/// by [`load_repositories`] at a particular commit.
#[derive(Debug, Clone)]
pub struct Repository {
    pub name: String,
    pub urls: Option<Vec<String>>,
    pub custom: HashMap<String, Value>,
}

/// One sub-authentication repository this archive pins by out-of-band commit.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub out_of_band_commit: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LoadedAt {
    repositories: HashMap<String, Repository>,
    mirrors: Vec<String>,
    dependencies: HashMap<String, Dependency>,
    /// Names appearing in `repositories.json` that are also tracked by the signed targets map at
    /// this commit, i.e. names `only_load_targets` is allowed to return.
    in_targets: std::collections::HashSet<String>,
}

/// Reads and caches `repositories.json`, `mirrors.json`, and `dependencies.json` as they existed
/// at specific commits of an authentication repository.
#[derive(Debug)]
pub struct ReposDb<'a> {
    store: &'a GitStore,
    cache: Mutex<HashMap<CommitId, Arc<LoadedAt>>>,
}

impl<'a> ReposDb<'a> {
    pub fn new(store: &'a GitStore) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loads (or returns the cached load of) the three repositories-database files as they
    /// existed at `commit`, cross-referencing declared repository names against whichever
    /// targets are actually signed in the role named `targets_of` (so that
    /// `get_repositories(only_load_targets = true)` can filter out declarations with no backing
    /// signed target).
    pub fn load_repositories(
        &self,
        commit: &CommitId,
        signed_target_names: &std::collections::HashSet<String>,
    ) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cache.contains_key(commit) {
            return Ok(());
        }

        let repositories = match self.store.read_blob(commit, REPOSITORIES_FILE) {
            Ok(bytes) => {
                let parsed: RepositoriesFile = serde_json::from_slice(&bytes)
                    .context(error::ReposDbParseSnafu { what: "repositories.json" })?;
                parsed
                    .repositories
                    .into_iter()
                    .map(|(name, entry)| {
                        (
                            name.clone(),
                            Repository {
                                name,
                                urls: entry.urls,
                                custom: entry.custom,
                            },
                        )
                    })
                    .collect()
            }
            Err(_) => HashMap::new(),
        };

        let mirrors = match self.store.read_blob(commit, MIRRORS_FILE) {
            Ok(bytes) => {
                let parsed: MirrorsFile = serde_json::from_slice(&bytes)
                    .context(error::ReposDbParseSnafu { what: "mirrors.json" })?;
                parsed.mirrors
            }
            Err(_) => Vec::new(),
        };

        let dependencies = match self.store.read_blob(commit, DEPENDENCIES_FILE) {
            Ok(bytes) => {
                let parsed: DependenciesFile = serde_json::from_slice(&bytes)
                    .context(error::ReposDbParseSnafu { what: "dependencies.json" })?;
                parsed
                    .dependencies
                    .into_iter()
                    .map(|(name, entry)| {
                        (
                            name.clone(),
                            Dependency {
                                name,
                                out_of_band_commit: entry.out_of_band_authentication,
                                branch: entry.branch,
                            },
                        )
                    })
                    .collect()
            }
            Err(_) => HashMap::new(),
        };

        for name in dependencies.keys() {
            snafu::ensure!(
                repositories.contains_key(name),
                error::ReposDbUnknownRepoSnafu { name: name.clone() }
            );
        }

        let in_targets = repositories
            .keys()
            .filter(|name| signed_target_names.contains(*name))
            .cloned()
            .collect();

        cache.insert(
            commit.clone(),
            Arc::new(LoadedAt {
                repositories,
                mirrors,
                dependencies,
                in_targets,
            }),
        );
        Ok(())
    }

    fn loaded(&self, commit: &CommitId) -> Arc<LoadedAt> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(commit)
            .cloned()
            .unwrap_or_default()
    }

    /// The target repositories declared at `commit`. If `only_load_targets` is set, drops any
    /// name not also present in the signed targets map that [`load_repositories`] was given.
    pub fn get_repositories(&self, commit: &CommitId, only_load_targets: bool) -> Vec<Repository> {
        let loaded = self.loaded(commit);
        loaded
            .repositories
            .values()
            .filter(|r| !only_load_targets || loaded.in_targets.contains(&r.name))
            .cloned()
            .collect()
    }

    /// The union of target repositories declared across `commits`, keyed by name, with the
    /// declaration from the commit latest in the given order winning on conflict.
    pub fn get_deduplicated_repositories(
        &self,
        commits: &[CommitId],
        only_load_targets: bool,
    ) -> Vec<Repository> {
        let mut merged: HashMap<String, Repository> = HashMap::new();
        for commit in commits {
            for repo in self.get_repositories(commit, only_load_targets) {
                merged.insert(repo.name.clone(), repo);
            }
        }
        merged.into_values().collect()
    }

    /// The subset of repositories at `commit` whose custom data is a superset of `filter`.
    pub fn get_repositories_by_custom_data(
        &self,
        commit: &CommitId,
        filter: &HashMap<String, Value>,
    ) -> Vec<Repository> {
        self.get_repositories(commit, false)
            .into_iter()
            .filter(|repo| {
                filter
                    .iter()
                    .all(|(key, value)| repo.custom.get(key) == Some(value))
            })
            .collect()
    }

    /// The sub-authentication repositories pinned at `commit`.
    pub fn get_dependencies(&self, commit: &CommitId) -> Vec<Dependency> {
        self.loaded(commit).dependencies.values().cloned().collect()
    }

    /// Interpolates every mirror template declared at `commit` against `name`, split on `/` into
    /// `(org_name, repo_name)`. If the repository has an explicit `urls` override, that list is
    /// returned verbatim instead.
    pub fn get_repo_urls(&self, commit: &CommitId, name: &str) -> Result<Vec<String>> {
        let loaded = self.loaded(commit);

        if let Some(repo) = loaded.repositories.get(name) {
            if let Some(urls) = &repo.urls {
                return Ok(urls.clone());
            }
        }

        let (org_name, repo_name) = name
            .split_once('/')
            .context(error::ReposDbBadNameSnafu { name: name.to_string() })?;

        Ok(loaded
            .mirrors
            .iter()
            .map(|template| {
                template
                    .replace("{org_name}", org_name)
                    .replace("{repo_name}", repo_name)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository as Git2Repository;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn repo_with_files(files: &[(&str, &str)]) -> (TempDir, GitStore, CommitId) {
        let dir = TempDir::new().unwrap();
        let git2_repo = Git2Repository::init(dir.path()).unwrap();
        let mut config = git2_repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        let store = GitStore::open(dir.path()).unwrap();
        let mut rel_paths = Vec::new();
        for (rel, contents) in files {
            let full = dir.path().join(rel);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, contents).unwrap();
            rel_paths.push(std::path::PathBuf::from(rel));
        }
        let refs: Vec<&std::path::Path> = rel_paths.iter().map(|p| p.as_path()).collect();
        let commit = store.commit("initial", &refs).unwrap();
        (dir, store, commit)
    }

    #[test]
    fn loads_repositories_mirrors_and_dependencies() {
        let (_dir, store, commit) = repo_with_files(&[
            (
                "targets/repositories.json",
                r#"{"repositories": {"org/repo-a": {"custom": {"tier": "prod"}}, "org/repo-b": {"urls": ["https://example.com/b.git"]}}}"#,
            ),
            (
                "targets/mirrors.json",
                r#"{"mirrors": ["https://{org_name}.example/{repo_name}.git"]}"#,
            ),
            (
                "targets/dependencies.json",
                r#"{"dependencies": {"org/repo-a": {"out-of-band-authentication": "deadbeef", "branch": "main"}}}"#,
            ),
        ]);

        let db = ReposDb::new(&store);
        db.load_repositories(&commit, &HashSet::new()).unwrap();

        let mut repos = db.get_repositories(&commit, false);
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "org/repo-a");
        assert_eq!(repos[1].urls, Some(vec!["https://example.com/b.git".to_string()]));

        let urls = db.get_repo_urls(&commit, "org/repo-a").unwrap();
        assert_eq!(urls, vec!["https://org.example/repo-a.git".to_string()]);

        let deps = db.get_dependencies(&commit);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].out_of_band_commit, "deadbeef");
    }

    #[test]
    fn only_load_targets_filters_undeclared_repos() {
        let (_dir, store, commit) = repo_with_files(&[(
            "targets/repositories.json",
            r#"{"repositories": {"org/repo-a": {}, "org/repo-b": {}}}"#,
        )]);

        let db = ReposDb::new(&store);
        let mut signed = HashSet::new();
        signed.insert("org/repo-a".to_string());
        db.load_repositories(&commit, &signed).unwrap();

        let repos = db.get_repositories(&commit, true);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "org/repo-a");
    }

    #[test]
    fn dependency_without_matching_repository_is_rejected() {
        let (_dir, store, commit) = repo_with_files(&[(
            "targets/dependencies.json",
            r#"{"dependencies": {"org/missing": {"out-of-band-authentication": "abc"}}}"#,
        )]);

        let db = ReposDb::new(&store);
        assert!(db.load_repositories(&commit, &HashSet::new()).is_err());
    }

    #[test]
    fn repo_url_without_org_slash_and_no_override_fails() {
        let (_dir, store, commit) = repo_with_files(&[(
            "targets/mirrors.json",
            r#"{"mirrors": ["https://{org_name}.example/{repo_name}.git"]}"#,
        )]);

        let db = ReposDb::new(&store);
        db.load_repositories(&commit, &HashSet::new()).unwrap();
        assert!(db.get_repo_urls(&commit, "not-a-slash-name").is_err());
    }

    #[test]
    fn custom_data_filter_requires_superset_match() {
        let (_dir, store, commit) = repo_with_files(&[(
            "targets/repositories.json",
            r#"{"repositories": {"org/a": {"custom": {"tier": "prod", "region": "us"}}, "org/b": {"custom": {"tier": "dev"}}}}"#,
        )]);

        let db = ReposDb::new(&store);
        db.load_repositories(&commit, &HashSet::new()).unwrap();

        let mut filter = HashMap::new();
        filter.insert("tier".to_string(), Value::String("prod".to_string()));
        let matched = db.get_repositories_by_custom_data(&commit, &filter);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "org/a");
    }
}
