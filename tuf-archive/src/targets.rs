// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The targets engine: writing target files to the working tree, resolving which role must sign
//! for a given path, and reconciling the working tree against what's currently signed.

use crate::error::{self, Result};
use crate::repo::MetadataRepository;
use crate::schema::Target;
use crate::scheduler;
use serde_json::Value;
use snafu::ResultExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use walkdir::WalkDir;

/// One target file to add: its raw bytes (written under the targets directory and hashed) plus
/// optional application-defined metadata.
#[derive(Debug, Clone)]
pub struct TargetFileInput {
    /// The file's contents.
    pub bytes: Vec<u8>,
    /// Opaque metadata to attach to the target entry.
    pub custom: HashMap<String, Value>,
}

/// Resolves, for each of `paths`, the name of the delegated role authorized to sign for it, or
/// `None` if no delegation matches (meaning the top-level `targets` role owns it).
pub fn map_signing_roles(
    repo: &MetadataRepository,
    paths: &[String],
) -> HashMap<String, Option<String>> {
    let mut out = HashMap::new();
    for path in paths {
        let role = repo
            .targets()
            .signed
            .delegations
            .as_ref()
            .and_then(|d| d.map_signing_role(path))
            .map(|r| r.name.clone());
        out.insert(path.clone(), role);
    }
    out
}

/// Writes each file in `files` under `targets_dir`, computes its `Target` entry (length, sha256,
/// sha512), and inserts it into whichever role is authorized to sign for its path, triggering
/// that role's edit session. Files destined for different roles are grouped so each role is
/// edited exactly once.
pub fn add_target_files(
    repo: &mut MetadataRepository,
    targets_dir: &Path,
    files: HashMap<String, TargetFileInput>,
) -> Result<()> {
    let paths: Vec<String> = files.keys().cloned().collect();
    let by_role = map_signing_roles(repo, &paths);

    let mut grouped: HashMap<Option<String>, Vec<(String, Target)>> = HashMap::new();
    for (path, input) in files {
        write_target_file(targets_dir, &path, &input.bytes)?;
        let mut target = Target::from_bytes(&input.bytes);
        target.custom = input.custom;
        let role = by_role.get(&path).cloned().flatten();
        grouped.entry(role).or_default().push((path, target));
    }

    for (role, entries) in grouped {
        repo.edit_targets(
            role.as_deref(),
            move |targets| {
                for (path, target) in entries {
                    targets.targets.insert(path, target);
                }
            },
            None,
        )?;
    }
    scheduler::cascade_after_edit(repo)
}

/// Removes each of `paths` from the working tree and from whichever role's signed targets map
/// currently lists it.
pub fn remove_target_files(
    repo: &mut MetadataRepository,
    targets_dir: &Path,
    paths: Vec<String>,
) -> Result<()> {
    let by_role = map_signing_roles(repo, &paths);

    let mut grouped: HashMap<Option<String>, Vec<String>> = HashMap::new();
    for path in paths {
        let full_path = targets_dir.join(&path);
        if full_path.is_file() {
            std::fs::remove_file(&full_path).context(error::FileRemoveSnafu { path: full_path })?;
        }
        let role = by_role.get(&path).cloned().flatten();
        grouped.entry(role).or_default().push(path);
    }

    for (role, paths) in grouped {
        repo.edit_targets(
            role.as_deref(),
            move |targets| {
                for path in &paths {
                    targets.targets.remove(path);
                }
            },
            None,
        )?;
    }
    scheduler::cascade_after_edit(repo)
}

/// Adds and/or removes target files in a single logical operation.
pub fn modify_targets(
    repo: &mut MetadataRepository,
    targets_dir: &Path,
    added: HashMap<String, TargetFileInput>,
    removed: Vec<String>,
) -> Result<()> {
    if !added.is_empty() {
        add_target_files(repo, targets_dir, added)?;
    }
    if !removed.is_empty() {
        remove_target_files(repo, targets_dir, removed)?;
    }
    Ok(())
}

fn write_target_file(targets_dir: &Path, rel_path: &str, bytes: &[u8]) -> Result<()> {
    let full_path = targets_dir.join(rel_path);
    if let Some(parent) = full_path.parent() {
        std::fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
    }
    std::fs::write(&full_path, bytes).context(error::FileWriteSnafu { path: full_path })
}

/// Diffs the on-disk targets directory against every role's signed targets map. Returns
/// `(to_add, to_remove)`: paths present on disk but not yet signed, and paths signed but no
/// longer present on disk.
pub fn get_all_target_files_state(
    repo: &MetadataRepository,
    targets_dir: &Path,
) -> Result<(Vec<String>, Vec<String>)> {
    let signed = repo.targets().signed.targets_map();
    let signed_paths: HashSet<String> = signed.keys().cloned().collect();

    let mut on_disk = HashSet::new();
    collect_files(targets_dir, targets_dir, &mut on_disk)?;

    let mut to_add: Vec<String> = on_disk.difference(&signed_paths).cloned().collect();
    let to_remove: Vec<String> = signed_paths.difference(&on_disk).cloned().collect();

    for path in on_disk.intersection(&signed_paths) {
        let target = signed[path];
        let full_path = targets_dir.join(path);
        let bytes = std::fs::read(&full_path).context(error::FileReadSnafu { path: full_path })?;
        let actual = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &bytes);
        let expected = &target.hashes.sha256;
        if actual.as_ref() != &**expected {
            to_add.push(path.clone());
        }
    }

    Ok((to_add, to_remove))
}

fn collect_files(root: &Path, dir: &Path, out: &mut HashSet<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(dir) {
        let entry = entry.context(error::WalkDirSnafu { path: dir })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            if let Some(rel_str) = rel.to_str() {
                out.insert(rel_str.replace(std::path::MAIN_SEPARATOR, "/"));
            }
        }
    }
    Ok(())
}

/// Deletes, from the working tree, every target file that is present on disk but not registered
/// in any role's signed targets map. If `role` is given, only deletes files that would be
/// authorized for that role's paths (`"targets"` for the top-level role).
pub fn delete_unregistered_target_files(
    repo: &MetadataRepository,
    targets_dir: &Path,
    role: Option<&str>,
) -> Result<Vec<String>> {
    let (unregistered, _) = get_all_target_files_state(repo, targets_dir)?;
    let by_role = map_signing_roles(repo, &unregistered);

    let mut deleted = Vec::new();
    for path in unregistered {
        if let Some(wanted) = role {
            let resolved = by_role.get(&path).cloned().flatten();
            let matches = resolved.as_deref() == Some(wanted) || (wanted == "targets" && resolved.is_none());
            if !matches {
                continue;
            }
        }

        let full_path = targets_dir.join(&path);
        if full_path.is_file() {
            std::fs::remove_file(&full_path).context(error::FileRemoveSnafu { path: full_path })?;
            deleted.push(path);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_source::KeySource;
    use crate::repo::{DelegatedRoleConfig, RoleKeysConfig, RolesKeysData};
    use crate::schema::key::{Key, RsaKey, RsaScheme};
    use crate::schema::PathSet;
    use crate::sign::Sign;
    use std::num::NonZeroU64;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct MockSign {
        id: u8,
    }

    impl Sign for MockSign {
        fn tuf_key(&self) -> Key {
            Key::Rsa {
                keyval: RsaKey { public: vec![self.id; 32].into(), _extra: HashMap::new() },
                scheme: RsaScheme::RsaPkcs1v15Sha256,
                _extra: HashMap::new(),
            }
        }

        fn sign(
            &self,
            _msg: &[u8],
            _rng: &(dyn aws_lc_rs::rand::SecureRandom + Sync),
        ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>> {
            Ok(vec![self.id; 32])
        }
    }

    #[derive(Debug)]
    struct MockKeySource {
        id: u8,
    }

    impl KeySource for MockKeySource {
        fn as_sign(&self) -> Result<Box<dyn Sign>> {
            Ok(Box::new(MockSign { id: self.id }))
        }

        fn write(&self, _value: &str, _key_id_hex: &str) -> Result<()> {
            Ok(())
        }
    }

    fn one_key_role(id: u8) -> RoleKeysConfig {
        RoleKeysConfig {
            key_sources: vec![Box::new(MockKeySource { id })],
            threshold: NonZeroU64::new(1).expect("1 != 0"),
        }
    }

    fn create_test_repo(dir: &TempDir) -> MetadataRepository {
        let roles_keys = RolesKeysData::validated(
            one_key_role(1),
            one_key_role(2),
            one_key_role(3),
            one_key_role(4),
            vec![DelegatedRoleConfig {
                name: "projects".to_string(),
                key_sources: vec![Box::new(MockKeySource { id: 5 })],
                threshold: NonZeroU64::new(1).expect("1 != 0"),
                paths: PathSet::Paths(vec!["projects/*".to_string()]),
                terminating: false,
            }],
        )
        .unwrap();
        MetadataRepository::create(dir.path(), roles_keys).unwrap()
    }

    #[test]
    fn map_signing_roles_routes_delegated_path_to_its_role() {
        let dir = TempDir::new().unwrap();
        let repo = create_test_repo(&dir);

        let paths = vec!["projects/a.txt".to_string(), "other/b.txt".to_string()];
        let routed = map_signing_roles(&repo, &paths);
        assert_eq!(routed["projects/a.txt"], Some("projects".to_string()));
        assert_eq!(routed["other/b.txt"], None);
    }

    #[test]
    fn add_target_files_writes_bytes_and_signs_targets() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);
        let targets_dir = dir.path().join("targets");

        let mut files = HashMap::new();
        files.insert(
            "readme.txt".to_string(),
            TargetFileInput { bytes: b"hello".to_vec(), custom: HashMap::new() },
        );
        add_target_files(&mut repo, &targets_dir, files).unwrap();

        assert_eq!(
            std::fs::read(targets_dir.join("readme.txt")).unwrap(),
            b"hello"
        );
        assert!(repo.targets().signed.targets_map().contains_key("readme.txt"));
    }

    #[test]
    fn get_all_target_files_state_detects_unsigned_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);
        let targets_dir = dir.path().join("targets");
        std::fs::create_dir_all(&targets_dir).unwrap();
        std::fs::write(targets_dir.join("untracked.txt"), b"x").unwrap();

        let (to_add, to_remove) = get_all_target_files_state(&repo, &targets_dir).unwrap();
        assert_eq!(to_add, vec!["untracked.txt".to_string()]);
        assert!(to_remove.is_empty());

        let mut files = HashMap::new();
        files.insert(
            "untracked.txt".to_string(),
            TargetFileInput { bytes: b"x".to_vec(), custom: HashMap::new() },
        );
        add_target_files(&mut repo, &targets_dir, files).unwrap();
        std::fs::remove_file(targets_dir.join("untracked.txt")).unwrap();

        let (to_add, to_remove) = get_all_target_files_state(&repo, &targets_dir).unwrap();
        assert!(to_add.is_empty());
        assert_eq!(to_remove, vec!["untracked.txt".to_string()]);
    }

    #[test]
    fn get_all_target_files_state_detects_content_changed_signed_file() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);
        let targets_dir = dir.path().join("targets");

        let mut files = HashMap::new();
        files.insert(
            "signed.txt".to_string(),
            TargetFileInput { bytes: b"original".to_vec(), custom: HashMap::new() },
        );
        add_target_files(&mut repo, &targets_dir, files).unwrap();

        let (to_add, to_remove) = get_all_target_files_state(&repo, &targets_dir).unwrap();
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());

        // Content on disk now diverges from what's signed, though the path is unchanged.
        std::fs::write(targets_dir.join("signed.txt"), b"tampered").unwrap();

        let (to_add, to_remove) = get_all_target_files_state(&repo, &targets_dir).unwrap();
        assert_eq!(to_add, vec!["signed.txt".to_string()]);
        assert!(to_remove.is_empty());
    }

    #[test]
    fn delete_unregistered_target_files_removes_only_stray_files() {
        let dir = TempDir::new().unwrap();
        let repo = create_test_repo(&dir);
        let targets_dir = dir.path().join("targets");
        std::fs::create_dir_all(&targets_dir).unwrap();
        std::fs::write(targets_dir.join("stray.txt"), b"x").unwrap();

        let deleted = delete_unregistered_target_files(&repo, &targets_dir, None).unwrap();
        assert_eq!(deleted, vec!["stray.txt".to_string()]);
        assert!(!targets_dir.join("stray.txt").exists());
    }
}
