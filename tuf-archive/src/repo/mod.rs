// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The metadata repository: the in-memory, mutable view of an authentication repository's
//! root/targets/snapshot/timestamp role graph, and the edit session that keeps it consistent.

pub(crate) mod keys;

use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::{
    DelegatedRole, Delegations, PathSet, RoleKeys, RoleType, Root, Signed, Snapshot, Targets,
    Timestamp,
};
use crate::signed::SignedRole;
use aws_lc_rs::rand::SystemRandom;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

fn default_expiration(now: DateTime<Utc>, role: RoleType) -> DateTime<Utc> {
    now + match role {
        RoleType::Root => Duration::days(365),
        RoleType::Targets => Duration::days(90),
        RoleType::Snapshot => Duration::days(7),
        RoleType::Timestamp => Duration::days(1),
    }
}

const DELEGATED_TARGETS_EXPIRATION_DAYS: i64 = 90;

fn default_delegated_expiration(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(DELEGATED_TARGETS_EXPIRATION_DAYS)
}

/// Maps one of the four reserved top-level role names to its `RoleType`. Only called after a
/// match arm has already confirmed `name` is one of these four strings.
fn top_level_role_type(name: &str) -> RoleType {
    match name {
        "root" => RoleType::Root,
        "targets" => RoleType::Targets,
        "snapshot" => RoleType::Snapshot,
        "timestamp" => RoleType::Timestamp,
        _ => unreachable!("caller already matched on the four reserved role names"),
    }
}

/// The keys and threshold to use for one top-level role.
#[derive(Debug)]
pub struct RoleKeysConfig {
    /// Where to load this role's private signing keys from.
    pub key_sources: Vec<Box<dyn KeySource>>,
    /// The number of signatures required to consider this role validly signed.
    pub threshold: NonZeroU64,
}

/// The keys, threshold, and path authorization for one delegated targets role.
#[derive(Debug)]
pub struct DelegatedRoleConfig {
    /// The role's name, e.g. `"projects"`.
    pub name: String,
    /// Where to load this role's private signing keys from.
    pub key_sources: Vec<Box<dyn KeySource>>,
    /// The number of signatures required to consider this role validly signed.
    pub threshold: NonZeroU64,
    /// The paths (or hash-prefix bins) this role is authorized to sign for.
    pub paths: PathSet,
    /// Whether a match here stops further delegation search.
    pub terminating: bool,
}

/// A validated description of every role's keys, thresholds, and (for delegated roles) path
/// authorizations, used to create a new authentication repository from scratch.
#[derive(Debug)]
pub struct RolesKeysData {
    pub(crate) root: RoleKeysConfig,
    pub(crate) targets: RoleKeysConfig,
    pub(crate) snapshot: RoleKeysConfig,
    pub(crate) timestamp: RoleKeysConfig,
    pub(crate) delegated_targets: Vec<DelegatedRoleConfig>,
}

impl RolesKeysData {
    /// Validates a set of role configurations: every threshold must be nonzero and no greater
    /// than its key count, and delegated role names must be unique.
    pub fn validated(
        root: RoleKeysConfig,
        targets: RoleKeysConfig,
        snapshot: RoleKeysConfig,
        timestamp: RoleKeysConfig,
        delegated_targets: Vec<DelegatedRoleConfig>,
    ) -> Result<Self> {
        for role_keys in [&root, &targets, &snapshot, &timestamp] {
            ensure!(
                usize::try_from(role_keys.threshold.get())
                    .context(error::InvalidIntoSnafu)?
                    <= role_keys.key_sources.len(),
                error::InvalidThresholdSnafu
            );
        }

        let mut seen = HashSet::new();
        for delegated in &delegated_targets {
            ensure!(
                seen.insert(delegated.name.clone()),
                error::DuplicateDelegatedRoleNameSnafu { name: delegated.name.clone() }
            );
            ensure!(
                usize::try_from(delegated.threshold.get())
                    .context(error::InvalidIntoSnafu)?
                    <= delegated.key_sources.len(),
                error::InvalidThresholdSnafu
            );
        }

        Ok(Self { root, targets, snapshot, timestamp, delegated_targets })
    }
}

/// A tracked metadata file's identity, as recorded in a parent role's metadata entry. The
/// snapshot/timestamp scheduler ([`crate::scheduler`]) reads these after every edit.
#[derive(Debug, Clone)]
pub(crate) struct MetaInfo {
    pub(crate) version: NonZeroU64,
    pub(crate) sha256: [u8; 32],
    pub(crate) length: u64,
}

/// The in-memory, mutable view of an authentication repository's role graph, rooted at
/// `metadata_dir`. Every `edit_*` call bumps the edited role's version, refreshes its
/// expiration, re-signs it with whichever of `keys`/`delegated_keys` are authorized, and writes
/// the result back to `metadata_dir`.
#[derive(Debug)]
pub struct MetadataRepository {
    metadata_dir: PathBuf,
    keys: HashMap<RoleType, Vec<Box<dyn KeySource>>>,
    delegated_keys: HashMap<String, Vec<Box<dyn KeySource>>>,
    rng: SystemRandom,

    root: Signed<Root>,
    targets: Signed<Targets>,
    snapshot: Signed<Snapshot>,
    timestamp: Signed<Timestamp>,

    pub(crate) targets_infos: HashMap<String, MetaInfo>,
    pub(crate) root_info: Option<MetaInfo>,
    pub(crate) snapshot_info: Option<MetaInfo>,
}

impl MetadataRepository {
    /// Creates a brand-new authentication repository at `metadata_dir`: an initial, signed v1
    /// root, targets, snapshot, timestamp, and one signed v1 file per delegated role in
    /// `roles_keys`. Fails if `metadata_dir` already holds a `root.json`.
    pub fn create(metadata_dir: impl AsRef<Path>, roles_keys: RolesKeysData) -> Result<Self> {
        let metadata_dir = metadata_dir.as_ref().to_path_buf();
        ensure!(
            !metadata_dir.join("root.json").is_file(),
            error::RepositoryAlreadyExistsSnafu { path: metadata_dir.clone() }
        );

        let now = Utc::now();
        let rng = SystemRandom::new();

        let mut root = Root::new("1.0.0".to_string(), false, default_expiration(now, RoleType::Root));
        let mut delegations = Delegations::new();

        for (role_type, role_keys) in [
            (RoleType::Root, &roles_keys.root),
            (RoleType::Targets, &roles_keys.targets),
            (RoleType::Snapshot, &roles_keys.snapshot),
            (RoleType::Timestamp, &roles_keys.timestamp),
        ] {
            let mut keyids = Vec::new();
            for source in &role_keys.key_sources {
                let signer = source.as_sign().context(error::KeyPairFromKeySourceSnafu)?;
                let key = signer.tuf_key();
                let keyid = key.key_id()?;
                root.keys.insert(keyid.clone(), key);
                keyids.push(keyid);
            }
            root.roles.insert(
                role_type,
                RoleKeys { keyids, threshold: role_keys.threshold, _extra: HashMap::new() },
            );
        }

        for delegated in &roles_keys.delegated_targets {
            let mut keyids = Vec::new();
            for source in &delegated.key_sources {
                let signer = source.as_sign().context(error::KeyPairFromKeySourceSnafu)?;
                let key = signer.tuf_key();
                let keyid = key.key_id()?;
                delegations.keys.insert(keyid.clone(), key);
                keyids.push(keyid);
            }
            delegations.roles.push(DelegatedRole {
                name: delegated.name.clone(),
                keyids,
                threshold: delegated.threshold,
                paths: delegated.paths.clone(),
                terminating: delegated.terminating,
                targets: None,
            });
        }

        let mut targets = Targets::new("1.0.0".to_string(), NonZeroU64::new(1).expect("1 != 0"), default_expiration(now, RoleType::Targets));
        if !delegations.roles.is_empty() {
            targets.delegations = Some(delegations);
        }

        let snapshot = Snapshot::new("1.0.0".to_string(), NonZeroU64::new(1).expect("1 != 0"), default_expiration(now, RoleType::Snapshot));
        let timestamp = Timestamp::new("1.0.0".to_string(), NonZeroU64::new(1).expect("1 != 0"), default_expiration(now, RoleType::Timestamp));

        let mut keys: HashMap<RoleType, Vec<Box<dyn KeySource>>> = HashMap::new();
        keys.insert(RoleType::Root, roles_keys.root.key_sources);
        keys.insert(RoleType::Targets, roles_keys.targets.key_sources);
        keys.insert(RoleType::Snapshot, roles_keys.snapshot.key_sources);
        keys.insert(RoleType::Timestamp, roles_keys.timestamp.key_sources);

        let mut delegated_keys: HashMap<String, Vec<Box<dyn KeySource>>> = HashMap::new();
        for delegated in roles_keys.delegated_targets {
            delegated_keys.insert(delegated.name, delegated.key_sources);
        }

        let mut repo = Self {
            metadata_dir,
            keys,
            delegated_keys,
            rng,
            root: Signed { signed: root, signatures: Vec::new() },
            targets: Signed { signed: targets, signatures: Vec::new() },
            snapshot: Signed { signed: snapshot, signatures: Vec::new() },
            timestamp: Signed { signed: timestamp, signatures: Vec::new() },
            targets_infos: HashMap::new(),
            root_info: None,
            snapshot_info: None,
        };

        repo.sign_and_write_root()?;
        repo.sign_and_write_targets(None)?;
        for name in repo.delegated_keys.keys().cloned().collect::<Vec<_>>() {
            repo.sign_and_attach_initial_delegated(&name, now)?;
        }
        repo.sync_snapshot_meta();
        repo.sign_and_write_snapshot()?;
        repo.sign_and_write_timestamp()?;
        Ok(repo)
    }

    /// Signs and writes the initial (version 1) file for a freshly-created delegated role,
    /// attaching the result to the owning `DelegatedRole.targets` field. Unlike
    /// `sign_and_write_targets`, this does not expect a previously-loaded `Signed<Targets>` to
    /// already be present.
    fn sign_and_attach_initial_delegated(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let delegations = self
            .targets
            .signed
            .parent_of(name)
            .map_err(|_| error::Error::DelegateNotFound { name: name.to_string() })?
            .clone();
        let initial = Targets::new("1.0.0".to_string(), NonZeroU64::new(1).expect("1 != 0"), default_delegated_expiration(now));

        let empty = Vec::new();
        let keys = self.delegated_keys.get(name).unwrap_or(&empty);
        let signed = SignedRole::new_delegated(initial, &delegations, name, keys, &self.rng)?;
        let mut sha256 = [0; 32];
        sha256.copy_from_slice(signed.sha256());
        let length = signed.buffer().len() as u64;
        signed.write(&self.metadata_dir, &format!("{name}.json"))?;
        let version = signed.signed().signed.version;

        let role = self.targets.signed.get_delegated_role_by_name(name)?;
        role.targets = Some(signed.signed().clone());
        self.targets_infos.insert(format!("{name}.json"), MetaInfo { version, sha256, length });
        Ok(())
    }

    /// The top-level signed root metadata.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The top-level signed targets metadata.
    pub fn targets(&self) -> &Signed<Targets> {
        &self.targets
    }

    /// The signed snapshot metadata.
    pub fn snapshot(&self) -> &Signed<Snapshot> {
        &self.snapshot
    }

    /// The signed timestamp metadata.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        &self.timestamp
    }

    /// Returns the signed role named `name`: `"root"`, `"targets"`, `"snapshot"`, `"timestamp"`,
    /// or a delegated role name.
    pub fn open(&mut self, name: &str) -> Result<&Signed<Targets>> {
        match name {
            "root" | "targets" | "snapshot" | "timestamp" => {
                error::TargetsNotFoundSnafu { name: name.to_string() }.fail()
            }
            delegated => {
                let role = self.targets.signed.get_delegated_role_by_name(delegated)?;
                role.targets
                    .as_ref()
                    .context(error::NoTargetsSnafu)
            }
        }
    }

    /// Mutates the top-level root role, bumps its version, refreshes its expiration (unless
    /// `expires` is given), and re-signs and writes it.
    pub fn edit_root(
        &mut self,
        mutate: impl FnOnce(&mut Root),
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        mutate(&mut self.root.signed);
        self.bump_version_and_expire(RoleType::Root, expires);
        self.sign_and_write_root()
    }

    /// Mutates the top-level targets role (or, if `delegated_name` is given, a delegated targets
    /// role), bumps its version, refreshes its expiration, re-signs, and writes it. Also
    /// triggers the snapshot/timestamp scheduler cascade per
    /// [`crate::scheduler::cascade_after_edit`] -- callers are expected to invoke that
    /// separately, since it needs a borrow of the whole repository.
    pub fn edit_targets(
        &mut self,
        delegated_name: Option<&str>,
        mutate: impl FnOnce(&mut Targets),
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match delegated_name {
            None => {
                mutate(&mut self.targets.signed);
            }
            Some(name) => {
                let role = self.targets.signed.targets_by_name(name)?;
                mutate(role);
            }
        }

        let now = Utc::now();
        let target = match delegated_name {
            None => &mut self.targets.signed,
            Some(name) => self.targets.signed.targets_by_name(name).expect("role exists, just mutated"),
        };
        target.version = NonZeroU64::new(target.version.get() + 1).expect("nonzero + 1 != 0");
        target.expires = expires.unwrap_or_else(|| default_delegated_expiration(now));

        self.sign_and_write_targets(delegated_name)
    }

    pub(crate) fn edit_snapshot(&mut self) -> Result<()> {
        self.bump_version_and_expire(RoleType::Snapshot, None);
        self.sign_and_write_snapshot()
    }

    pub(crate) fn edit_timestamp(&mut self) -> Result<()> {
        self.bump_version_and_expire(RoleType::Timestamp, None);
        self.sign_and_write_timestamp()
    }

    fn bump_version_and_expire(&mut self, role: RoleType, expires: Option<DateTime<Utc>>) {
        let now = Utc::now();
        match role {
            RoleType::Root => {
                self.root.signed.version =
                    NonZeroU64::new(self.root.signed.version.get() + 1).expect("nonzero + 1 != 0");
                self.root.signed.expires = expires.unwrap_or_else(|| default_expiration(now, role));
            }
            RoleType::Targets => {
                self.targets.signed.version = NonZeroU64::new(self.targets.signed.version.get() + 1)
                    .expect("nonzero + 1 != 0");
                self.targets.signed.expires = expires.unwrap_or_else(|| default_expiration(now, role));
            }
            RoleType::Snapshot => {
                self.snapshot.signed.version = NonZeroU64::new(self.snapshot.signed.version.get() + 1)
                    .expect("nonzero + 1 != 0");
                self.snapshot.signed.expires = expires.unwrap_or_else(|| default_expiration(now, role));
            }
            RoleType::Timestamp => {
                self.timestamp.signed.version = NonZeroU64::new(self.timestamp.signed.version.get() + 1)
                    .expect("nonzero + 1 != 0");
                self.timestamp.signed.expires = expires.unwrap_or_else(|| default_expiration(now, role));
            }
        }
    }

    fn sign_and_write_root(&mut self) -> Result<()> {
        let keys = self.keys.get(&RoleType::Root).map(Vec::as_slice).unwrap_or_default();
        let signed = SignedRole::new(self.root.signed.clone(), &self.root.signed, keys, &self.rng)?;
        let mut sha256 = [0; 32];
        sha256.copy_from_slice(signed.sha256());
        let length = signed.buffer().len() as u64;
        signed.write(&self.metadata_dir, "root.json")?;
        signed.write(
            &self.metadata_dir,
            &format!("{}.root.json", self.root.signed.version),
        )?;
        self.root_info = Some(MetaInfo { version: self.root.signed.version, sha256, length });
        self.root = signed.signed().clone();
        Ok(())
    }

    fn sign_and_write_targets(&mut self, delegated_name: Option<&str>) -> Result<()> {
        match delegated_name {
            None => {
                let keys = self.keys.get(&RoleType::Targets).map(Vec::as_slice).unwrap_or_default();
                let signed = SignedRole::new(self.targets.signed.clone(), &self.root.signed, keys, &self.rng)?;
                let mut sha256 = [0; 32];
                sha256.copy_from_slice(signed.sha256());
                let length = signed.buffer().len() as u64;
                signed.write(&self.metadata_dir, "targets.json")?;
                self.targets_infos.insert(
                    "targets.json".to_string(),
                    MetaInfo { version: self.targets.signed.version, sha256, length },
                );
                self.targets = signed.signed().clone();
            }
            Some(name) => {
                let delegations = self
                    .targets
                    .signed
                    .parent_of(name)
                    .map_err(|_| error::Error::DelegateNotFound { name: name.to_string() })?
                    .clone();
                let current = {
                    let role = self.targets.signed.get_delegated_role_by_name(name)?;
                    role.targets
                        .as_ref()
                        .context(error::NoTargetsSnafu)?
                        .signed
                        .clone()
                };
                let empty = Vec::new();
                let keys = self.delegated_keys.get(name).unwrap_or(&empty);
                let signed = SignedRole::new_delegated(current, &delegations, name, keys, &self.rng)?;
                let mut sha256 = [0; 32];
                sha256.copy_from_slice(signed.sha256());
                let length = signed.buffer().len() as u64;
                signed.write(&self.metadata_dir, &format!("{name}.json"))?;
                let version = signed.signed().signed.version;
                let role = self.targets.signed.get_delegated_role_by_name(name)?;
                role.targets = Some(signed.signed().clone());
                self.targets_infos
                    .insert(format!("{name}.json"), MetaInfo { version, sha256, length });
            }
        }
        Ok(())
    }

    fn sign_and_write_snapshot(&mut self) -> Result<()> {
        let keys = self.keys.get(&RoleType::Snapshot).map(Vec::as_slice).unwrap_or_default();
        let signed = SignedRole::new(self.snapshot.signed.clone(), &self.root.signed, keys, &self.rng)?;
        let mut sha256 = [0; 32];
        sha256.copy_from_slice(signed.sha256());
        let length = signed.buffer().len() as u64;
        signed.write(&self.metadata_dir, "snapshot.json")?;
        self.snapshot_info = Some(MetaInfo { version: self.snapshot.signed.version, sha256, length });
        self.snapshot = signed.signed().clone();
        Ok(())
    }

    fn sign_and_write_timestamp(&mut self) -> Result<()> {
        let keys = self.keys.get(&RoleType::Timestamp).map(Vec::as_slice).unwrap_or_default();
        let signed = SignedRole::new(self.timestamp.signed.clone(), &self.root.signed, keys, &self.rng)?;
        signed.write(&self.metadata_dir, "timestamp.json")?;
        self.timestamp = signed.signed().clone();
        Ok(())
    }

    /// Finds the name of the role that directly delegates to `role`: `"targets"` for a
    /// first-level delegation, or the name of whichever delegated role delegates further.
    pub fn find_parent(&self, role: &str) -> Result<String> {
        if self
            .targets
            .signed
            .delegations
            .as_ref()
            .is_some_and(|d| d.role(role).is_some())
        {
            return Ok("targets".to_string());
        }

        fn search(role: &str, targets: &Targets) -> Option<String> {
            let delegations = targets.delegations.as_ref()?;
            for child in &delegations.roles {
                if child.name == role {
                    return None;
                }
                if let Some(child_targets) = &child.targets {
                    if child_targets
                        .signed
                        .delegations
                        .as_ref()
                        .is_some_and(|d| d.role(role).is_some())
                    {
                        return Some(child.name.clone());
                    }
                    if let Some(found) = search(role, &child_targets.signed) {
                        return Some(found);
                    }
                }
            }
            None
        }

        search(role, &self.targets.signed).context(error::DelegateNotFoundSnafu { name: role.to_string() })
    }

    /// Every targets role (top-level plus all delegated), by name.
    pub fn get_all_targets_roles(&self) -> Vec<String> {
        let mut roles = vec!["targets".to_string()];
        roles.extend(self.targets.signed.role_names().into_iter().cloned());
        roles
    }

    /// Every role name in the repository: the four top-level roles plus every delegated
    /// targets role.
    pub fn get_all_roles(&self) -> Vec<String> {
        let mut roles = vec!["root".to_string(), "snapshot".to_string(), "timestamp".to_string()];
        roles.extend(self.get_all_targets_roles());
        roles
    }

    /// The path authorization for a delegated role.
    pub fn get_role_paths(&self, role: &str) -> Result<PathSet> {
        let delegations = self
            .targets
            .signed
            .parent_of(role)
            .map_err(|_| error::Error::DelegateNotFound { name: role.to_string() })?;
        Ok(delegations
            .role(role)
            .context(error::DelegateNotFoundSnafu { name: role.to_string() })?
            .paths
            .clone())
    }

    /// The expiration date of a role: `"root"`, `"targets"`, `"snapshot"`, `"timestamp"`, or a
    /// delegated role name.
    pub fn get_expiration_date(&mut self, role: &str) -> Result<DateTime<Utc>> {
        Ok(match role {
            "root" => self.root.signed.expires,
            "targets" => self.targets.signed.expires,
            "snapshot" => self.snapshot.signed.expires,
            "timestamp" => self.timestamp.signed.expires,
            name => {
                self.targets
                    .signed
                    .get_delegated_role_by_name(name)?
                    .targets
                    .as_ref()
                    .context(error::NoTargetsSnafu)?
                    .signed
                    .expires
            }
        })
    }

    /// The signature threshold configured for a role.
    pub fn get_role_threshold(&self, role: &str) -> Result<u64> {
        Ok(match role {
            "root" => self.root.signed.roles.get(&RoleType::Root).context(error::NoRoleKeysinRootSnafu { role: RoleType::Root })?.threshold.get(),
            "targets" => self.root.signed.roles.get(&RoleType::Targets).context(error::NoRoleKeysinRootSnafu { role: RoleType::Targets })?.threshold.get(),
            "snapshot" => self.root.signed.roles.get(&RoleType::Snapshot).context(error::NoRoleKeysinRootSnafu { role: RoleType::Snapshot })?.threshold.get(),
            "timestamp" => self.root.signed.roles.get(&RoleType::Timestamp).context(error::NoRoleKeysinRootSnafu { role: RoleType::Timestamp })?.threshold.get(),
            name => {
                self.targets
                    .signed
                    .parent_of(name)
                    .map_err(|_| error::Error::DelegateNotFound { name: name.to_string() })?
                    .role(name)
                    .context(error::DelegateNotFoundSnafu { name: name.to_string() })?
                    .threshold
                    .get()
            }
        })
    }

    /// Adds each key in `keys_by_role` to root's (or a delegation's) key set and to the named
    /// role's keyid list. Returns, for each role, which keyids were newly added, which were
    /// already present, and which keys failed to produce a keyid (always empty, since keyid
    /// derivation for a well-formed `Key` cannot fail; kept for the caller's convenience when
    /// batching untrusted input upstream of this call).
    pub fn add_metadata_keys(
        &mut self,
        keys_by_role: HashMap<String, Vec<Key>>,
    ) -> Result<HashMap<String, (Vec<Decoded<Hex>>, Vec<Decoded<Hex>>, Vec<Key>)>> {
        let mut report = HashMap::new();
        let mut root_changed = false;
        let mut targets_owners_changed: HashSet<String> = HashSet::new();

        for (role, new_keys) in keys_by_role {
            let mut added = Vec::new();
            let mut already_present = Vec::new();
            let invalid = Vec::new();

            match role.as_str() {
                "root" | "targets" | "snapshot" | "timestamp" => {
                    let role_type = top_level_role_type(&role);
                    for key in new_keys {
                        let keyid = key.key_id()?;
                        if self.root.signed.keys.contains_key(&keyid) {
                            already_present.push(keyid);
                            continue;
                        }
                        self.root.signed.keys.insert(keyid.clone(), key);
                        self.root
                            .signed
                            .roles
                            .entry(role_type)
                            .or_insert_with(|| RoleKeys {
                                keyids: Vec::new(),
                                threshold: NonZeroU64::new(1).expect("1 != 0"),
                                _extra: HashMap::new(),
                            })
                            .keyids
                            .push(keyid.clone());
                        added.push(keyid);
                    }
                    if !added.is_empty() {
                        root_changed = true;
                    }
                }
                name => {
                    let owner = self.find_parent(name)?;
                    let delegated_role = self.targets.signed.get_delegated_role_by_name(name)?;
                    for key in new_keys {
                        let keyid = key.key_id()?;
                        if delegated_role.keyids.contains(&keyid) {
                            already_present.push(keyid);
                            continue;
                        }
                        delegated_role.keyids.push(keyid.clone());
                        added.push(keyid);
                    }
                    if !added.is_empty() {
                        targets_owners_changed.insert(owner);
                    }
                }
            }

            debug!("role '{role}': added {} key(s), {} already present", added.len(), already_present.len());
            report.insert(role, (added, already_present, invalid));
        }

        if root_changed {
            self.edit_root(|_| {}, None)?;
        }
        for owner in &targets_owners_changed {
            let delegated_name = if owner == "targets" { None } else { Some(owner.as_str()) };
            self.edit_targets(delegated_name, |_| {}, None)?;
        }
        if root_changed || !targets_owners_changed.is_empty() {
            crate::scheduler::cascade_after_edit(self)?;
        }

        Ok(report)
    }

    /// Rewrites snapshot's `meta` map from the current `targets_infos` trackers, adding, bumping,
    /// or dropping entries as needed. Returns whether anything changed. Used by
    /// [`crate::scheduler`] to decide whether a snapshot/timestamp cascade is needed at all.
    pub(crate) fn sync_snapshot_meta(&mut self) -> bool {
        let mut changed = false;
        let mut seen = HashSet::new();

        let root_name = "root.json".to_string();
        let root_entry = self.root_info.as_ref().map(|info| (&root_name, info));

        for (name, info) in root_entry.into_iter().chain(self.targets_infos.iter()) {
            seen.insert(name.clone());
            let up_to_date = self
                .snapshot
                .signed
                .meta
                .get(name)
                .is_some_and(|m| m.version == info.version);
            if up_to_date {
                continue;
            }
            changed = true;
            self.snapshot.signed.meta.insert(
                name.clone(),
                crate::schema::SnapshotMeta {
                    length: Some(info.length),
                    hashes: Some(crate::schema::Hashes {
                        sha256: info.sha256.to_vec().into(),
                        sha512: None,
                        _extra: HashMap::new(),
                    }),
                    version: info.version,
                    _extra: HashMap::new(),
                },
            );
        }

        let stale: Vec<String> = self
            .snapshot
            .signed
            .meta
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            self.snapshot.signed.meta.remove(&name);
            changed = true;
        }

        changed
    }

    /// Points timestamp's `snapshot.json` entry at the current `snapshot_info` tracker. A no-op
    /// if snapshot hasn't been signed yet.
    pub(crate) fn sync_timestamp_meta(&mut self) {
        let Some(info) = self.snapshot_info.clone() else {
            return;
        };
        self.timestamp.signed.meta.insert(
            "snapshot.json".to_string(),
            crate::schema::TimestampMeta {
                length: info.length,
                hashes: crate::schema::Hashes {
                    sha256: info.sha256.to_vec().into(),
                    sha512: None,
                    _extra: HashMap::new(),
                },
                version: info.version,
                _extra: HashMap::new(),
            },
        );
    }

    /// Removes `keyid` from every role named in `roles` (or every role it appears in, if
    /// `roles` is empty). Refuses to remove a key from a role if doing so would drop that
    /// role's keyid count below its threshold.
    pub fn revoke_metadata_key(
        &mut self,
        keyid: &Decoded<Hex>,
        roles: &[String],
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        let mut removed_from = Vec::new();
        let mut not_present_in = Vec::new();
        let mut would_go_sub_threshold = Vec::new();
        let mut root_changed = false;
        let mut targets_owners_changed: HashSet<String> = HashSet::new();

        let targets = if roles.is_empty() { self.get_all_roles() } else { roles.to_vec() };

        for role in targets {
            match role.as_str() {
                "root" | "targets" | "snapshot" | "timestamp" => {
                    let role_type = top_level_role_type(&role);
                    let Some(role_keys) = self.root.signed.roles.get_mut(&role_type) else {
                        not_present_in.push(role);
                        continue;
                    };
                    if !role_keys.keyids.contains(keyid) {
                        not_present_in.push(role);
                        continue;
                    }
                    if role_keys.keyids.len() as u64 <= role_keys.threshold.get() {
                        would_go_sub_threshold.push(role);
                        continue;
                    }
                    role_keys.keyids.retain(|k| k != keyid);
                    root_changed = true;
                    removed_from.push(role);
                }
                name => {
                    let Ok(owner) = self.find_parent(name) else {
                        not_present_in.push(role);
                        continue;
                    };
                    let Ok(delegated_role) = self.targets.signed.get_delegated_role_by_name(name) else {
                        not_present_in.push(role);
                        continue;
                    };
                    if !delegated_role.keyids.contains(keyid) {
                        not_present_in.push(role);
                        continue;
                    }
                    if delegated_role.keyids.len() as u64 <= delegated_role.threshold.get() {
                        would_go_sub_threshold.push(role);
                        continue;
                    }
                    delegated_role.keyids.retain(|k| k != keyid);
                    targets_owners_changed.insert(owner);
                    removed_from.push(role);
                }
            }
        }

        if root_changed {
            self.edit_root(|_| {}, None)?;
        }
        for owner in &targets_owners_changed {
            let delegated_name = if owner == "targets" { None } else { Some(owner.as_str()) };
            self.edit_targets(delegated_name, |_| {}, None)?;
        }
        if root_changed || !targets_owners_changed.is_empty() {
            crate::scheduler::cascade_after_edit(self)?;
        }

        Ok((removed_from, not_present_in, would_go_sub_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{RsaKey, RsaScheme};
    use crate::schema::PathSet;
    use tempfile::TempDir;

    /// A `Sign` that doesn't perform real RSA math: it returns a fixed, arbitrary byte string
    /// as its "public key" and "signature." This is fine for exercising the sign-and-write path
    /// (`MetadataRepository` never reads back its own signatures within the same process), but
    /// would fail real verification -- see `schema::verify`.
    #[derive(Debug)]
    struct MockSign {
        id: u8,
    }

    impl crate::sign::Sign for MockSign {
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
        fn as_sign(&self) -> Result<Box<dyn crate::sign::Sign>> {
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
    fn create_signs_and_writes_all_top_level_roles() {
        let dir = TempDir::new().unwrap();
        create_test_repo(&dir);

        for file in ["root.json", "targets.json", "snapshot.json", "timestamp.json", "projects.json"] {
            assert!(dir.path().join(file).is_file(), "{file} should exist");
        }
    }

    #[test]
    fn create_populates_snapshot_meta_with_root_and_targets_at_version_one() {
        let dir = TempDir::new().unwrap();
        let repo = create_test_repo(&dir);

        let meta = &repo.snapshot().signed.meta;
        assert_eq!(meta.get("root.json").unwrap().version.get(), 1);
        assert_eq!(meta.get("targets.json").unwrap().version.get(), 1);
        assert_eq!(meta.get("projects.json").unwrap().version.get(), 1);
    }

    #[test]
    fn add_metadata_keys_for_delegated_role_bumps_owning_targets_version() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);
        assert_eq!(repo.targets().signed.version.get(), 1);

        let extra_key = MockSign { id: 9 }.tuf_key();
        let mut keys_by_role = HashMap::new();
        keys_by_role.insert("projects".to_string(), vec![extra_key]);
        let report = repo.add_metadata_keys(keys_by_role).unwrap();
        let (added, _already, _invalid) = &report["projects"];
        assert_eq!(added.len(), 1);

        // "projects" is delegated directly from the top-level targets role, so adding one of its
        // keys bumps the owning (top-level) targets version, not root's.
        assert_eq!(repo.targets().signed.version.get(), 2);
        assert_eq!(repo.root().signed.version.get(), 1);
    }

    #[test]
    fn create_refuses_when_root_already_exists() {
        let dir = TempDir::new().unwrap();
        create_test_repo(&dir);

        let roles_keys = RolesKeysData::validated(
            one_key_role(1),
            one_key_role(2),
            one_key_role(3),
            one_key_role(4),
            vec![],
        )
        .unwrap();
        assert!(MetadataRepository::create(dir.path(), roles_keys).is_err());
    }

    #[test]
    fn edit_targets_bumps_version_and_cascades_through_scheduler() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);

        assert_eq!(repo.targets().signed.version.get(), 1);
        repo.edit_targets(None, |_targets| {}, None).unwrap();
        assert_eq!(repo.targets().signed.version.get(), 2);

        crate::scheduler::cascade_after_edit(&mut repo).unwrap();
        assert_eq!(repo.snapshot().signed.version.get(), 2);
        assert_eq!(repo.timestamp().signed.version.get(), 2);

        // Idempotent: nothing changed since the cascade, so a second call is a no-op.
        let snapshot_before = repo.snapshot().signed.version;
        let timestamp_before = repo.timestamp().signed.version;
        crate::scheduler::cascade_after_edit(&mut repo).unwrap();
        assert_eq!(repo.snapshot().signed.version, snapshot_before);
        assert_eq!(repo.timestamp().signed.version, timestamp_before);
    }

    #[test]
    fn revoke_metadata_key_refuses_to_drop_below_threshold() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);

        let root_keys = repo.root.signed.roles.get(&RoleType::Root).unwrap().keyids.clone();
        let keyid = root_keys[0].clone();

        let (removed, _absent, sub_threshold) =
            repo.revoke_metadata_key(&keyid, &["root".to_string()]).unwrap();
        assert!(removed.is_empty());
        assert_eq!(sub_threshold, vec!["root".to_string()]);
    }

    #[test]
    fn add_metadata_keys_then_revoke_succeeds_above_threshold() {
        let dir = TempDir::new().unwrap();
        let mut repo = create_test_repo(&dir);
        assert_eq!(repo.root().signed.version.get(), 1);

        let extra_key = MockSign { id: 9 }.tuf_key();
        let mut keys_by_role = HashMap::new();
        keys_by_role.insert("root".to_string(), vec![extra_key.clone()]);
        let report = repo.add_metadata_keys(keys_by_role).unwrap();
        let (added, _already, _invalid) = &report["root"];
        assert_eq!(added.len(), 1);
        assert_eq!(repo.root().signed.version.get(), 2);
        assert_eq!(
            repo.snapshot().signed.meta.get("root.json").map(|m| m.version.get()),
            Some(2)
        );

        let (removed, _absent, sub_threshold) =
            repo.revoke_metadata_key(&added[0], &["root".to_string()]).unwrap();
        assert_eq!(removed, vec!["root".to_string()]);
        assert!(sub_threshold.is_empty());
        assert_eq!(repo.root().signed.version.get(), 3);
    }

    #[test]
    fn find_parent_locates_delegated_role_owner() {
        let dir = TempDir::new().unwrap();
        let repo = create_test_repo(&dir);
        assert_eq!(repo.find_parent("projects").unwrap(), "targets");
    }

    #[test]
    fn get_role_paths_returns_delegation_authorization() {
        let dir = TempDir::new().unwrap();
        let repo = create_test_repo(&dir);
        let paths = repo.get_role_paths("projects").unwrap();
        assert_eq!(paths, PathSet::Paths(vec!["projects/*".to_string()]));
    }
}
