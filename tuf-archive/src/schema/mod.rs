#![allow(clippy::used_underscore_binding)]

//! The on-disk role graph: root, snapshot, targets (with delegations), and timestamp, plus the
//! signed envelope and canonical-form machinery shared by all of them.

mod de;
pub mod decoded;
mod error;
mod iter;
pub mod key;
mod verify;

pub use crate::schema::error::{Error, Result};
pub(crate) use crate::schema::verify::verify_threshold;

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::iter::KeysIter;
use crate::schema::key::Key;
use crate::sign::Sign;
use aws_lc_rs::digest::{digest, Context, SHA256, SHA512};
use chrono::{DateTime, Utc};
use globset::Glob;
use olpc_cjson::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other top-level roles used in
    /// the system.
    Root,
    /// The snapshot role signs a metadata file that provides information about the latest version
    /// of all targets metadata on the repository (the top-level targets role and all delegated
    /// roles).
    Snapshot,
    /// The targets role's signature indicates which target files are trusted by clients.
    Targets,
    /// The timestamp role is used to prevent an adversary from replaying an out-of-date signed
    /// metadata file whose signature has not yet expired.
    Timestamp,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// Determines when metadata should be considered expired and no longer trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a version
    /// number less than the one currently trusted.
    fn version(&self) -> NonZeroU64;

    /// A deterministic JSON serialization used when calculating the digest of a metadata object.
    /// [More info on canonical JSON](http://wiki.laptop.org/go/Canonical_JSON)
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded<Hex>,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: Decoded<Hex>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root.json file is signed by the root role's keys. It indicates which keys are authorized
/// for all top-level roles, including the root role itself. Revocation and replacement of
/// top-level role keys, including for the root role, is done by changing the keys listed for the
/// roles in this file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// A string that contains the version number of the TUF specification. Its format follows the
    /// Semantic Versioning 2.0.0 (semver) specification.
    pub spec_version: String,

    /// A boolean indicating whether the repository supports consistent snapshots. When consistent
    /// snapshots is `true`, targets and certain metadata filenames are prefixed with either a
    /// a version number or digest.
    pub consistent_snapshot: bool,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a version
    /// number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by clients.
    pub expires: DateTime<Utc>,

    /// The KEYID must be correct for the specified KEY. Clients MUST calculate each KEYID to verify
    /// this is correct for the associated key. Clients MUST ensure that for any KEYID represented
    /// in this key list and in other files, only one unique key has that KEYID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// A list of roles, the keys associated with each role, and the threshold of signatures used
    /// for each role.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization.
    ///
    /// We must store these to correctly verify signatures for this object.
    ///
    /// If you're instantiating this struct, you should make this `HashMap::empty()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Represents the key IDs used for a role and the threshold of signatures required to validate it.
/// A role for each of "root", "snapshot", "timestamp", and "targets" MUST be specified in the key
/// list. The THRESHOLD for a role is an integer of the number of keys of that role whose
/// signatures are required in order to consider a file as being properly signed by that role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// Creates a new, empty `Root` object at version 1.
    pub fn new(spec_version: String, consistent_snapshot: bool, expires: DateTime<Utc>) -> Self {
        Root {
            spec_version,
            consistent_snapshot,
            version: NonZeroU64::new(1).expect("1 != 0"),
            expires,
            keys: HashMap::new(),
            roles: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    /// An iterator over the keys for a given role.
    pub fn keys(&self, role: RoleType) -> impl Iterator<Item = &Key> {
        KeysIter {
            keyids_iter: match self.roles.get(&role) {
                Some(role_keys) => role_keys.keyids.iter(),
                None => [].iter(),
            },
            keys: &self.keys,
        }
    }

    /// Given an object/key that impls Sign, return the corresponding key ID from Root.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        for (key_id, key) in &self.keys {
            if key_pair.tuf_key() == *key {
                return Some(key_id.clone());
            }
        }
        None
    }

    /// Verifies `signed`'s threshold of valid signatures for `role` against this root's key set.
    pub fn verify(&self, role: RoleType, signed: &Signed<impl Role>) -> Result<()> {
        let role_keys = self.roles.get(&role).ok_or(Error::RoleNotFound {
            name: format!("{role:?}"),
        })?;
        let canonical = signed.signed.canonical_form()?;
        verify_threshold(
            role,
            &canonical,
            &signed.signatures,
            &self.keys,
            role_keys.threshold.get(),
        )
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot.json file is signed by the snapshot role. It MUST list the version numbers of the
/// top-level targets metadata and all delegated targets metadata.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by clients.
    pub expires: DateTime<Utc>,

    /// A map of role filename to a `SnapshotMeta` describing its version. Includes the top-level
    /// targets metadata and all delegated targets metadata; excludes timestamp.
    pub meta: HashMap<String, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Represents a metadata file entry in a `snapshot.json` file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The integer length in bytes of the metadata file. Optional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// One or more hashes of the metadata file. Optional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The hash dictionary carried alongside a metadata or target file entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest.
    pub sha256: Decoded<Hex>,

    /// The SHA-512 digest. Present on target file entries; optional on metadata file entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<Decoded<Hex>>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// Create a new `Snapshot` object.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Snapshot {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents a `targets.json` file, or the signed body of a delegated targets role file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by clients.
    pub expires: DateTime<Utc>,

    /// Each key is a target path, relative to the `targets/` directory.
    pub targets: HashMap<String, Target>,

    /// Delegations describes subsets of the targets for which responsibility is delegated to
    /// another role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// A single entry in a targets map.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The integer length in bytes of the target file.
    pub length: u64,

    /// One or more hashes of the target file; this system always computes both sha256 and
    /// sha512.
    pub hashes: Hashes,

    /// Opaque application-defined metadata about the target file.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Target {
    /// Given a path, computes its length, sha256, and sha512 and returns a `Target`.
    pub fn from_path<P>(path: P) -> Result<Target>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return error::TargetNotAFileSnafu { path }.fail();
        }

        let mut file = File::open(path).context(error::FileOpenSnafu { path })?;
        let mut sha256_ctx = Context::new(&SHA256);
        let mut sha512_ctx = Context::new(&SHA512);
        let mut buf = [0; 8 * 1024];
        let mut length = 0;
        loop {
            match file.read(&mut buf).context(error::FileReadSnafu { path })? {
                0 => break,
                n => {
                    sha256_ctx.update(&buf[..n]);
                    sha512_ctx.update(&buf[..n]);
                    length += n as u64;
                }
            }
        }

        Ok(Target {
            length,
            hashes: Hashes {
                sha256: Decoded::from(sha256_ctx.finish().as_ref().to_vec()),
                sha512: Some(Decoded::from(sha512_ctx.finish().as_ref().to_vec())),
                _extra: HashMap::new(),
            },
            custom: HashMap::new(),
            _extra: HashMap::new(),
        })
    }

    /// Computes a `Target` directly from in-memory bytes (used when writing a target file handed
    /// to `add_target_files` as an inline blob rather than a path).
    pub fn from_bytes(bytes: &[u8]) -> Target {
        Target {
            length: bytes.len() as u64,
            hashes: Hashes {
                sha256: Decoded::from(digest(&SHA256, bytes).as_ref().to_vec()),
                sha512: Some(Decoded::from(digest(&SHA512, bytes).as_ref().to_vec())),
                _extra: HashMap::new(),
            },
            custom: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Targets {
    /// Create a new `Targets` object.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version,
            version,
            expires,
            targets: HashMap::new(),
            _extra: HashMap::new(),
            delegations: None,
        }
    }

    /// Given a target path, returns a reference to its `Target`, recursing into delegations.
    pub fn find_target(&self, target_name: &str) -> Result<&Target> {
        match self.targets.get(target_name) {
            Some(target) => Ok(target),
            None => match &self.delegations {
                None => Err(Error::TargetNotFound {
                    target_file: target_name.to_string(),
                }),
                Some(delegations) => delegations.find_target(target_name),
            },
        }
    }

    /// Given the name of a delegated role, return the delegated role.
    pub fn delegated_role(&self, name: &str) -> Result<&DelegatedRole> {
        if let Some(delegations) = &self.delegations {
            return delegations.delegated_role(name);
        }
        Err(Error::NoDelegations {})
    }

    /// Returns a vec of all targets and all delegated targets recursively.
    pub fn targets_vec(&self) -> Vec<&Target> {
        let mut targets = Vec::new();
        for target in &self.targets {
            targets.push(target.1);
        }
        if let Some(delegations) = &self.delegations {
            for t in delegations.targets_vec() {
                targets.push(t);
            }
        }
        targets
    }

    /// Returns a hashmap of all targets and all delegated targets recursively.
    pub fn targets_map(&self) -> HashMap<String, &Target> {
        let mut targets = HashMap::new();
        for target in &self.targets {
            targets.insert(target.0.clone(), target.1);
        }
        if let Some(delegations) = &self.delegations {
            targets.extend(delegations.targets_map());
        }
        targets
    }

    /// Returns a vec of all delegated role names, recursively.
    pub fn role_names(&self) -> Vec<&String> {
        let mut roles = Vec::new();
        if let Some(delegations) = &self.delegations {
            for role in &delegations.roles {
                roles.push(&role.name);
                if let Some(targets) = &role.targets {
                    roles.append(&mut targets.signed.role_names())
                }
            }
        }
        roles
    }

    /// Recursively clears all targets (used by `delete_unregistered_target_files`-style flows
    /// that rebuild the map from scratch).
    pub fn clear_targets(&mut self) {
        self.targets = HashMap::new();
        if let Some(delegations) = &mut self.delegations {
            for del_role in &mut delegations.roles {
                if let Some(targets) = &mut del_role.targets {
                    targets.signed.clear_targets();
                }
            }
        }
    }

    /// Finds a loaded delegated `Targets` by `name`, recursing into delegations.
    pub fn targets_by_name(&mut self, name: &str) -> Result<&mut Self> {
        if let Some(delegations) = &mut self.delegations {
            for role in &mut delegations.roles {
                if let Some(targets) = &mut role.targets {
                    if role.name == name {
                        return Ok(&mut targets.signed);
                    } else if let Ok(role) = targets.signed.targets_by_name(name) {
                        return Ok(role);
                    }
                }
            }
        }
        Err(Error::RoleNotFound {
            name: name.to_string(),
        })
    }

    /// Returns a vec of all rolenames, recursively (duplicate of `role_names`, kept for callers
    /// that want a `Vec<&String>` without borrowing the whole `Delegations` tree).
    pub fn get_roles_str(&self) -> Vec<&String> {
        self.role_names()
    }

    /// Returns the `DelegatedRole` named `name`, recursing into delegations.
    pub fn get_delegated_role_by_name(&mut self, name: &str) -> Result<&mut DelegatedRole> {
        if let Some(delegations) = &mut self.delegations {
            for role in &mut delegations.roles {
                if role.name == name {
                    return Ok(role);
                } else if let Some(targets) = &mut role.targets {
                    if let Ok(role) = targets.signed.get_delegated_role_by_name(name) {
                        return Ok(role);
                    }
                }
            }
        }
        Err(Error::RoleNotFound {
            name: name.to_string(),
        })
    }

    /// Returns a reference to the `Delegations` block that directly parents `name`.
    pub fn parent_of(&self, name: &str) -> Result<&Delegations> {
        if let Some(delegations) = &self.delegations {
            for role in &delegations.roles {
                if role.name == name {
                    return Ok(delegations);
                }
                if let Some(targets) = &role.targets {
                    if let Ok(delegation) = targets.signed.parent_of(name) {
                        return Ok(delegation);
                    }
                }
            }
        }
        Err(Error::RoleNotFound {
            name: name.to_string(),
        })
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Delegations are found in a `targets.json` file (or a delegated targets role's own file).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// Public keys used to verify signatures of delegated targets roles. Revocation and
    /// replacement of a delegated targets role's keys is done by changing this field.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The list of delegated roles, in declaration order. Tie-breaking between overlapping path
    /// patterns uses this order: first match wins.
    pub roles: Vec<DelegatedRole>,
}

/// Each role delegated in a targets file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role. For example, "projects".
    pub name: String,

    /// The key IDs used by this role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// The paths governed by this role.
    #[serde(flatten)]
    pub paths: PathSet,

    /// If true, a path match here stops further delegation search (children are not consulted).
    pub terminating: bool,

    /// The signed targets for this role, once loaded.
    #[serde(skip)]
    pub targets: Option<Signed<Targets>>,
}

/// Specifies the target paths that a delegated role controls.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum PathSet {
    /// Glob-style path patterns, relative to the targets directory.
    #[serde(rename = "paths")]
    Paths(Vec<String>),

    /// Hash-prefix bins: a target belongs to this role if the SHA-256 hex digest of its path
    /// starts with one of these prefixes.
    #[serde(rename = "path_hash_prefixes")]
    PathHashPrefixes(Vec<String>),
}

impl PathSet {
    /// Given a target path, determines whether it matches this path set.
    pub(crate) fn matched_target(&self, target: &str) -> bool {
        match self {
            Self::Paths(paths) => paths.iter().any(|path| Self::matched_path(path, target)),
            Self::PathHashPrefixes(prefixes) => {
                prefixes.iter().any(|prefix| Self::matched_prefix(prefix, target))
            }
        }
    }

    fn matched_prefix(prefix: &str, target: &str) -> bool {
        let hash = digest(&SHA256, target.as_bytes());
        hex::encode(hash).starts_with(prefix)
    }

    fn matched_path(wildcardpath: &str, target: &str) -> bool {
        let Ok(glob) = Glob::new(wildcardpath) else {
            return false;
        };
        glob.compile_matcher().is_match(target)
    }

    /// Returns the raw pattern/prefix list.
    pub fn vec(&self) -> &Vec<String> {
        match self {
            PathSet::Paths(x) | PathSet::PathHashPrefixes(x) => x,
        }
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Self::new()
    }
}

impl Delegations {
    /// Creates a new `Delegations` with no keys or roles.
    pub fn new() -> Self {
        Delegations {
            keys: HashMap::new(),
            roles: Vec::new(),
        }
    }

    /// Determines whether any child role's paths match `target`.
    pub fn target_is_delegated(&self, target: &str) -> bool {
        self.roles.iter().any(|role| role.paths.matched_target(target))
    }

    /// Resolves the most-specific delegated role (or `None` for the owning `targets` role
    /// itself) that a path should be signed under, per the declaration-order, first-match,
    /// terminating-stops-descent rule.
    pub fn map_signing_role<'a>(&'a self, path: &str) -> Option<&'a DelegatedRole> {
        for role in &self.roles {
            if !role.paths.matched_target(path) {
                continue;
            }
            if let Some(child_targets) = &role.targets {
                if let Some(deeper) = child_targets
                    .signed
                    .delegations
                    .as_ref()
                    .and_then(|d| d.map_signing_role(path))
                {
                    return Some(deeper);
                }
            }
            return Some(role);
        }
        None
    }

    /// Returns the child role named `role_name`, if any.
    pub fn role(&self, role_name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == role_name)
    }

    /// Finds a target by pre-order search through the delegation tree.
    pub fn find_target(&self, target_name: &str) -> Result<&Target> {
        for delegated_role in &self.roles {
            if delegated_role.paths.matched_target(target_name) {
                if let Some(targets) = &delegated_role.targets {
                    if let Ok(target) = targets.signed.find_target(target_name) {
                        return Ok(target);
                    }
                }
            }
        }
        Err(Error::TargetNotFound {
            target_file: target_name.to_string(),
        })
    }

    /// Recursively searches for the delegated role named `name`.
    pub fn delegated_role(&self, name: &str) -> Result<&DelegatedRole> {
        for delegated_role in &self.roles {
            if delegated_role.name == name {
                return Ok(delegated_role);
            }
            if let Some(targets) = &delegated_role.targets {
                if let Ok(found) = targets.signed.delegated_role(name) {
                    return Ok(found);
                }
            }
        }
        Err(Error::TargetNotFound {
            target_file: name.to_string(),
        })
    }

    /// Returns all targets delegated by this struct, recursively.
    pub fn targets_vec(&self) -> Vec<&Target> {
        let mut targets = Vec::new();
        for role in &self.roles {
            if let Some(t) = &role.targets {
                targets.extend(t.signed.targets_vec());
            }
        }
        targets
    }

    /// Returns all targets delegated by this struct, recursively, as a map.
    pub fn targets_map(&self) -> HashMap<String, &Target> {
        let mut targets = HashMap::new();
        for role in &self.roles {
            if let Some(t) = &role.targets {
                targets.extend(t.signed.targets_map());
            }
        }
        targets
    }

    /// Given an object/key that impls Sign, returns the corresponding key ID from Delegations.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        for (key_id, key) in &self.keys {
            if key_pair.tuf_key() == *key {
                return Some(key_id.clone());
            }
        }
        None
    }

    /// Verifies `signed`'s threshold of valid signatures for delegated role `name`.
    pub fn verify(&self, name: &str, signed: &Signed<Targets>) -> Result<()> {
        let role = self.role(name).ok_or_else(|| Error::RoleNotFound {
            name: name.to_string(),
        })?;
        let canonical = signed.signed.canonical_form()?;
        verify_threshold(
            RoleType::Targets,
            &canonical,
            &signed.signatures,
            &self.keys,
            role.threshold.get(),
        )
    }
}

impl DelegatedRole {
    /// Returns a `RoleKeys` view of this role's keyids and threshold.
    pub fn keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }

    /// Attaches freshly-loaded targets metadata to this role, grafting any already-loaded
    /// grandchildren back in. Returns the names of grandchildren not yet loaded.
    pub fn update_targets(&mut self, mut new_targets: Signed<Targets>) -> Vec<String> {
        let mut needed_roles = Vec::new();
        if let Some(targets) = &self.targets {
            if let Some(delegations) = &mut new_targets.signed.delegations {
                for role in &mut delegations.roles {
                    if let Ok(grandchild) = targets.signed.targets_by_name(&role.name) {
                        role.targets = Some(Signed {
                            signed: grandchild.clone(),
                            signatures: Vec::new(),
                        });
                    } else {
                        needed_roles.push(role.name.clone());
                    }
                }
            }
        }
        self.targets = Some(new_targets);
        needed_roles
    }

    /// Verifies that `paths` is a subset of paths this role is allowed to delegate further.
    pub fn verify_paths(&self, paths: &PathSet) -> Result<()> {
        for path in paths.vec() {
            if !self.paths.matched_target(path) {
                return Err(Error::UnmatchedPath {
                    child: path.to_string(),
                });
            }
        }
        Ok(())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp.json file is signed by a timestamp key. It indicates the latest version of the
/// snapshot metadata and is frequently resigned to limit the amount of time a client can be kept
/// unaware of interference with obtaining updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by clients.
    pub expires: DateTime<Utc>,

    /// Describes the current `snapshot.json`. Always contains exactly one entry, keyed
    /// `"snapshot.json"`.
    pub meta: HashMap<String, TimestampMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes the `snapshot.json` file referenced from `timestamp.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimestampMeta {
    /// The integer length in bytes of the snapshot.json file.
    pub length: u64,

    /// The hashes of the snapshot.json file.
    pub hashes: Hashes,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Creates a new `Timestamp` object.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Timestamp {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_glob_matches() {
        let set = PathSet::Paths(vec!["dir1/*".to_string(), "dir2/path1".to_string()]);
        assert!(set.matched_target("dir1/x"));
        assert!(!set.matched_target("dir2/path2"));
        assert!(set.matched_target("dir2/path1"));
    }

    #[test]
    fn target_from_bytes_has_both_digests() {
        let target = Target::from_bytes(b"hello");
        assert_eq!(target.length, 5);
        assert!(target.hashes.sha512.is_some());
    }
}
