// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crate-level errors. Each module with its own failure modes keeps a local `Error`/`Result`
//! (see [`crate::schema::error`]); this module is the aggregate surface returned by the public
//! API of the metadata repository, signer, updater, and git store.

use crate::schema::RoleType;
use snafu::Snafu;
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The errors that can occur in this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    // -- schema / signature verification -------------------------------------------------

    /// A schema-level error (role parsing, canonicalization, signature verification).
    #[snafu(display("{}", source))]
    #[snafu(context(false))]
    Schema { source: crate::schema::Error },

    // -- signing ----------------------------------------------------------------------

    /// A key's PEM encoding could not be parsed at all.
    #[snafu(display("Unrecognized private key format: {}", source))]
    KeyUnrecognized { source: pem::PemError },

    /// A key's PEM parsed fine but its tag is neither `PRIVATE KEY` nor `RSA PRIVATE KEY`.
    #[snafu(display("Unrecognized private key PEM tag: {}", tag))]
    KeyFormatUnrecognized { tag: String },

    /// A key was parsed but rejected by the cryptographic backend (wrong size, malformed
    /// modulus, etc.)
    #[snafu(display("Key rejected by backend: {}", source))]
    KeyRejected { source: aws_lc_rs::error::KeyRejected },

    /// Signing a role's canonical bytes failed.
    #[snafu(display("Failed to sign: {}", source))]
    Sign {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// No PIN was supplied for a token that requires one.
    #[snafu(display("PIN required to unlock signing token"))]
    PinRequired,

    /// The configured hardware token is not present.
    #[snafu(display("Signing token not present: {}", message))]
    TokenAbsent { message: String },

    /// The PIN supplied to a hardware token was rejected.
    #[snafu(display("Token PIN rejected"))]
    TokenPinInvalid,

    /// None of the keys supplied to a signing operation correspond to a key authorized for the
    /// role being signed.
    #[snafu(display("No provided signing key is authorized for role {}", role))]
    SigningKeysNotFound { role: RoleType },

    /// A keystore contained no keys at all that are present in `root.json`.
    #[snafu(display("None of the supplied keys are present in root.json"))]
    KeysNotFoundInRoot,

    /// Loading a key from a `KeySource` failed.
    #[snafu(display("Failed to load signing key: {}", source))]
    KeyPairFromKeySource {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    // -- metadata repository / editing session ---------------------------------------------

    /// A required field was not set before building a role.
    #[snafu(display("Field not set before building role: {}", field))]
    Missing { field: &'static str },

    /// A role's `spec_version` does not match the version this crate implements.
    #[snafu(display("Unsupported spec_version '{}', expected '{}'", given, supported))]
    SpecVersion { given: String, supported: &'static str },

    /// A named delegated role could not be found.
    #[snafu(display("Delegated role not found: {}", name))]
    DelegateMissing { name: String },

    /// An edit targeted a delegated role that does not exist.
    #[snafu(display("Delegated role not found: {}", name))]
    DelegateNotFound { name: String },

    /// An edit targeted a role with no delegations of its own.
    #[snafu(display("Role has no delegations"))]
    NoDelegations,

    /// A delegated role referenced in a snapshot/scheduler pass had no loaded targets metadata.
    #[snafu(display("Delegated role has no loaded targets metadata"))]
    NoTargets,

    /// A role attempted to delegate paths outside what its parent authorized.
    #[snafu(display(
        "Role '{}' is not authorized to delegate paths {:?}",
        name,
        paths
    ))]
    InvalidPathPermission { name: String, paths: Vec<String> },

    /// The number of keyids did not fit in a threshold integer, or was zero.
    #[snafu(display("Invalid threshold"))]
    InvalidThreshold,

    /// A `usize` did not convert to the integer type required by a threshold.
    #[snafu(display("Invalid integer conversion"))]
    InvalidInto { source: std::num::TryFromIntError },

    /// A named role was not found while searching the delegation graph.
    #[snafu(display("Role not found: {}", name))]
    TargetsNotFound { name: String },

    /// Two delegated roles in the same `RolesKeysData` configuration share a name.
    #[snafu(display("Duplicate delegated role name: {}", name))]
    DuplicateDelegatedRoleName { name: String },

    /// `MetadataRepository::create` was called against a directory that already holds metadata.
    #[snafu(display("Repository already exists at '{}'", path.display()))]
    RepositoryAlreadyExists { path: PathBuf },

    /// A key material error occurred while computing or validating a keyid.
    #[snafu(display("{}", source))]
    JsonSerialization { source: crate::schema::Error },

    /// A role could not be serialized to its canonical form for signing.
    #[snafu(display("Failed to serialize {} for signing: {}", role, source))]
    SerializeRole {
        role: RoleType,
        source: serde_json::Error,
    },

    /// A signed role could not be serialized to its on-disk JSON form.
    #[snafu(display("Failed to serialize signed {}: {}", role, source))]
    SerializeSignedRole {
        role: RoleType,
        source: serde_json::Error,
    },

    /// `root.json` did not list any keys for a role this crate needs to sign.
    #[snafu(display("root.json lists no keys for role {}", role))]
    NoRoleKeysinRoot { role: RoleType },

    // -- file / path plumbing shared across modules ------------------------------------------

    /// A target path given to `Target::from_path` or a similar helper has no file name
    /// component.
    #[snafu(display("Path has no file name: {}", path.display()))]
    NoFileName { path: PathBuf },

    /// A path's file name is not valid UTF-8.
    #[snafu(display("Path is not valid UTF-8: {}", path.display()))]
    PathUtf8 { path: PathBuf },

    /// Building a `Target` from a path failed.
    #[snafu(display("Failed to build target from '{}': {}", path.display(), source))]
    TargetFromPath {
        path: PathBuf,
        source: crate::schema::Error,
    },

    /// A metadata directory could not be created.
    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    DirCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file could not be read.
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Walking a directory tree failed.
    #[snafu(display("Failed to walk directory '{}': {}", path.display(), source))]
    WalkDir {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// A file could not be parsed as JSON.
    #[snafu(display("Failed to parse '{}' as JSON: {}", path.display(), source))]
    FileParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A file could not be written.
    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file could not be removed.
    #[snafu(display("Failed to remove '{}': {}", path.display(), source))]
    FileRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file could not be opened.
    #[snafu(display("Failed to open '{}': {}", path.display(), source))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    // -- datastore (latest-known-time persistence) -------------------------------------------

    /// A temporary datastore directory could not be created.
    #[snafu(display("Failed to create temporary datastore: {}", source))]
    DatastoreInit { source: std::io::Error },

    /// A datastore file could not be opened.
    #[snafu(display("Failed to open datastore file '{}': {}", path.display(), source))]
    DatastoreOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A datastore file could not be created.
    #[snafu(display("Failed to create datastore file '{}': {}", path.display(), source))]
    DatastoreCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value could not be serialized into the datastore.
    #[snafu(display("Failed to write {} to '{}': {}", what, path.display(), source))]
    DatastoreSerialize {
        what: String,
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A datastore file could not be removed.
    #[snafu(display("Failed to remove datastore file '{}': {}", path.display(), source))]
    DatastoreRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The lock guarding datastore's system-time check was poisoned.
    #[snafu(display("Datastore time lock poisoned: {}", message))]
    DatastoreTimeLock { message: String },

    /// The wall clock went backward since it was last sampled by the datastore.
    #[snafu(display(
        "System time {} is before the last known time {}",
        sys_time,
        latest_known_time
    ))]
    SystemTimeSteppedBackward {
        sys_time: chrono::DateTime<chrono::Utc>,
        latest_known_time: chrono::DateTime<chrono::Utc>,
    },

    // -- git-backed content-addressed store ---------------------------------------------

    /// A `git2` operation failed.
    #[snafu(display("Git operation '{}' failed on '{}': {}", operation, path.display(), source))]
    Git2 {
        operation: &'static str,
        path: PathBuf,
        source: git2::Error,
    },

    /// A commit referenced by a cursor or history walk could not be found.
    #[snafu(display("Commit not found: {}", commit))]
    CommitNotFound { commit: String },

    /// A path was requested from a git tree but does not exist at that commit.
    #[snafu(display("Path '{}' not found at commit {}", path, commit))]
    GitPathNotFound { path: String, commit: String },

    // -- historical updater -------------------------------------------------------------

    /// The remote's head is not a descendant of the local repository's last validated commit;
    /// history was rewritten.
    #[snafu(display(
        "Force-push detected: remote head {} is not a descendant of last validated commit {}",
        remote,
        local
    ))]
    ForcePushDetected { local: String, remote: String },

    /// A metadata file at a given commit failed to parse or otherwise could not be validated for
    /// a reason not covered by a more specific variant.
    #[snafu(display("Invalid metadata for '{}' at commit {}: {}", file, commit, reason))]
    InvalidMetadataAt {
        commit: String,
        file: String,
        reason: String,
    },

    /// A metadata file's content hash did not match what its parent role recorded.
    #[snafu(display("Hash mismatch for '{}' at commit {}", file, commit))]
    MetadataHashMismatch { file: String, commit: String },

    /// Root metadata's signature chain could not be bridged from the trusted root to the next
    /// root during a rotation step.
    #[snafu(display("Root rotation from version {} to {} failed: {}", from, to, source))]
    RootRotation {
        from: u64,
        to: u64,
        source: crate::schema::Error,
    },

    /// A role in a historical commit declares an earlier version than the last trusted one.
    #[snafu(display(
        "Rollback detected: {} version {} is not newer than trusted version {} at commit {}",
        role,
        found,
        trusted,
        commit
    ))]
    RollbackAttack {
        role: RoleType,
        found: u64,
        trusted: u64,
        commit: String,
    },

    /// `snapshot.json` names a version for `targets.json` (or a delegation) that doesn't match
    /// what was actually loaded.
    #[snafu(display(
        "Snapshot/targets version mismatch for {}: snapshot says {}, loaded {}",
        name,
        snapshot_version,
        loaded_version
    ))]
    SnapshotMismatch {
        name: String,
        snapshot_version: u64,
        loaded_version: u64,
    },

    /// A target's on-disk content does not match its recorded digest.
    #[snafu(display(
        "Target '{}' hash mismatch: expected {}, calculated {}",
        target,
        expected,
        calculated
    ))]
    TargetHashMismatch {
        target: String,
        expected: String,
        calculated: String,
    },

    /// A persisted per-file commit cursor references a commit no longer reachable from the
    /// repository's history.
    #[snafu(display("Cursor commit {} for '{}' is not reachable from history", commit, file))]
    CursorUnreachable { file: String, commit: String },

    // -- dependent repositories database --------------------------------------------------

    /// `repositories.json`, `mirrors.json`, or `dependencies.json` could not be parsed.
    #[snafu(display("Failed to parse {}: {}", what, source))]
    ReposDbParse {
        what: &'static str,
        source: serde_json::Error,
    },

    /// A dependent repository named in `dependencies.json` has no corresponding entry in
    /// `repositories.json`.
    #[snafu(display("Dependent repository '{}' has no known location", name))]
    ReposDbUnknownRepo { name: String },

    /// A repository name could not be split into an `org_name/repo_name` pair and carries no
    /// explicit `urls` override.
    #[snafu(display("Repository name '{}' is not of the form 'org/name'", name))]
    ReposDbBadName { name: String },
}
