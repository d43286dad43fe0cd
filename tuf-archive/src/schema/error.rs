// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors that can occur while parsing, serializing, or validating role schema objects.

use crate::schema::decoded::{Decoded, Hex};
use snafu::{Backtrace, Snafu};

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the `schema` module.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A role object could not be serialized to its canonical JSON form.
    #[snafu(display("Failed to canonically serialize {}: {}", what, source))]
    JsonSerialization {
        what: &'static str,
        source: serde_json::Error,
    },

    /// A key's declared `keyid` does not match the keyid computed from its contents.
    #[snafu(display("Key ID mismatch: {} was labeled {}", calculated, keyid))]
    InvalidKeyId { keyid: String, calculated: String },

    /// Two distinct keys in the same map claim the same keyid.
    #[snafu(display("Found two keys with the same key ID: {}", keyid))]
    DuplicateKeyId { keyid: String },

    /// A public key's PEM could not be decoded.
    #[snafu(display("Failed to parse public key PEM: {}", source))]
    PemParse { source: pem::PemError },

    /// A role's signature could not be verified against any of its authorised keys.
    #[snafu(display("No valid signature found for keyid {}", keyid))]
    SignatureNotFound { keyid: String },

    /// A signature was present but failed cryptographic verification.
    #[snafu(display("Signature verification failed for keyid {}", keyid))]
    SignatureVerificationFailed {
        keyid: String,
        backtrace: Backtrace,
    },

    /// A role carries fewer valid signatures than its declared threshold requires.
    #[snafu(display(
        "Signature threshold not met: {} of {} required valid signatures found for {:?}",
        valid,
        threshold,
        role
    ))]
    SignatureThreshold {
        role: crate::schema::RoleType,
        valid: u64,
        threshold: u64,
    },

    /// A signature's keyid is not among the role's authorised keys.
    #[snafu(display("Key ID {:?} is not authorised for this role", keyid))]
    UnknownKeyId { keyid: Decoded<Hex> },

    /// A path supplied to `Target::from_path` is not a regular file.
    #[snafu(display("Path '{}' is not a file", path.display()))]
    TargetNotAFile { path: std::path::PathBuf },

    /// A target file could not be opened for digesting.
    #[snafu(display("Failed to open '{}': {}", path.display(), source))]
    FileOpen {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// A target file could not be fully read while digesting.
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// A named target could not be found in this role or any of its delegations.
    #[snafu(display("Target file not found: {}", target_file))]
    TargetNotFound { target_file: String },

    /// A named role could not be found while walking the delegation graph.
    #[snafu(display("Role not found: {}", name))]
    RoleNotFound { name: String },

    /// A delegated role has no cached `Signed<Targets>` loaded to search.
    #[snafu(display("No delegations loaded for this role"))]
    NoDelegations,

    /// A delegated role declares a path not covered by its parent's own paths.
    #[snafu(display("Path '{}' is not delegated by the parent role", child))]
    UnmatchedPath { child: String },
}
