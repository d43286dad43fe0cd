// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `SignedRole` and `SignedRepository`: the output of an edit session, ready to be written to
//! the working tree of a git-backed authentication repository and committed.

use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::repo::keys::{get_root_keys, get_targets_keys};
use crate::schema::{Delegations, Role, RoleType, Root, Signature, Signed, Targets};
use aws_lc_rs::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use aws_lc_rs::rand::SecureRandom;
use log::debug;
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::Path;

/// A signed role, including its serialized form (`buffer`), which is what must be written to
/// disk. `sha256` and `length` are computed from this exact buffer and are what get embedded
/// in a parent role's metadata entry, so the buffer is the single source of truth.
#[derive(Debug, Clone)]
pub struct SignedRole<T> {
    pub(crate) signed: Signed<T>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) sha256: [u8; SHA256_OUTPUT_LEN],
    pub(crate) length: u64,
}

impl<T> SignedRole<T>
where
    T: Role + Serialize,
{
    /// Signs `role` with whichever of `keys` are authorized for `T::TYPE` in `root`.
    pub fn new(role: T, root: &Root, keys: &[Box<dyn KeySource>], rng: &dyn SecureRandom) -> Result<Self> {
        let root_keys = get_root_keys(root, keys)?;
        let role_keys = root
            .roles
            .get(&T::TYPE)
            .context(error::NoRoleKeysinRootSnafu { role: T::TYPE })?;

        let (signing_key_id, signing_key) = root_keys
            .iter()
            .find(|(keyid, _)| role_keys.keyids.contains(keyid))
            .context(error::SigningKeysNotFoundSnafu { role: T::TYPE })?;

        sign_and_wrap(role, signing_key_id, signing_key.as_ref(), rng)
    }

    /// Signs `role` (a delegated targets role named `role_name`) with whichever of `keys` are
    /// authorized for it in `delegations`.
    pub fn new_delegated(
        role: T,
        delegations: &Delegations,
        role_name: &str,
        keys: &[Box<dyn KeySource>],
        rng: &dyn SecureRandom,
    ) -> Result<Self> {
        let delegation_keys = get_targets_keys(delegations, keys)?;
        let delegated_role = delegations
            .role(role_name)
            .context(error::DelegateNotFoundSnafu { name: role_name })?;

        let (signing_key_id, signing_key) = delegation_keys
            .iter()
            .find(|(keyid, _)| delegated_role.keyids.contains(keyid))
            .context(error::SigningKeysNotFoundSnafu { role: RoleType::Targets })?;

        sign_and_wrap(role, signing_key_id, signing_key.as_ref(), rng)
    }

    /// Wraps an already-`Signed<T>` value (e.g. one loaded unchanged from history) without
    /// signing it again.
    pub fn from_signed(role: Signed<T>) -> Result<Self> {
        let mut buffer = serde_json::to_vec_pretty(&role).context(error::SerializeSignedRoleSnafu {
            role: T::TYPE,
        })?;
        buffer.push(b'\n');
        let length = buffer.len() as u64;
        let mut sha256 = [0; SHA256_OUTPUT_LEN];
        sha256.copy_from_slice(digest(&SHA256, &buffer).as_ref());
        Ok(SignedRole {
            signed: role,
            buffer,
            sha256,
            length,
        })
    }

    /// Signs every delegated `Targets` reachable from `targets_struct`'s delegation graph,
    /// re-using an existing signature (unmodified) when the provided `keys` don't cover a role
    /// and `require_all` is false.
    pub fn signed_delegated_map(
        targets_struct: &Targets,
        keys: &[Box<dyn KeySource>],
        rng: &dyn SecureRandom,
        require_all: bool,
    ) -> Result<HashMap<String, SignedRole<Targets>>> {
        let mut out = HashMap::new();
        let Some(delegations) = &targets_struct.delegations else {
            return Ok(out);
        };
        if delegations.roles.is_empty() {
            return Ok(out);
        }
        let delegation_keys = get_targets_keys(delegations, keys)?;

        for role in &delegations.roles {
            let Some(existing) = &role.targets else {
                continue;
            };
            let role_keys = role.keys();
            let signed_role = if let Some((keyid, signing_key)) = delegation_keys
                .iter()
                .find(|(keyid, _)| role_keys.keyids.contains(keyid))
            {
                debug!("signing delegated role '{}' with key {}", role.name, hex::encode(&**keyid));
                sign_and_wrap(existing.signed.clone(), keyid, signing_key.as_ref(), rng)?
            } else {
                if require_all {
                    delegations.verify(&role.name, existing)?;
                }
                SignedRole::from_signed(existing.clone())?
            };

            out.extend(SignedRole::<Targets>::signed_delegated_map(
                &signed_role.signed.signed,
                keys,
                rng,
                require_all,
            )?);
            out.insert(role.name.clone(), signed_role);
        }
        Ok(out)
    }

    /// The signed metadata object.
    pub fn signed(&self) -> &Signed<T> {
        &self.signed
    }

    /// The exact bytes that must be written to disk for this role.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The SHA-256 digest of `buffer()`.
    pub fn sha256(&self) -> &[u8] {
        &self.sha256
    }

    /// The length in bytes of `buffer()`.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Writes `buffer()` to `outdir/filename`.
    pub fn write<P: AsRef<Path>>(&self, outdir: P, filename: &str) -> Result<()> {
        let outdir = outdir.as_ref();
        std::fs::create_dir_all(outdir).context(error::DirCreateSnafu { path: outdir })?;
        let path = outdir.join(filename);
        std::fs::write(&path, &self.buffer).context(error::FileWriteSnafu { path })
    }
}

fn sign_and_wrap<T: Role + Serialize>(
    role: T,
    signing_key_id: &crate::schema::decoded::Decoded<crate::schema::decoded::Hex>,
    signing_key: &dyn crate::sign::Sign,
    rng: &dyn SecureRandom,
) -> Result<SignedRole<T>> {
    let mut signed = Signed {
        signed: role,
        signatures: Vec::new(),
    };

    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    signed
        .signed
        .serialize(&mut ser)
        .context(error::SerializeRoleSnafu { role: T::TYPE })?;
    let sig = signing_key.sign(&data, rng).context(error::SignSnafu)?;

    signed.signatures.push(Signature {
        keyid: signing_key_id.clone(),
        sig: sig.into(),
    });

    SignedRole::from_signed(signed)
}

/// The output of a completed edit session: every top-level role plus every signed delegated
/// `Targets`, ready to be written into the working tree of the authentication repository.
#[derive(Debug)]
pub struct SignedRepository {
    pub(crate) root: SignedRole<Root>,
    pub(crate) targets: SignedRole<Targets>,
    pub(crate) snapshot: SignedRole<crate::schema::Snapshot>,
    pub(crate) timestamp: SignedRole<crate::schema::Timestamp>,
    pub(crate) delegations: HashMap<String, SignedRole<Targets>>,
}

impl SignedRepository {
    /// Writes every role's metadata file into `outdir`, using plain (non-consistent-snapshot)
    /// filenames: `root.json`, `targets.json`, `snapshot.json`, `timestamp.json`, and
    /// `<name>.json` for each delegated role.
    pub fn write<P: AsRef<Path>>(&self, outdir: P) -> Result<()> {
        let outdir = outdir.as_ref();
        self.root.write(outdir, "root.json")?;
        self.targets.write(outdir, "targets.json")?;
        self.snapshot.write(outdir, "snapshot.json")?;
        self.timestamp.write(outdir, "timestamp.json")?;
        for (name, role) in &self.delegations {
            role.write(outdir, &format!("{name}.json"))?;
        }
        Ok(())
    }
}
