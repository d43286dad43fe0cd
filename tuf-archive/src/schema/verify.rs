// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold signature verification over a role's canonical byte form.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{RoleType, Signature};
use aws_lc_rs::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};
use snafu::{ensure, OptionExt};
use std::collections::{HashMap, HashSet};

/// Verifies that `signatures` over `canonical_bytes` meet `threshold`, where only keyids present
/// in `authorized` are counted and each keyid is counted at most once (order-insensitive,
/// deduplicated by keyid, matching the edit session's re-signing semantics).
pub(crate) fn verify_threshold(
    role: RoleType,
    canonical_bytes: &[u8],
    signatures: &[Signature],
    authorized: &HashMap<Decoded<Hex>, Key>,
    threshold: u64,
) -> Result<()> {
    let mut valid_keyids = HashSet::new();

    for sig in signatures {
        let Some(key) = authorized.get(&sig.keyid) else {
            continue;
        };
        if verify_one(key, canonical_bytes, &sig.sig).is_ok() {
            valid_keyids.insert(sig.keyid.clone());
        }
    }

    ensure!(
        valid_keyids.len() as u64 >= threshold,
        error::SignatureThresholdSnafu {
            role,
            valid: valid_keyids.len() as u64,
            threshold,
        }
    );
    Ok(())
}

/// Verifies a single signature against a single key. Only the fixed `rsa-pkcs1v15-sha256` scheme
/// is implemented; this system permits no randomised scheme on the wire.
fn verify_one(key: &Key, message: &[u8], sig: &Decoded<Hex>) -> Result<()> {
    let Key::Rsa { keyval, .. } = key;
    let public_key = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, keyval.public.as_ref());
    public_key
        .verify(message, sig.as_ref())
        .ok()
        .context(error::SignatureVerificationFailedSnafu {
            keyid: hex::encode(sig.as_ref()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{RsaKey, RsaScheme};

    fn rsa_key(public: &[u8]) -> Key {
        Key::Rsa {
            keyval: RsaKey { public: public.to_vec().into(), _extra: HashMap::new() },
            scheme: RsaScheme::RsaPkcs1v15Sha256,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn empty_signature_list_fails_any_nonzero_threshold() {
        let keyid: Decoded<Hex> = vec![1, 2, 3].into();
        let mut authorized = HashMap::new();
        authorized.insert(keyid, rsa_key(&[0u8; 256]));

        let result = verify_threshold(RoleType::Targets, b"message", &[], &authorized, 1);
        assert!(result.is_err());
    }

    #[test]
    fn signature_from_unauthorized_keyid_is_ignored() {
        let authorized_keyid: Decoded<Hex> = vec![1, 2, 3].into();
        let mut authorized = HashMap::new();
        authorized.insert(authorized_keyid, rsa_key(&[0u8; 256]));

        let stray_sig = Signature {
            keyid: vec![9, 9, 9].into(),
            sig: vec![0u8; 256].into(),
        };
        let result = verify_threshold(RoleType::Targets, b"message", &[stray_sig], &authorized, 1);
        assert!(result.is_err());
    }

    #[test]
    fn garbage_signature_does_not_meet_threshold() {
        let keyid: Decoded<Hex> = vec![1, 2, 3].into();
        let mut authorized = HashMap::new();
        authorized.insert(keyid.clone(), rsa_key(&[0u8; 256]));

        let sig = Signature { keyid, sig: vec![0u8; 256].into() };
        let result = verify_threshold(RoleType::Targets, b"message", &[sig], &authorized, 1);
        assert!(result.is_err());
    }
}
