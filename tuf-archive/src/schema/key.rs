// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Key` type and its legacy keyid derivation.
//!
//! Only RSA keys with the `rsa-pkcs1v15-sha256` scheme are accepted on the wire; this is a
//! compatibility obligation with existing historical metadata, not a general-purpose limitation.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use aws_lc_rs::digest::{digest, SHA256};
use olpc_cjson::CanonicalFormatter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;

/// The one signature scheme this system speaks on the wire. Deterministic RSA PKCS#1 v1.5 over
/// SHA-256; no randomised scheme is permitted for archival compatibility.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RsaScheme {
    /// `rsa-pkcs1v15-sha256`
    RsaPkcs1v15Sha256,
}

forward_display_to_serde!(RsaScheme);
forward_from_str_to_serde!(RsaScheme);

/// The raw key material for an RSA key: the public key bytes (SPKI DER, PKCS#8-derived).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RsaKey {
    /// The RSA public key, DER-encoded.
    pub public: Decoded<Hex>,

    /// Extra fields found during deserialization; round-tripped so keyid computation is stable.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// A public key as it appears in `root.json` or a delegation's `keys` map.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype", rename_all = "kebab-case")]
pub enum Key {
    /// An RSA key.
    Rsa {
        /// The key material.
        keyval: RsaKey,
        /// The signing scheme this key is authorised for.
        scheme: RsaScheme,
        /// Extra fields found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// The exact JSON shape that is canonicalized and hashed to derive a keyid. Any implementation
/// that produces a different keyid for the same PEM breaks archival verification.
#[derive(Serialize)]
struct KeyIdLayout<'a> {
    keytype: &'a str,
    scheme: &'a str,
    keyval: KeyIdLayoutVal<'a>,
    keyid_hash_algorithms: [&'static str; 2],
}

#[derive(Serialize)]
struct KeyIdLayoutVal<'a> {
    public: &'a str,
}

impl Key {
    /// Computes the legacy keyid for this key: the SHA-256 of the canonical JSON encoding of
    /// `{keytype, scheme, keyval: {public}, keyid_hash_algorithms: [sha256, sha512]}`.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let (keytype, scheme, public_pem) = match self {
            Key::Rsa { keyval, scheme, .. } => {
                let pem_str = pem::encode(&pem::Pem::new(
                    "PUBLIC KEY".to_owned(),
                    keyval.public.to_vec(),
                ));
                let scheme_str = match scheme {
                    RsaScheme::RsaPkcs1v15Sha256 => "rsa-pkcs1v15-sha256",
                };
                ("rsa", scheme_str, pem_str)
            }
        };

        let layout = KeyIdLayout {
            keytype,
            scheme,
            keyval: KeyIdLayoutVal {
                public: public_pem.trim(),
            },
            keyid_hash_algorithms: ["sha256", "sha512"],
        };

        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        layout
            .serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "keyid" })?;

        Ok(digest(&SHA256, &data).as_ref().to_vec().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Key {
        Key::Rsa {
            keyval: RsaKey {
                public: vec![0x01, 0x02, 0x03, 0x04].into(),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsaPkcs1v15Sha256,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn key_id_is_deterministic() {
        let key = sample_key();
        assert_eq!(key.key_id().unwrap(), sample_key().key_id().unwrap());
    }

    #[test]
    fn key_id_differs_for_different_public_bytes() {
        let a = sample_key();
        let b = Key::Rsa {
            keyval: RsaKey {
                public: vec![0x05, 0x06, 0x07, 0x08].into(),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsaPkcs1v15Sha256,
            _extra: HashMap::new(),
        };
        assert_ne!(a.key_id().unwrap(), b.key_id().unwrap());
    }
}
