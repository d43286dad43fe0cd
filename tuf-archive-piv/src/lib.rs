// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf-archive-piv` implements the `KeySource` and `Sign` traits found in [`tuf-archive`] for
//! keys held on a PIV smart card (e.g. a YubiKey), so a card can become a source of signing keys
//! for an authentication repository. It speaks raw PC/SC APDUs; `tuf-archive`'s stack doesn't
//! carry a dependency on `ykman`, so the PIV protocol operations that library's `PivSession`
//! wraps are reimplemented here directly over PC/SC (see [`piv`]).
//!
//! # Testing
//!
//! Unit tests exercise the PKCS#1 padding and TLV parsing helpers without a card attached.
//! Anything that actually talks to PC/SC requires a physical token and is not covered here.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod error;
pub mod piv;

use crate::error::{self, Result};
use crate::piv::PivCard;
use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::rand::SecureRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tuf_archive::key_source::KeySource;
use tuf_archive::pin::PinProvider;
use tuf_archive::schema::key::{Key, RsaKey, RsaScheme};
use tuf_archive::sign::Sign;

/// Points to a signing key held in a PIV card's slot, to be resolved to a connected [`PivCard`]
/// and PIN at sign time rather than held open for the process lifetime.
pub struct PivKeySource {
    /// If given, only readers whose name contains this substring are considered.
    pub reader_hint: Option<String>,
    /// The PIV key reference to sign with, e.g. [`piv::SLOT_SIGNATURE`].
    pub slot: u8,
    /// The card's serial number, used as the cache key for the PIN.
    pub serial: String,
    /// Supplies the PIN if it isn't already cached.
    pub pin_provider: Arc<dyn PinProvider>,
}

impl std::fmt::Debug for PivKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PivKeySource")
            .field("reader_hint", &self.reader_hint)
            .field("slot", &self.slot)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl KeySource for PivKeySource {
    fn as_sign(&self) -> tuf_archive::error::Result<Box<dyn Sign>> {
        let card = PivCard::connect(self.reader_hint.as_deref())
            .map_err(piv_error)?;
        let cert_der = card.read_certificate(self.slot).map_err(piv_error)?;
        let public = extract_rsa_public_key(&cert_der, self.slot).map_err(piv_error)?;

        Ok(Box::new(PivSigner {
            reader_hint: self.reader_hint.clone(),
            slot: self.slot,
            serial: self.serial.clone(),
            pin_provider: Arc::clone(&self.pin_provider),
            public,
        }))
    }

    fn write(&self, _value: &str, _key_id_hex: &str) -> tuf_archive::error::Result<()> {
        // A PIV card's private key material never leaves the token; there is nothing to write
        // back.
        Ok(())
    }
}

/// Signs with the RSA private key in a PIV card's slot. Connects to the card fresh for every
/// `sign` call; PIV cards don't expose a "keep session open across calls" primitive that's safe
/// to rely on once the card may be removed and reinserted between edits.
pub struct PivSigner {
    reader_hint: Option<String>,
    slot: u8,
    serial: String,
    pin_provider: Arc<dyn PinProvider>,
    public: RsaKey,
}

impl std::fmt::Debug for PivSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PivSigner")
            .field("slot", &self.slot)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl Sign for PivSigner {
    fn tuf_key(&self) -> Key {
        Key::Rsa {
            keyval: self.public.clone(),
            scheme: RsaScheme::RsaPkcs1v15Sha256,
            _extra: HashMap::new(),
        }
    }

    fn sign(
        &self,
        msg: &[u8],
        _rng: &(dyn SecureRandom + Sync),
    ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let card = PivCard::connect(self.reader_hint.as_deref())?;
        let pin = self.pin_provider.pin(&self.serial)?;
        card.verify_pin(&pin)?;

        let hashed = digest(&SHA256, msg);
        Ok(card.sign_rsa_pkcs1v15(self.slot, hashed.as_ref())?)
    }
}

/// Extracts the RSA public key bytes from `cert_der`'s `SubjectPublicKeyInfo` in the same raw
/// form `aws_lc_rs::signature::RsaKeyPair::public_key()` produces, so PIV-backed and file-backed
/// keys derive identical keyids for the same key material.
fn extract_rsa_public_key(cert_der: &[u8], slot: u8) -> Result<RsaKey> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| error::Error::CertParse {
            slot,
            reason: e.to_string(),
        })?;
    let spki = cert.public_key();
    if spki.algorithm.algorithm != x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION {
        return Err(error::Error::NotRsa { slot });
    }
    Ok(RsaKey {
        public: spki.subject_public_key.data.to_vec().into(),
        _extra: HashMap::new(),
    })
}

fn piv_error(source: error::Error) -> tuf_archive::error::Error {
    tuf_archive::error::Error::KeyPairFromKeySource { source: Box::new(source) }
}

