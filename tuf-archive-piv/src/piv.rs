// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw PC/SC access to a PIV smart card: applet selection, PIN verification, certificate
//! retrieval, and RSA signing via `GENERAL AUTHENTICATE`, following NIST SP 800-73-4. There is
//! no Rust binding for `ykman`'s PIV session in this workspace's dependency stack, so these
//! APDUs are built and parsed by hand, the same operations `yubikey.py`'s `PivSession` calls
//! wrap.

use crate::error::{self, Result};
use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use snafu::{OptionExt, ResultExt};

const PIV_AID: [u8; 11] = [
    0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00,
];

/// The PIV key reference for the Digital Signature slot (9C), the slot `yubikey.py` signs with.
pub const SLOT_SIGNATURE: u8 = 0x9c;

const ALG_RSA2048: u8 = 0x07;
const RSA2048_MODULUS_BYTES: usize = 256;

fn cert_tag_for_slot(slot: u8) -> Result<[u8; 3]> {
    match slot {
        0x9a => Ok([0x5f, 0xc1, 0x05]),
        SLOT_SIGNATURE => Ok([0x5f, 0xc1, 0x0a]),
        0x9d => Ok([0x5f, 0xc1, 0x0b]),
        0x9e => Ok([0x5f, 0xc1, 0x01]),
        _ => error::CertParseSnafu {
            slot,
            reason: "unsupported PIV slot".to_string(),
        }
        .fail(),
    }
}

/// An open PC/SC connection to one PIV-capable smart card.
pub struct PivCard {
    card: Card,
}

impl std::fmt::Debug for PivCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PivCard").finish_non_exhaustive()
    }
}

impl PivCard {
    /// Connects to the first PC/SC reader reporting a card, or the reader whose name contains
    /// `reader_hint` if given, and selects the PIV applet.
    pub fn connect(reader_hint: Option<&str>) -> Result<Self> {
        let ctx = Context::establish(Scope::User).context(error::PcscContextSnafu)?;

        let mut readers_buf = [0u8; 2048];
        let mut readers = ctx
            .list_readers(&mut readers_buf)
            .context(error::ListReadersSnafu)?;

        let reader = match reader_hint {
            Some(hint) => readers
                .find(|r| r.to_string_lossy().contains(hint))
                .context(error::ReaderNotFoundSnafu {
                    hint: Some(hint.to_string()),
                })?,
            None => readers.next().context(error::ReaderNotFoundSnafu { hint: None })?,
        };

        let card = ctx
            .connect(reader, ShareMode::Shared, Protocols::ANY)
            .context(error::PcscConnectSnafu {
                reader: reader.to_string_lossy().into_owned(),
            })?;

        let piv = Self { card };
        piv.select_applet()?;
        Ok(piv)
    }

    fn transmit(&self, apdu: &[u8], operation: &'static str) -> Result<Vec<u8>> {
        let mut response = [0u8; MAX_BUFFER_SIZE];
        let response = self
            .card
            .transmit(apdu, &mut response)
            .context(error::TransmitSnafu)?;

        let len = response.len();
        let sw = u16::from_be_bytes([response[len - 2], response[len - 1]]);
        if sw != 0x9000 {
            return error::CardStatusSnafu { operation, sw }.fail();
        }
        Ok(response[..len - 2].to_vec())
    }

    fn select_applet(&self) -> Result<()> {
        let mut apdu = vec![0x00, 0xa4, 0x04, 0x00, PIV_AID.len() as u8];
        apdu.extend_from_slice(&PIV_AID);
        self.transmit(&apdu, "SELECT PIV applet").map(|_| ())
    }

    /// Verifies the PIV PIN. On failure, returns [`error::Error::WrongPin`] with the remaining
    /// retry count parsed from the card's status word (`63 0N`), or `None` if the PIN is
    /// permanently blocked (`69 83`).
    pub fn verify_pin(&self, pin: &str) -> Result<()> {
        let mut data = pin.as_bytes().to_vec();
        data.resize(8, 0xff);
        let mut apdu = vec![0x00, 0x20, 0x00, 0x80, data.len() as u8];
        apdu.extend_from_slice(&data);

        match self.transmit(&apdu, "VERIFY PIN") {
            Ok(_) => Ok(()),
            Err(error::Error::CardStatus { sw, .. }) if sw & 0xfff0 == 0x63c0 => {
                error::WrongPinSnafu {
                    retries: Some((sw & 0x000f) as u8),
                }
                .fail()
            }
            Err(error::Error::CardStatus { sw, .. }) if sw == 0x6983 => {
                error::WrongPinSnafu { retries: None }.fail()
            }
            Err(other) => Err(other),
        }
    }

    /// Reads the DER-encoded X.509 certificate held in `slot`, stripped of the PIV data object's
    /// outer BER-TLV wrapper.
    pub fn read_certificate(&self, slot: u8) -> Result<Vec<u8>> {
        let tag = cert_tag_for_slot(slot)?;
        let mut data = vec![0x5c, 0x03];
        data.extend_from_slice(&tag);
        let mut apdu = vec![0x00, 0xcb, 0x3f, 0xff, data.len() as u8];
        apdu.extend_from_slice(&data);

        let object = self.transmit(&apdu, "GET DATA")?;
        extract_cert_der(&object, slot)
    }

    /// Signs `digest` (already hashed, e.g. SHA-256) using the RSA-2048 key in `slot`, via
    /// `GENERAL AUTHENTICATE`. The card expects a full modulus-size PKCS#1 v1.5 padded block, not
    /// the bare digest, so `digest` is padded here before transmission.
    pub fn sign_rsa_pkcs1v15(&self, slot: u8, digest: &[u8]) -> Result<Vec<u8>> {
        let padded = pkcs1v15_pad_sha256(digest, RSA2048_MODULUS_BYTES)?;

        let mut challenge = vec![0x81, padded.len() as u8];
        challenge.extend_from_slice(&padded);
        let mut template = vec![0x82, 0x00];
        template.extend_from_slice(&challenge);

        let mut data = vec![0x7c, template.len() as u8];
        data.extend_from_slice(&template);

        let mut apdu = vec![0x00, 0x87, ALG_RSA2048, slot, data.len() as u8];
        apdu.extend_from_slice(&data);
        apdu.push(0x00);

        let response = self.transmit(&apdu, "GENERAL AUTHENTICATE")?;
        extract_auth_response(&response)
    }
}

/// Parses the one-byte-tag, short-or-long-length TLV the card returns for `GET DATA`, unwrapping
/// the outer `53` (data object) and inner `70` (certificate) tags down to the raw DER.
fn extract_cert_der(object: &[u8], slot: u8) -> Result<Vec<u8>> {
    let (outer_tag, outer_value) = read_tlv(object).context(error::CertParseSnafu {
        slot,
        reason: "malformed data object TLV".to_string(),
    })?;
    if outer_tag != 0x53 {
        return error::CertParseSnafu {
            slot,
            reason: format!("unexpected outer tag {outer_tag:02x}"),
        }
        .fail();
    }
    let (inner_tag, inner_value) = read_tlv(outer_value).context(error::CertParseSnafu {
        slot,
        reason: "malformed certificate TLV".to_string(),
    })?;
    if inner_tag != 0x70 {
        return error::CertParseSnafu {
            slot,
            reason: format!("unexpected certificate tag {inner_tag:02x}"),
        }
        .fail();
    }
    Ok(inner_value.to_vec())
}

/// Parses the `7c` dynamic authentication template the card returns, pulling out the `82`
/// response tag's raw signature bytes.
fn extract_auth_response(response: &[u8]) -> Result<Vec<u8>> {
    let (tag, value) = read_tlv(response).context(error::CertParseSnafu {
        slot: 0u8,
        reason: "malformed authentication template".to_string(),
    })?;
    if tag != 0x7c {
        return error::CertParseSnafu {
            slot: 0u8,
            reason: format!("unexpected response tag {tag:02x}"),
        }
        .fail();
    }
    let (inner_tag, inner_value) = read_tlv(value).context(error::CertParseSnafu {
        slot: 0u8,
        reason: "malformed authentication response".to_string(),
    })?;
    if inner_tag != 0x82 {
        return error::CertParseSnafu {
            slot: 0u8,
            reason: format!("unexpected signature tag {inner_tag:02x}"),
        }
        .fail();
    }
    Ok(inner_value.to_vec())
}

/// Reads one BER-TLV element (tag, length, value) from the front of `data`, supporting one- and
/// two-byte lengths (`0x81 len`) since PIV certificates routinely exceed 127 bytes.
fn read_tlv(data: &[u8]) -> Option<(u8, &[u8])> {
    let tag = *data.first()?;
    let rest = &data[1..];
    let (len, rest) = match *rest.first()? {
        0x81 => (*rest.get(1)? as usize, &rest[2..]),
        0x82 => {
            let len = u16::from_be_bytes([*rest.get(1)?, *rest.get(2)?]) as usize;
            (len, &rest[3..])
        }
        short => (short as usize, &rest[1..]),
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len]))
}

/// The DER prefix identifying a SHA-256 `DigestInfo`, per PKCS#1 v1.5 / RFC 8017 appendix.
const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// Builds an `EMSA-PKCS1-v1_5` padded block of `modulus_bytes` for a SHA-256 `digest`, the format
/// PIV cards expect `GENERAL AUTHENTICATE` to receive for an RSA sign operation.
fn pkcs1v15_pad_sha256(digest: &[u8], modulus_bytes: usize) -> Result<Vec<u8>> {
    let digest_info_len = SHA256_DIGEST_INFO_PREFIX.len() + digest.len();
    let padding_len = modulus_bytes
        .checked_sub(digest_info_len + 3)
        .context(error::DigestTooLargeSnafu {
            digest_len: digest.len(),
            modulus_bytes,
        })?;

    let mut block = Vec::with_capacity(modulus_bytes);
    block.push(0x00);
    block.push(0x01);
    block.extend(std::iter::repeat(0xff).take(padding_len));
    block.push(0x00);
    block.extend_from_slice(&SHA256_DIGEST_INFO_PREFIX);
    block.extend_from_slice(digest);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkcs1v15_padding_is_modulus_sized() {
        let digest = [0u8; 32];
        let padded = pkcs1v15_pad_sha256(&digest, 256).unwrap();
        assert_eq!(padded.len(), 256);
        assert_eq!(&padded[0..2], &[0x00, 0x01]);
        assert_eq!(padded[padded.len() - 32..], digest);
    }

    #[test]
    fn pkcs1v15_padding_rejects_oversized_digest() {
        let digest = [0u8; 256];
        assert!(pkcs1v15_pad_sha256(&digest, 256).is_err());
    }

    #[test]
    fn cert_tag_lookup_covers_standard_slots() {
        assert_eq!(cert_tag_for_slot(0x9a).unwrap(), [0x5f, 0xc1, 0x05]);
        assert_eq!(cert_tag_for_slot(SLOT_SIGNATURE).unwrap(), [0x5f, 0xc1, 0x0a]);
        assert_eq!(cert_tag_for_slot(0x9d).unwrap(), [0x5f, 0xc1, 0x0b]);
        assert_eq!(cert_tag_for_slot(0x9e).unwrap(), [0x5f, 0xc1, 0x01]);
        assert!(cert_tag_for_slot(0x00).is_err());
    }

    #[test]
    fn tlv_roundtrip_short_and_long_lengths() {
        let short = [0x70, 0x02, 0xaa, 0xbb];
        assert_eq!(read_tlv(&short), Some((0x70, &short[2..])));

        let mut long = vec![0x70, 0x82, 0x01, 0x00];
        long.extend(std::iter::repeat(0xaa).take(256));
        let (tag, value) = read_tlv(&long).unwrap();
        assert_eq!(tag, 0x70);
        assert_eq!(value.len(), 256);
    }

    #[test]
    fn extract_cert_der_unwraps_nested_tlv() {
        let der = [0xaa, 0xbb, 0xcc];
        let mut inner = vec![0x70, der.len() as u8];
        inner.extend_from_slice(&der);
        let mut outer = vec![0x53, inner.len() as u8];
        outer.extend_from_slice(&inner);

        let extracted = extract_cert_der(&outer, SLOT_SIGNATURE).unwrap();
        assert_eq!(extracted, der);
    }

    #[test]
    fn extract_auth_response_unwraps_signature_tag() {
        let sig = [0x11u8; 4];
        let mut inner = vec![0x82, sig.len() as u8];
        inner.extend_from_slice(&sig);
        let mut outer = vec![0x7c, inner.len() as u8];
        outer.extend_from_slice(&inner);

        let extracted = extract_auth_response(&outer).unwrap();
        assert_eq!(extracted, sig);
    }
}
