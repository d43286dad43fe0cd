// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// Listing PC/SC readers failed at the transport level.
    #[snafu(display("Failed to list PC/SC readers: {}", source))]
    ListReaders { source: pcsc::Error },

    /// No attached reader matched the given hint, or none are attached at all.
    #[snafu(display(
        "No PIV smart card reader found{}",
        hint.as_deref().map_or_else(String::new, |h| format!(" matching '{h}'"))
    ))]
    ReaderNotFound { hint: Option<String> },

    /// Establishing the PC/SC context itself failed.
    #[snafu(display("Failed to establish PC/SC context: {}", source))]
    PcscContext { source: pcsc::Error },

    /// Connecting to a specific reader by name failed.
    #[snafu(display("Failed to connect to reader '{}': {}", reader, source))]
    PcscConnect { reader: String, source: pcsc::Error },

    /// Transmitting an APDU to the card failed at the transport level.
    #[snafu(display("Failed to transmit APDU to card: {}", source))]
    Transmit { source: pcsc::Error },

    /// The card responded with a non-success status word to an APDU.
    #[snafu(display("Card rejected {} (status word {:04x})", operation, sw))]
    CardStatus { operation: &'static str, sw: u16 },

    /// The PIN was rejected. `retries` is `None` when the card reports the PIN is permanently
    /// blocked.
    #[snafu(display("Incorrect PIV PIN ({} retries remaining)", retries.map_or("0".to_string(), |r| r.to_string())))]
    WrongPin { retries: Option<u8> },

    /// No PIN was available and the configured `PinProvider` failed to supply one.
    #[snafu(display("Failed to obtain PIV PIN: {}", source))]
    PinProvider { source: tuf_archive::error::Error },

    /// The X.509 certificate held in the PIV slot could not be parsed.
    #[snafu(display("Failed to parse certificate in PIV slot {:02x}: {}", slot, reason))]
    CertParse { slot: u8, reason: String },

    /// The certificate's public key is not an RSA key, which is the only key type this signer
    /// speaks on the wire.
    #[snafu(display("PIV slot {:02x} does not hold an RSA public key", slot))]
    NotRsa { slot: u8 },

    /// Deriving the canonical `tuf_archive` keyid for the slot's public key failed.
    #[snafu(display("Failed to compute keyid for PIV slot {:02x}: {}", slot, source))]
    KeyId { slot: u8, source: tuf_archive::schema::Error },

    /// The digest to be signed, once `DigestInfo`-wrapped, does not leave enough room for
    /// PKCS#1 v1.5 padding within the key's modulus.
    #[snafu(display(
        "Digest of {} bytes is too large to PKCS#1 v1.5-pad into a {}-byte modulus",
        digest_len,
        modulus_bytes
    ))]
    DigestTooLarge { digest_len: usize, modulus_bytes: usize },
}
