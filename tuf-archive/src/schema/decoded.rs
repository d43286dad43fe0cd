// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A generic wrapper for byte strings that are serialized/deserialized as hex in JSON, used for
//! keyids, signatures, and raw key material.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A marker type describing how a `Decoded<T>` is encoded to and decoded from a string.
pub trait Encoding {
    /// Decodes a string into bytes.
    fn decode(s: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>>;
    /// Encodes bytes into a string.
    fn encode(bytes: &[u8]) -> String;
}

/// Hex encoding, used throughout the on-disk metadata format for keyids, signatures, and
/// raw public key bytes.
#[derive(Debug, Clone, Copy)]
pub struct Hex;

impl Encoding for Hex {
    fn decode(s: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(hex::decode(s)?)
    }

    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }
}

/// A byte string that serializes as a string using some `Encoding`, e.g. hex.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decoded<T> {
    bytes: Vec<u8>,
    spooky: std::marker::PhantomData<T>,
}

impl<T> Decoded<T> {
    /// Consumes this wrapper, returning the raw bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        Decoded {
            bytes,
            spooky: std::marker::PhantomData,
        }
    }
}

impl<T> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> DerefMut for Decoded<T> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl<T> fmt::Debug for Decoded<T>
where
    T: Encoding,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", T::encode(&self.bytes))
    }
}

impl<T> Serialize for Decoded<T>
where
    T: Encoding,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&T::encode(&self.bytes))
    }
}

impl<'de, T> Deserialize<'de> for Decoded<T>
where
    T: Encoding,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = T::decode(&s).map_err(D::Error::custom)?;
        Ok(Decoded {
            bytes,
            spooky: std::marker::PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_json_round_trip() {
        let decoded: Decoded<Hex> = vec![0xde, 0xad, 0xbe, 0xef].into();
        let json = serde_json::to_string(&decoded).unwrap();
        assert_eq!(json, "\"deadbeef\"");

        let back: Decoded<Hex> = serde_json::from_str(&json).unwrap();
        assert_eq!(&*back, &[0xde, 0xad, 0xbe, 0xef][..]);
    }

    #[test]
    fn rejects_non_hex_strings() {
        let result: Result<Decoded<Hex>, _> = serde_json::from_str("\"not hex\"");
        assert!(result.is_err());
    }
}
