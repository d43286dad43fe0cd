// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small iterator helpers used by the schema types.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use std::collections::HashMap;
use std::slice::Iter;

/// Iterates over the `Key`s referenced by a list of keyids, looking each one up in a key map.
/// Keyids with no corresponding entry in the map are silently skipped; callers that care about
/// dangling keyids should check `UnknownKeyId` separately during verification.
pub(crate) struct KeysIter<'a> {
    pub(crate) keyids_iter: Iter<'a, Decoded<Hex>>,
    pub(crate) keys: &'a HashMap<Decoded<Hex>, Key>,
}

impl<'a> Iterator for KeysIter<'a> {
    type Item = &'a Key;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let keyid = self.keyids_iter.next()?;
            if let Some(key) = self.keys.get(keyid) {
                return Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{RsaKey, RsaScheme};

    fn key(id: u8) -> Key {
        Key::Rsa {
            keyval: RsaKey { public: vec![id; 4].into(), _extra: HashMap::new() },
            scheme: RsaScheme::RsaPkcs1v15Sha256,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn skips_keyids_with_no_matching_key() {
        let present: Decoded<Hex> = vec![1, 2, 3].into();
        let dangling: Decoded<Hex> = vec![9, 9, 9].into();
        let mut keys = HashMap::new();
        keys.insert(present.clone(), key(1));

        let keyids = vec![dangling, present];
        let found: Vec<&Key> = KeysIter { keyids_iter: keyids.iter(), keys: &keys }.collect();
        assert_eq!(found.len(), 1);
    }
}
