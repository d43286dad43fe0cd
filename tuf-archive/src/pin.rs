// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A process-local PIN cache for hardware-token signers, keyed by token serial number.
//!
//! The cache is meant to live for the lifetime of a single "pin-managed" session (an edit
//! session that may touch a hardware-backed role more than once); it is actively zeroized on
//! every exit path, including early returns via `?`, by virtue of the `Drop` impl on
//! `CachedPin`.

use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use zeroize::Zeroize;

/// A PIN held in memory only as long as its `PinCache` entry lives.
#[derive(Clone)]
struct CachedPin(String);

impl Drop for CachedPin {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Caches hardware-token PINs for the duration of a pin-managed session. Construct one per edit
/// session; drop it (or call `clear()`) as soon as the session ends so cached PINs don't outlive
/// their need.
#[derive(Default)]
pub struct PinCache {
    pins: Mutex<HashMap<String, CachedPin>>,
}

impl std::fmt::Debug for PinCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCache").finish_non_exhaustive()
    }
}

impl PinCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached PIN for `serial`, if any.
    pub fn get(&self, serial: &str) -> Option<String> {
        self.pins
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(serial)
            .map(|p| p.0.clone())
    }

    /// Stores `pin` for `serial`, replacing any previous entry (which is zeroized as it drops).
    pub fn put(&self, serial: &str, pin: String) {
        debug!("caching PIN for token serial {serial}");
        self.pins
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(serial.to_string(), CachedPin(pin));
    }

    /// Actively zeroizes and drops every cached PIN. Called on every exit path of a
    /// pin-managed session, not only on normal completion.
    pub fn clear(&self) {
        self.pins
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

impl Drop for PinCache {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Obtains a PIN for a hardware signer: a prompt callback invoked at most once per serial per
/// cache lifetime. `tuf-archive-piv` implements the prompting; this crate only defines the
/// shape of the callback and the cache that backs it.
pub trait PinProvider: Send + Sync {
    /// Prompts for (or otherwise retrieves) the PIN for `serial`.
    fn pin(&self, serial: &str) -> crate::error::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_clears() {
        let cache = PinCache::new();
        assert!(cache.get("1234").is_none());
        cache.put("1234", "000000".to_string());
        assert_eq!(cache.get("1234").as_deref(), Some("000000"));
        cache.clear();
        assert!(cache.get("1234").is_none());
    }
}
