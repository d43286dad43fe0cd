// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides an abstraction over the source of a signing key. This allows signing keys to be
//! obtained from, for example, local files or a hardware PIV token (see `tuf-archive-piv`).

use crate::error::{self, Result};
use crate::sign::{parse_keypair, Sign};
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::PathBuf;

/// This trait should be implemented for each source of signing keys.
pub trait KeySource: Debug + Send + Sync {
    /// Returns an object that implements the `Sign` trait.
    fn as_sign(&self) -> Result<Box<dyn Sign>>;

    /// Writes a key back to the `KeySource`, if the source supports it.
    fn write(&self, value: &str, key_id_hex: &str) -> Result<()>;
}

/// Points to a local key using a filesystem path.
#[derive(Debug)]
pub struct LocalKeySource {
    /// The path to a local key file in PEM pkcs8 or RSA format.
    pub path: PathBuf,
    /// Optional password for the key file.
    pub password: Option<String>,
}

impl KeySource for LocalKeySource {
    fn as_sign(&self) -> Result<Box<dyn Sign>> {
        let data = std::fs::read(&self.path).context(error::FileReadSnafu { path: &self.path })?;
        let password: Option<&str> = self.password.as_deref();
        Ok(Box::new(parse_keypair(&data, password)?))
    }

    fn write(&self, value: &str, _key_id_hex: &str) -> Result<()> {
        std::fs::write(&self.path, value.as_bytes())
            .context(error::FileWriteSnafu { path: &self.path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn as_sign_fails_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let source = LocalKeySource { path: dir.path().join("nope.pem"), password: None };
        assert!(source.as_sign().is_err());
    }

    #[test]
    fn as_sign_fails_for_unrecognized_pem_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cert.pem");
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").unwrap();

        let source = LocalKeySource { path, password: None };
        assert!(source.as_sign().is_err());
    }

    #[test]
    fn write_round_trips_through_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pem");
        let source = LocalKeySource { path: path.clone(), password: None };

        source.write("some key material", "deadbeef").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "some key material");
    }
}
