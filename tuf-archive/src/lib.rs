// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf-archive` maintains a long-lived, offline-verifiable chain of trust over a git
//! repository of [TUF]-style metadata: an authentication repository whose history can be
//! replayed from its very first commit, years later, without any of the replayed metadata being
//! rejected as expired.
//!
//! This client adheres to the broad shape of the [TUF specification], with deliberate
//! departures:
//!
//! * There is exactly one signature scheme, `rsa-pkcs1v15-sha256`; there is no scheme
//!   negotiation.
//! * Metadata lives in a git object store, not on an HTTP mirror; [`git`] and [`updater`] take
//!   the place of a network transport.
//! * A second client mode, the historical updater, treats every commit in a repository's
//!   history as its own TUF snapshot rather than only ever trusting the latest one. See
//!   [`updater::HistoricalUpdater`].
//!
//! # Modules
//!
//! - [`schema`] -- the TUF role types (`root`, `targets`, `snapshot`, `timestamp`) and their
//!   canonical-JSON and signature-verification primitives.
//! - [`repo`] -- [`repo::MetadataRepository`], the in-memory, mutable view of a role graph and
//!   its edit sessions.
//! - [`targets`] -- writing target files and resolving which role signs for a given path.
//! - [`scheduler`] -- the snapshot/timestamp cascade that follows every targets-family edit.
//! - [`git`] -- content-addressed access to the authentication repository's git history.
//! - [`updater`] -- the historical replay algorithm.
//! - [`reposdb`] -- `repositories.json` / `mirrors.json` / `dependencies.json`.
//! - [`clock`] -- the reference-time abstraction that lets live and historical verification
//!   share one code path.
//! - [`sign`] and [`key_source`] -- signing keys and where they come from.
//! - [`pin`] -- the PIN cache for hardware-token signers (see `tuf-archive-piv`).
//! - [`error`] -- the crate's error type.
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`.
//!
//! # Logging
//!
//! This crate emits diagnostic events through the [`log`] facade at `debug`/`info` level; it
//! does not install a logger itself. Applications that want to see them should initialize one,
//! e.g. `env_logger`.
//!
//! [TUF]: https://theupdateframework.github.io/
//! [TUF specification]: https://github.com/theupdateframework/specification/blob/9f148556ca15da2ec5c022c8b3e6f99a028e5fe5/tuf-spec.md

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod clock;
pub(crate) mod datastore;
pub mod error;
pub mod git;
pub mod key_source;
pub mod pin;
pub mod repo;
pub mod reposdb;
pub mod schema;
pub mod scheduler;
pub mod sign;
pub(crate) mod signed;
pub mod targets;
pub mod updater;
