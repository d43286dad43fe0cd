// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Clock` abstraction that lets the same trusted-metadata-set machinery serve both a live
//! (wall-clock) caller and the historical updater, which must never consider a role expired
//! while replaying old commits.

use chrono::{DateTime, Utc};

/// Supplies the "reference time" a trusted-metadata set checks role expirations against.
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// The instant to treat as "now" for expiration checks.
    fn reference_time(&self) -> DateTime<Utc>;
}

/// The ordinary wall clock. Use this for any caller that wants real TUF security guarantees
/// against the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn reference_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock fixed at the minimum representable instant. The historical updater uses this so that
/// no role in a replayed commit is ever rejected for being expired relative to the present.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricalClock;

impl Clock for HistoricalClock {
    fn reference_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }
}

/// A clock fixed at an arbitrary instant, useful for tests that want deterministic expiration
/// behavior without depending on wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn reference_time(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_clock_never_expires() {
        let clock = HistoricalClock;
        assert!(clock.reference_time() < Utc::now());
    }
}
