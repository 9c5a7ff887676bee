//! Nanosecond-precision timestamp type
//!
//! Timestamps are stored as whole seconds since the Unix epoch plus a
//! sub-second nanosecond component. Drivers hand datetimes over as text or as
//! native instants; both paths converge on this type so that a value written
//! and read back keeps every nanosecond.
//!
//! ## Usage
//!
//! ```
//! use sluice_core::Timestamp;
//!
//! let ts = Timestamp::new(1_701_962_387, 551_813_333).unwrap();
//! assert_eq!(ts.to_rfc3339(), "2023-12-07T15:19:47.551813333Z");
//! assert_eq!(Timestamp::parse_rfc3339(&ts.to_rfc3339()), Some(ts));
//! ```

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Point in time as (seconds since epoch, nanoseconds within the second)
///
/// ## Invariants
///
/// - `nanos < 1_000_000_000`
/// - ordering is chronological
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a timestamp, rejecting an out-of-range nanosecond component
    pub const fn new(secs: i64, nanos: u32) -> Option<Self> {
        if nanos >= NANOS_PER_SEC {
            None
        } else {
            Some(Timestamp { secs, nanos })
        }
    }

    /// Create a timestamp from whole seconds since epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Timestamp { secs, nanos: 0 }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_chrono(Utc::now())
    }

    /// Convert from a chrono UTC datetime
    pub fn from_chrono(dt: DateTime<Utc>) -> Self {
        Timestamp {
            secs: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Whole seconds since epoch
    #[inline]
    pub const fn secs(&self) -> i64 {
        self.secs
    }

    /// Nanoseconds within the second
    #[inline]
    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Convert to a chrono UTC datetime, if representable
    pub fn to_chrono(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.secs, self.nanos)
    }

    // =========================================================================
    // Text form
    // =========================================================================

    /// Render as RFC 3339 in UTC with full nanosecond precision
    ///
    /// Falls back to `<secs>.<nanos>` for instants chrono cannot represent.
    pub fn to_rfc3339(&self) -> String {
        match self.to_chrono() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Nanos, true),
            None => format!("{}.{:09}", self.secs, self.nanos),
        }
    }

    /// Parse an RFC 3339 datetime or a bare `YYYY-MM-DD` date (midnight UTC)
    ///
    /// Also accepts the space-separated form `YYYY-MM-DD HH:MM:SS[.fff]`
    /// that SQL databases commonly render, interpreted as UTC.
    pub fn parse_rfc3339(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Self::from_chrono(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(Self::from_chrono(naive.and_utc()));
        }
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        Some(Self::from_chrono(date.and_hms_opt(0, 0, 0)?.and_utc()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
