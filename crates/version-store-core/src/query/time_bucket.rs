//! Fixed-width time buckets used by resampling.
//!
//! Bucket boundaries are aligned to the Unix epoch: with a width of `w`
//! ticks, left-closed buckets are `[k*w, (k+1)*w)` and right-closed buckets
//! are `(k*w, (k+1)*w]`. Either way a bucket is keyed by its start `k*w`.
//! Euclidean division keeps the mapping monotonic for pre-epoch timestamps.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::table::TimestampUnit;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * 60;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Errors produced when parsing a human-friendly time bucket spec (e.g. `1h`).
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseTimeBucketError {
    /// The input was empty or only whitespace.
    #[snafu(display("time bucket spec is empty"))]
    Empty,

    /// The input did not include a numeric value.
    #[snafu(display("time bucket spec '{spec}' is missing a numeric value"))]
    MissingNumber {
        /// The rejected input.
        spec: String,
    },

    /// The input did not include a required unit suffix.
    #[snafu(display("time bucket spec '{spec}' is missing a unit suffix (expected s|m|h|d)"))]
    MissingUnit {
        /// The rejected input.
        spec: String,
    },

    /// The numeric portion of the input failed to parse.
    #[snafu(display("invalid bucket value in '{spec}': {source}"))]
    InvalidNumber {
        /// The rejected input.
        spec: String,
        /// The parse error returned by `u64::from_str`.
        source: std::num::ParseIntError,
    },

    /// The parsed numeric value was zero.
    #[snafu(display("bucket value must be > 0 in '{spec}'"))]
    NonPositive {
        /// The rejected input.
        spec: String,
    },

    /// The parsed numeric value did not fit in a `u32`.
    #[snafu(display("bucket value too large for u32 (got {value}) in '{spec}'"))]
    TooLarge {
        /// The rejected input.
        spec: String,
        /// The parsed numeric value.
        value: u64,
    },

    /// The input used an unsupported unit suffix.
    #[snafu(display("unknown time bucket unit '{unit}' in '{spec}' (expected s|m|h|d)"))]
    UnknownUnit {
        /// The rejected input.
        spec: String,
        /// The unrecognized unit suffix.
        unit: String,
    },
}

/// Width of a resample bucket.
///
/// Serializes as its compact string form (`"30s"`, `"15m"`, `"1h"`, `"2d"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeBucket {
    /// A bucket spanning a fixed number of seconds.
    Seconds(u32),
    /// A bucket spanning a fixed number of minutes.
    Minutes(u32),
    /// A bucket spanning a fixed number of hours.
    Hours(u32),
    /// A bucket spanning a fixed number of days.
    Days(u32),
}

impl TimeBucket {
    /// Parse a human-friendly time bucket spec (e.g. `1h`, `15m`, `30s`, `2d`).
    ///
    /// Accepts common unit aliases (e.g. `sec`, `min`, `hr`, `day`).
    pub fn parse(spec: &str) -> Result<Self, ParseTimeBucketError> {
        spec.parse()
    }

    /// Bucket length in whole seconds.
    pub fn len_secs(&self) -> i64 {
        match *self {
            TimeBucket::Seconds(n) => i64::from(n),
            TimeBucket::Minutes(n) => i64::from(n) * SECONDS_PER_MINUTE,
            TimeBucket::Hours(n) => i64::from(n) * SECONDS_PER_HOUR,
            TimeBucket::Days(n) => i64::from(n) * SECONDS_PER_DAY,
        }
    }

    /// Bucket length in ticks of `unit`; `None` on overflow.
    pub fn width_in(&self, unit: TimestampUnit) -> Option<i64> {
        self.len_secs().checked_mul(unit.ticks_per_second())
    }
}

/// Start of the left-closed bucket `[k*w, (k+1)*w)` containing `value`.
///
/// `None` when `width` is not positive or the start falls below `i64::MIN`.
pub(crate) fn left_bucket_start(value: i64, width: i64) -> Option<i64> {
    if width <= 0 {
        return None;
    }
    value.checked_div_euclid(width)?.checked_mul(width)
}

/// Start of the right-closed bucket `(k*w, (k+1)*w]` containing `value`.
pub(crate) fn right_bucket_start(value: i64, width: i64) -> Option<i64> {
    left_bucket_start(value.checked_sub(1)?, width)
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Seconds(n) => write!(f, "{n}s"),
            TimeBucket::Minutes(n) => write!(f, "{n}m"),
            TimeBucket::Hours(n) => write!(f, "{n}h"),
            TimeBucket::Days(n) => write!(f, "{n}d"),
        }
    }
}

impl From<TimeBucket> for String {
    fn from(bucket: TimeBucket) -> Self {
        bucket.to_string()
    }
}

impl TryFrom<String> for TimeBucket {
    type Error = ParseTimeBucketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for TimeBucket {
    type Err = ParseTimeBucketError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let spec = input.trim();
        if spec.is_empty() {
            return Err(ParseTimeBucketError::Empty);
        }

        // Numeric prefix, then a unit starting at the first alphabetic char.
        let Some(unit_start) = spec
            .char_indices()
            .find(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, _)| i)
        else {
            return MissingUnitSnafu { spec }.fail();
        };

        if unit_start == 0 {
            return MissingNumberSnafu { spec }.fail();
        }

        let (num_str, unit_str) = spec.split_at(unit_start);
        let value: u64 = num_str
            .trim()
            .parse()
            .context(InvalidNumberSnafu { spec })?;

        ensure!(value > 0, NonPositiveSnafu { spec });
        let v = u32::try_from(value).ok().context(TooLargeSnafu { spec, value })?;

        match unit_str.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(TimeBucket::Seconds(v)),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(TimeBucket::Minutes(v)),
            "h" | "hr" | "hrs" | "hour" | "hours" => Ok(TimeBucket::Hours(v)),
            "d" | "day" | "days" => Ok(TimeBucket::Days(v)),
            _ => UnknownUnitSnafu {
                spec,
                unit: unit_str.trim(),
            }
            .fail(),
        }
    }
}
