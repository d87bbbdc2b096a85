//! Context bucketing: (time of day, connection load, dominant PAD axis) -> key.
//!
//! Keys look like `"14-M-A"`: zero-padded UTC hour, load bin, dominant axis.
//! The mapping is pure so that identical snapshots always aggregate into the
//! same policy bucket.

use chrono::{DateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{FieldState, MirrorError};

/// Hours x load bins x axes.
pub const BUCKET_SPACE: usize = 24 * 3 * 3;

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadBin {
    L,
    M,
    H,
}

impl LoadBin {
    pub fn from_load(connected: u32) -> Self {
        match connected {
            0..=19 => LoadBin::L,
            20..=59 => LoadBin::M,
            _ => LoadBin::H,
        }
    }

    fn as_char(&self) -> char {
        match self {
            LoadBin::L => 'L',
            LoadBin::M => 'M',
            LoadBin::H => 'H',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    P,
    A,
    D,
}

impl Axis {
    /// Argmax of the PAD vector. On ties the earlier axis wins (P > A > D).
    pub fn dominant(pad: &[f64; 3]) -> Self {
        let mut best = 0;
        for i in 1..3 {
            if pad[i] > pad[best] {
                best = i;
            }
        }
        match best {
            0 => Axis::P,
            1 => Axis::A,
            _ => Axis::D,
        }
    }

    fn as_char(&self) -> char {
        match self {
            Axis::P => 'P',
            Axis::A => 'A',
            Axis::D => 'D',
        }
    }
}

/// Discrete context identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketKey(String);

/// Decomposed form of a [`BucketKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketParts {
    pub hour: u8,
    pub load: LoadBin,
    pub axis: Axis,
}

impl BucketKey {
    pub fn from_parts(parts: BucketParts) -> Self {
        BucketKey(format!(
            "{:02}-{}-{}",
            parts.hour,
            parts.load.as_char(),
            parts.axis.as_char()
        ))
    }

    /// Parse a key produced by [`bucket_key`]. Accepts unpadded hours too.
    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        let bad = || MirrorError::Message(format!("malformed bucket key '{}'", raw));
        let mut it = raw.trim().split('-');
        let (hour, load, axis) = match (it.next(), it.next(), it.next(), it.next()) {
            (Some(h), Some(l), Some(a), None) => (h, l, a),
            _ => return Err(bad()),
        };
        let hour: u8 = hour.parse().map_err(|_| bad())?;
        if hour > 23 {
            return Err(bad());
        }
        let load = match load {
            "L" => LoadBin::L,
            "M" => LoadBin::M,
            "H" => LoadBin::H,
            _ => return Err(bad()),
        };
        let axis = match axis {
            "P" => Axis::P,
            "A" => Axis::A,
            "D" => Axis::D,
            _ => return Err(bad()),
        };
        Ok(Self::from_parts(BucketParts { hour, load, axis }))
    }

    pub fn parts(&self) -> Option<BucketParts> {
        let mut it = self.0.split('-');
        let hour = it.next()?.parse().ok()?;
        let load = match it.next()? {
            "L" => LoadBin::L,
            "M" => LoadBin::M,
            "H" => LoadBin::H,
            _ => return None,
        };
        let axis = match it.next()? {
            "P" => Axis::P,
            "A" => Axis::A,
            "D" => Axis::D,
            _ => return None,
        };
        Some(BucketParts { hour, load, axis })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// UTC hour of day for a millisecond timestamp.
pub fn hour_of_day(ts_ms: i64) -> u8 {
    match DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.hour() as u8,
        None => ts_ms.div_euclid(MS_PER_HOUR).rem_euclid(24) as u8,
    }
}

/// Map a point in time, the current load and the PAD vector to a bucket key.
pub fn bucket_key(ts_ms: i64, connected: u32, pad: &[f64; 3]) -> BucketKey {
    BucketKey::from_parts(BucketParts {
        hour: hour_of_day(ts_ms),
        load: LoadBin::from_load(connected),
        axis: Axis::dominant(pad),
    })
}

/// Bucket of a field snapshot.
pub fn bucket_for(state: &FieldState) -> BucketKey {
    bucket_key(state.ts_ms, state.connected, &state.pad)
}
