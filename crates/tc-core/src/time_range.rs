//! Time range normalization.
//!
//! Callers describe a segment as a millisecond pair, a pair of (possibly
//! fractional) seconds, or a pair of `HH:MM:SS[.mmm]` timestamps. All of them
//! normalize into a canonical millisecond [`TimeRange`] plus the [`TrimMode`]
//! that can honor it: a bound that does not land on a whole second can only be
//! cut by re-encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Longest segment that may be requested (6 hours).
pub const MAX_SEGMENT_MS: u64 = 6 * 3600 * 1000;

/// Largest accepted bound (100 hours into the source).
pub const MAX_POSITION_MS: u64 = 100 * 3600 * 1000;

// ---------------------------------------------------------------------------
// TrimMode
// ---------------------------------------------------------------------------

/// How the encoder cuts the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    /// Container-level stream copy, aligned to the preceding keyframe.
    Copy,
    /// Re-encode for frame-accurate boundaries.
    Precise,
}

impl fmt::Display for TrimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Precise => write!(f, "precise"),
        }
    }
}

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// Canonical millisecond range with `end_ms > start_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeRange {
    /// Build a range, rejecting empty, inverted, or oversized ones.
    pub fn new(start_ms: u64, end_ms: u64) -> Result<Self> {
        if end_ms <= start_ms {
            return Err(Error::invalid_range(format!(
                "end ({end_ms} ms) must be after start ({start_ms} ms)"
            )));
        }
        if end_ms > MAX_POSITION_MS {
            return Err(Error::invalid_range(format!(
                "end ({end_ms} ms) is beyond the {MAX_POSITION_MS} ms limit"
            )));
        }
        if end_ms - start_ms > MAX_SEGMENT_MS {
            return Err(Error::invalid_range(format!(
                "segment of {} ms exceeds the {MAX_SEGMENT_MS} ms limit",
                end_ms - start_ms
            )));
        }
        Ok(Self { start_ms, end_ms })
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Whether either bound falls between whole seconds.
    pub fn has_sub_second(&self) -> bool {
        self.start_ms % 1000 != 0 || self.end_ms % 1000 != 0
    }

    /// Start position as an encoder argument (`S.mmm`).
    pub fn ffmpeg_start(&self) -> String {
        Self::format_seconds(self.start_ms)
    }

    /// Duration as an encoder argument (`S.mmm`).
    pub fn ffmpeg_duration(&self) -> String {
        Self::format_seconds(self.duration_ms())
    }

    /// Render milliseconds as `S.mmm`.
    pub fn format_seconds(ms: u64) -> String {
        format!("{}.{:03}", ms / 1000, ms % 1000)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}s-{}s",
            Self::format_seconds(self.start_ms),
            Self::format_seconds(self.end_ms)
        )
    }
}

// ---------------------------------------------------------------------------
// RangeSpec
// ---------------------------------------------------------------------------

/// A requested range as it arrives from a caller, before normalization.
///
/// Exactly one pair is used, in priority order: `start_ms`/`end_ms`, then
/// `start`/`end` seconds, then `start_time`/`end_time` timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSpec {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Ask for a frame-accurate re-encode even on whole-second bounds.
    pub precise: Option<bool>,
    /// `auto`, `copy`, or `precise`.
    pub mode: Option<String>,
}

/// Result of normalizing a [`RangeSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedRange {
    pub range: TimeRange,
    /// A bound carries a non-zero sub-second component.
    pub force_precise: bool,
    pub mode: TrimMode,
}

impl RangeSpec {
    /// Millisecond pair constructor.
    pub fn from_millis(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
            ..Self::default()
        }
    }

    /// Seconds pair constructor.
    pub fn from_seconds(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    /// Timestamp pair constructor.
    pub fn from_timestamps(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start_time: Some(start.into()),
            end_time: Some(end.into()),
            ..Self::default()
        }
    }

    /// Canonicalize the range and pick the trim mode.
    ///
    /// The mode is `Precise` when a bound is not on a whole second or the
    /// caller explicitly asked for it. A `copy` hint never demotes a range
    /// that needs sub-second accuracy.
    pub fn normalize(&self) -> Result<NormalizedRange> {
        let explicit_precise = self.explicit_precise()?;

        let (start_ms, end_ms) = match (self.start_ms, self.end_ms) {
            (Some(s), Some(e)) => (s, e),
            _ => match (self.start, self.end) {
                (Some(s), Some(e)) => (seconds_to_ms(s, "start")?, seconds_to_ms(e, "end")?),
                _ => match (&self.start_time, &self.end_time) {
                    (Some(s), Some(e)) => (parse_timestamp(s)?, parse_timestamp(e)?),
                    _ => return Err(Error::invalid_range("missing range")),
                },
            },
        };

        let range = TimeRange::new(start_ms, end_ms)?;
        let force_precise = range.has_sub_second();
        let mode = if force_precise || explicit_precise {
            TrimMode::Precise
        } else {
            TrimMode::Copy
        };

        Ok(NormalizedRange {
            range,
            force_precise,
            mode,
        })
    }

    fn explicit_precise(&self) -> Result<bool> {
        let from_mode = match self.mode.as_deref().map(str::trim) {
            None | Some("") | Some("auto") | Some("copy") => false,
            Some("precise") => true,
            Some(other) => {
                return Err(Error::invalid_range(format!(
                    "unknown mode '{other}' (expected auto, copy or precise)"
                )))
            }
        };
        Ok(from_mode || self.precise.unwrap_or(false))
    }
}

/// Convert a seconds value to milliseconds, rounding half away from zero.
pub fn seconds_to_ms(seconds: f64, which: &str) -> Result<u64> {
    if !seconds.is_finite() {
        return Err(Error::invalid_range(format!("{which} is not a finite number")));
    }
    if seconds < 0.0 {
        return Err(Error::invalid_range(format!("{which} must not be negative")));
    }
    let ms = (seconds * 1000.0).round();
    if ms > MAX_POSITION_MS as f64 {
        return Err(Error::invalid_range(format!(
            "{which} is beyond the {MAX_POSITION_MS} ms limit"
        )));
    }
    Ok(ms as u64)
}

/// Parse `HH:MM:SS[.mmm]`, `MM:SS[.mmm]` or `SS[.mmm]` into milliseconds.
///
/// Minutes and seconds must be below 60 when a larger unit precedes them.
pub fn parse_timestamp(ts: &str) -> Result<u64> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(Error::invalid_range("empty timestamp"));
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(Error::invalid_range(format!("invalid timestamp '{ts}'")));
    }

    let (units, secs_part) = parts.split_at(parts.len() - 1);
    let mut whole_units: u64 = 0;
    for (i, part) in units.iter().enumerate() {
        let value = parse_digits(part, ts)?;
        // Minutes following hours must be < 60.
        if i > 0 && value >= 60 {
            return Err(Error::invalid_range(format!(
                "minutes out of range in '{ts}'"
            )));
        }
        whole_units = whole_units.saturating_mul(60).saturating_add(value);
    }

    let secs_str = secs_part[0];
    let (whole, frac) = match secs_str.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (secs_str, None),
    };
    let secs = parse_digits(whole, ts)?;
    if !units.is_empty() && secs >= 60 {
        return Err(Error::invalid_range(format!(
            "seconds out of range in '{ts}'"
        )));
    }
    let frac_ms = match frac {
        Some(f) => parse_fraction_ms(f, ts)?,
        None => 0,
    };

    let total = whole_units
        .saturating_mul(60)
        .saturating_add(secs)
        .saturating_mul(1000)
        .saturating_add(frac_ms);
    if total > MAX_POSITION_MS {
        return Err(Error::invalid_range(format!(
            "timestamp '{ts}' is beyond the {MAX_POSITION_MS} ms limit"
        )));
    }
    Ok(total)
}

fn parse_digits(part: &str, ts: &str) -> Result<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_range(format!("invalid timestamp '{ts}'")));
    }
    part.parse()
        .map_err(|_| Error::invalid_range(format!("invalid timestamp '{ts}'")))
}

/// Fractional digits to milliseconds, rounding on the fourth digit.
/// May return 1000 (e.g. `.9996`), which carries into the next second.
fn parse_fraction_ms(frac: &str, ts: &str) -> Result<u64> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_range(format!("invalid timestamp '{ts}'")));
    }
    let digits: Vec<u64> = frac.bytes().map(|b| u64::from(b - b'0')).collect();
    let mut ms = 0;
    for i in 0..3 {
        ms = ms * 10 + digits.get(i).copied().unwrap_or(0);
    }
    if digits.get(3).is_some_and(|d| *d >= 5) {
        ms += 1;
    }
    Ok(ms)
}
