//! Initial BPM and measure-alignment offset for a chart's timeline.

use crate::prelude::*;
use thiserror::Error;

/// Fatal timing defects; they abort the chart, never the batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimingError {
    /// Without an uninherited timing point the chart has no measure grid.
    #[error("no uninherited timing point in chart")]
    MissingBaseTiming,
    #[error("first measure length must be positive (is {0}ms)")]
    DegenerateBaseTiming(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingResolution {
    /// Measure length of the first uninherited timing point, in ms.
    pub beat_len: f64,
    /// BPM of the first uninherited timing point, rounded for display.
    pub display_bpm: f64,
    /// Rounded copy of `shift`, for logs only.
    pub display_shift: f64,
    /// Silence to prepend so a full measure starts at the chart origin.
    /// Unrounded; this is the value that gets applied.
    pub shift: f64,
}

/// Round to 3 decimal places for display.
pub fn round3(value: f64) -> f64 {
    (value * 1000.).round() / 1000.
}

/// Locate the base timing point and compute the measure-aligning shift.
///
/// The output format derives measures from the BPM alone, so the first
/// measure boundary can only be moved by shifting the whole chart: the shift
/// is the amount of silence that makes a full measure end exactly at the
/// first timing point.
pub fn resolve(timing_points: &[TimingPoint]) -> Result<TimingResolution, TimingError> {
    let first = timing_points
        .iter()
        .find(|tp| tp.is_uninherited())
        .ok_or(TimingError::MissingBaseTiming)?;
    let beat_len = first.beat_len().unwrap_or(0.);
    if beat_len <= 0. {
        return Err(TimingError::DegenerateBaseTiming(beat_len));
    }
    let bpm = 60000. / beat_len;
    //How far into its own measure the base timing point falls
    let offset_ms = (first.time / beat_len).rem_euclid(1.) * beat_len;
    let shift = beat_len - offset_ms;
    info!(
        "    base timing: {} BPM, shifting chart by {}ms",
        round3(bpm),
        round3(shift)
    );
    Ok(TimingResolution {
        beat_len,
        display_bpm: round3(bpm),
        display_shift: round3(shift),
        shift,
    })
}

/// Shift every chart timestamp by `offset` milliseconds.
///
/// Must run exactly once per chart, after `resolve` and before any pulse
/// conversion.
pub fn apply_offset(chart: &mut Chart, offset: f64) {
    for obj in chart.hit_objects.iter_mut() {
        obj.time += offset;
        if let Some(end_time) = obj.end_time.as_mut() {
            *end_time += offset;
        }
    }
    for tp in chart.timing_points.iter_mut() {
        tp.time += offset;
    }
}
