//! Millisecond-to-pulse conversion at the output format's fixed resolution.

/// Pulses per measure in the output format.
pub const RESOLUTION: u32 = 240;

/// Convert a millisecond duration into a pulse count at the given measure length.
pub fn ms_to_pulses(ms: f64, measure_ms: f64, resolution: u32) -> i64 {
    (ms / measure_ms * resolution as f64).round() as i64
}
