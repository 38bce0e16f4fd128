//! Group hit objects into sound channels while walking the timing timeline.
//!
//! This is a single left-to-right scan over the (time-sorted) hit objects
//! with a cursor over the timing points. The cursor accumulates elapsed
//! pulses across every timing boundary so note positions keep their absolute
//! place on the measure grid even as the measure length changes.

use crate::bmson::BpmEvent;
use crate::prelude::*;
use crate::pulse::{ms_to_pulses, RESOLUTION};
use crate::timing::TimingError;

/// Measure lengths outside this range (ms, exclusive) are degenerate; the
/// previous length stays in effect.
const MEASURE_MS_MIN: f64 = 10.;
const MEASURE_MS_MAX: f64 = 9999.;

/// A note on the pulse grid. Length is zero for anything but long notes.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseNote {
    pub lane: u32,
    pub y: u32,
    pub l: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteChannel {
    pub sample: SampleId,
    pub notes: Vec<PulseNote>,
}

#[derive(Debug, Default, Clone)]
pub struct GroupedChart {
    /// Named channels in first-encounter order, the default channel last.
    pub channels: Vec<NoteChannel>,
    pub bpm_events: Vec<BpmEvent>,
    /// Largest note pulse seen, for bar line generation.
    pub last_pulse: u32,
}

/// Mutable scan state: the timing cursor plus pulse accumulators.
struct Scan<'a> {
    cur_tp: &'a TimingPoint,
    rest: &'a [TimingPoint],
    /// Measure length currently in effect, after SV scaling.
    cur_beat_len: f64,
    /// Measure length of the last uninherited point; SVs scale against this.
    base_beat_len: f64,
    /// Pulses elapsed up to `cur_tp.time`.
    total_pulses: i64,
    bpm_events: Vec<BpmEvent>,
}
impl<'a> Scan<'a> {
    fn new(timing_points: &'a [TimingPoint]) -> Result<Scan<'a>, TimingError> {
        let cur_tp = timing_points.first().ok_or(TimingError::MissingBaseTiming)?;
        let beat_len = cur_tp.beat_len().ok_or(TimingError::MissingBaseTiming)?;
        Ok(Scan {
            cur_tp,
            rest: &timing_points[1..],
            cur_beat_len: beat_len,
            base_beat_len: beat_len,
            total_pulses: ms_to_pulses(cur_tp.time, beat_len, RESOLUTION),
            bpm_events: Vec::new(),
        })
    }

    /// Advance the cursor over every timing point at or before `time`,
    /// emitting a BPM event per boundary crossed.
    fn advance_to(&mut self, time: f64) {
        while let Some(next_tp) = self.rest.first() {
            if next_tp.time > time {
                break;
            }
            self.total_pulses += ms_to_pulses(
                next_tp.time - self.cur_tp.time,
                self.cur_beat_len,
                RESOLUTION,
            );
            self.cur_tp = next_tp;
            self.rest = &self.rest[1..];
            let (target, target_base) = match next_tp.kind {
                TimingKind::Uninherited { beat_len } => {
                    warn!(
                        "second uninherited timing point at {}ms; multiple BPM sections are not fully supported",
                        next_tp.time
                    );
                    (beat_len, beat_len)
                }
                TimingKind::Inherited { velocity } => {
                    (self.base_beat_len / velocity, self.base_beat_len)
                }
            };
            if target > MEASURE_MS_MIN && target < MEASURE_MS_MAX {
                self.cur_beat_len = target;
                self.base_beat_len = target_base;
            } else {
                warn!(
                    "degenerate measure length {}ms at {}ms, keeping {}ms",
                    target, next_tp.time, self.cur_beat_len
                );
            }
            trace!(
                "    timing point at {}ms: {} pulses elapsed, measure {}ms",
                next_tp.time,
                self.total_pulses,
                self.cur_beat_len
            );
            self.bpm_events.push(BpmEvent {
                y: clamp_pulse(self.total_pulses),
                bpm: 60000. / self.cur_beat_len,
            });
        }
    }

    /// Pulse position of an absolute timestamp under the current cursor.
    fn pulse_at(&self, time: f64) -> i64 {
        self.total_pulses + ms_to_pulses(time - self.cur_tp.time, self.cur_beat_len, RESOLUTION)
    }

    fn pulse_len(&self, obj: &HitObject) -> i64 {
        match obj.end_time {
            Some(end_time) => ms_to_pulses(end_time - obj.time, self.cur_beat_len, RESOLUTION),
            None => 0,
        }
    }
}

fn clamp_pulse(pulses: i64) -> u32 {
    pulses.max(0) as u32
}

/// Scan the hit objects once, routing each into its sound channel.
///
/// With `group_hitsounds` unset every note lands in the single default
/// channel; otherwise notes with a named sample get one channel per sample,
/// created on first encounter. Arrival order is preserved per channel.
pub fn group_channels(
    timing_points: &[TimingPoint],
    hit_objects: &[HitObject],
    group_hitsounds: bool,
) -> Result<GroupedChart, TimingError> {
    let mut scan = Scan::new(timing_points)?;
    let mut named: Vec<NoteChannel> = Vec::new();
    let mut default_notes: Vec<PulseNote> = Vec::new();
    let mut last_pulse = 0;
    for obj in hit_objects {
        scan.advance_to(obj.time);
        let pulse_note = PulseNote {
            lane: obj.lane.max(0) as u32,
            y: clamp_pulse(scan.pulse_at(obj.time)),
            l: clamp_pulse(scan.pulse_len(obj)),
        };
        last_pulse = last_pulse.max(pulse_note.y);
        let notes = match &obj.sample {
            SampleId::Named(name) if group_hitsounds => {
                let idx = named
                    .iter()
                    .position(|ch| matches!(&ch.sample, SampleId::Named(n) if n == name))
                    .unwrap_or_else(|| {
                        named.push(NoteChannel {
                            sample: obj.sample.clone(),
                            notes: Vec::new(),
                        });
                        named.len() - 1
                    });
                &mut named[idx].notes
            }
            _ => &mut default_notes,
        };
        notes.push(pulse_note);
    }
    let mut channels = named;
    channels.push(NoteChannel {
        sample: SampleId::Default,
        notes: default_notes,
    });
    Ok(GroupedChart {
        channels,
        bpm_events: scan.bpm_events,
        last_pulse,
    })
}
