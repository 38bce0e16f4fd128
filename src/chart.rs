//! Typed chart entities built from raw `.osu` records.

use crate::prelude::*;

/// Fixed playfield width the source format uses for lane placement.
const PLAYFIELD_WIDTH: f64 = 512.;

const TYPE_HIT: u32 = 1 << 0;
const TYPE_HOLD: u32 = 1 << 7;

/// A header value, numeric when the text parses as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}
impl Value {
    /// Coerce a raw header value: try integer, then float, else keep the text.
    fn coerce(raw: &str) -> Value {
        if let Ok(int) = raw.parse::<i64>() {
            Value::Int(int)
        } else if let Ok(num) = raw.parse::<f64>() {
            Value::Float(num)
        } else {
            Value::Text(raw.to_string())
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(num) => Some(*num),
            Value::Text(_) => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Metadata {
    fields: HashMap<String, Value>,
}
impl Metadata {
    pub fn from_raw(pairs: impl IntoIterator<Item = (String, String)>) -> Metadata {
        let mut fields = HashMap::default();
        for (key, val) in pairs {
            fields.insert(key, Value::coerce(&val));
        }
        Metadata { fields }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// String form of a field, regardless of which coercion won.
    pub fn string(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(|val| match val {
            Value::Int(int) => int.to_string(),
            Value::Float(num) => num.to_string(),
            Value::Text(text) => text.clone(),
        })
    }

    /// The lane count of a mania chart (`CircleSize` doubles as key count).
    pub fn key_count(&self) -> Option<f64> {
        self.number("CircleSize")
    }
}

/// A background or otherwise-unsupported storyboard event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Background {
        start_time: f64,
        file: String,
        x: i32,
        y: i32,
    },
    /// Videos, breaks, storyboard commands. Dropped before use.
    Unsupported,
}
impl Event {
    pub fn sanitize(row: &[String]) -> Event {
        if row.len() < 2 {
            warn!("unparseable event {:?}", row);
            return Event::Unsupported;
        }
        if row[0] != "0" {
            debug!("unsupported event type \"{}\"", row[0]);
            return Event::Unsupported;
        }
        let start_time = field::<f64>(row, 1, "start time").unwrap_or(0.);
        let file = row
            .get(2)
            .map(|name| name.trim_matches('"').to_string())
            .unwrap_or_default();
        Event::Background {
            start_time,
            file,
            x: field(row, 3, "x").unwrap_or(0),
            y: field(row, 4, "y").unwrap_or(0),
        }
    }
}

/// Whether a timing point defines a new measure length or only scales scroll
/// speed relative to the previous one.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingKind {
    Uninherited { beat_len: f64 },
    Inherited { velocity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingPoint {
    pub time: f64,
    pub kind: TimingKind,
    pub meter: i32,
    pub sample_set: i32,
    pub sample_index: i32,
    pub volume: i32,
    pub effects: i32,
}
impl TimingPoint {
    pub fn sanitize(row: &[String]) -> Result<TimingPoint> {
        let time = field::<i64>(row, 0, "time")? as f64;
        let value = field::<f64>(row, 1, "beatLength")?;
        //Old two-field timing points are always uninherited
        let flags = field::<i32>(row, 6, "uninherited").unwrap_or(1);
        let kind = if flags & 1 != 0 {
            TimingKind::Uninherited { beat_len: value }
        } else {
            //SV is encoded as a negative percentage
            TimingKind::Inherited {
                velocity: -1. / (value / 100.),
            }
        };
        Ok(TimingPoint {
            time,
            kind,
            meter: field(row, 2, "meter").unwrap_or(4),
            sample_set: field(row, 3, "sampleSet").unwrap_or(0),
            sample_index: field(row, 4, "sampleIndex").unwrap_or(0),
            volume: field(row, 5, "volume").unwrap_or(100),
            effects: field(row, 7, "effects").unwrap_or(0),
        })
    }

    pub fn is_uninherited(&self) -> bool {
        matches!(self.kind, TimingKind::Uninherited { .. })
    }

    pub fn beat_len(&self) -> Option<f64> {
        match self.kind {
            TimingKind::Uninherited { beat_len } => Some(beat_len),
            TimingKind::Inherited { .. } => None,
        }
    }
}

/// The keysound a note triggers, with the shared default distinguished from
/// actually-named samples so a sample file can never collide with it.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleId {
    Default,
    Named(String),
}
impl SampleId {
    fn from_raw(raw: &str) -> SampleId {
        match raw {
            "" | "0" | "default" => SampleId::Default,
            name => SampleId::Named(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitObject {
    /// 0-based lane index.
    pub lane: i32,
    pub time: f64,
    /// Present iff the note is a long note.
    pub end_time: Option<f64>,
    pub hit_sound: u32,
    pub sample: SampleId,
    /// Raw volume/addition data, carried through unmodified.
    pub hit_sample: String,
}
impl HitObject {
    pub fn sanitize(row: &[String], key_count: f64) -> Result<HitObject> {
        let x = field::<f64>(row, 0, "x")?;
        let time = field::<i64>(row, 2, "time")? as f64;
        let ty = field::<u32>(row, 3, "type")?;
        let hit_sound = field::<u32>(row, 4, "hitSound").unwrap_or(0);
        let hit_sample = row.get(5).cloned().unwrap_or_default();
        let lane = (x * key_count / PLAYFIELD_WIDTH).floor();
        ensure!(
            lane.is_finite() && lane >= 0. && lane < key_count,
            "invalid object x {} corresponding to lane {}",
            x,
            lane
        );
        let tail: Vec<&str> = hit_sample.split(':').collect();
        let end_time = if ty & TYPE_HOLD != 0 {
            let end = tail
                .first()
                .copied()
                .unwrap_or_default()
                .parse::<i64>()
                .map_err(|_| {
                    anyhow!(
                        "invalid hold note sample \"{}\", expected endTime",
                        hit_sample
                    )
                })? as f64;
            ensure!(
                end >= time,
                "long note ends at {}ms before it starts at {}ms",
                end,
                time
            );
            Some(end)
        } else {
            if ty & TYPE_HIT == 0 {
                debug!("note at {}ms has unknown type {}, treating as hit", time, ty);
            }
            None
        };
        //The format appends a trailing empty field, so the sample file sits
        //second to last
        let sample = if tail.len() >= 2 {
            SampleId::from_raw(tail[tail.len() - 2])
        } else {
            SampleId::Default
        };
        Ok(HitObject {
            lane: lane as i32,
            time,
            end_time,
            hit_sound,
            sample,
            hit_sample,
        })
    }
}

/// One chart, fully typed: the unit of conversion.
#[derive(Debug, Default, Clone)]
pub struct Chart {
    pub metadata: Metadata,
    /// Background events only; unsupported events are filtered at build time.
    pub events: Vec<Event>,
    /// Sorted by time ascending, source order preserved on ties.
    pub timing_points: Vec<TimingPoint>,
    /// Sorted by time ascending, source order preserved on ties.
    pub hit_objects: Vec<HitObject>,
}
impl Chart {
    /// Type every raw record. Malformed rows are logged and skipped, never
    /// fatal for the chart.
    pub fn from_raw(raw: osufile::RawBeatmap) -> Chart {
        let metadata = Metadata::from_raw(raw.header);
        let key_count = metadata.key_count().unwrap_or(0.);
        let mut events = Vec::new();
        for row in &raw.events {
            match Event::sanitize(row) {
                Event::Unsupported => {}
                event => events.push(event),
            }
        }
        let mut timing_points = Vec::new();
        for row in &raw.timing_points {
            match TimingPoint::sanitize(row) {
                Ok(tp) => timing_points.push(tp),
                Err(err) => warn!("skipping timing point {:?}: {:#}", row, err),
            }
        }
        timing_points.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut hit_objects = Vec::new();
        if key_count > 0. {
            for row in &raw.hit_objects {
                match HitObject::sanitize(row, key_count) {
                    Ok(obj) => hit_objects.push(obj),
                    Err(err) => warn!("skipping hit object {:?}: {:#}", row, err),
                }
            }
        }
        hit_objects.sort_by(|a, b| a.time.total_cmp(&b.time));
        Chart {
            metadata,
            events,
            timing_points,
            hit_objects,
        }
    }

    /// File of the first background event, if any.
    pub fn background(&self) -> Option<&str> {
        self.events.iter().find_map(|ev| match ev {
            Event::Background { file, .. } => Some(&file[..]),
            Event::Unsupported => None,
        })
    }
}

fn field<T: std::str::FromStr>(row: &[String], idx: usize, name: &str) -> Result<T> {
    let textual = row
        .get(idx)
        .map(|comp| comp.trim())
        .ok_or_else(|| anyhow!("expected {}, found end of row", name))?;
    textual
        .parse::<T>()
        .map_err(|_| anyhow!("invalid {} \"{}\"", name, textual))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn header_values_coerce_int_then_float_then_text() {
        let meta = Metadata::from_raw(vec![
            ("CircleSize".to_string(), "7".to_string()),
            ("SliderMultiplier".to_string(), "1.4".to_string()),
            ("Title".to_string(), "Freedom Dive".to_string()),
        ]);
        assert_eq!(meta.number("CircleSize"), Some(7.));
        assert_eq!(meta.number("SliderMultiplier"), Some(1.4));
        assert_eq!(meta.number("Title"), None);
        assert_eq!(meta.string("Title").as_deref(), Some("Freedom Dive"));
        //Numeric coercion must not lose the string view
        assert_eq!(meta.string("CircleSize").as_deref(), Some("7"));
        assert_eq!(meta.string("Missing"), None);
    }

    #[test]
    fn background_event_keeps_file_and_position() {
        let ev = Event::sanitize(&row(&["0", "0", "\"bg.jpg\"", "3", "4"]));
        assert_eq!(
            ev,
            Event::Background {
                start_time: 0.,
                file: "bg.jpg".to_string(),
                x: 3,
                y: 4,
            }
        );
    }

    #[test]
    fn background_event_tolerates_missing_position() {
        let ev = Event::sanitize(&row(&["0", "0", "bg.jpg"]));
        assert_eq!(
            ev,
            Event::Background {
                start_time: 0.,
                file: "bg.jpg".to_string(),
                x: 0,
                y: 0,
            }
        );
    }

    #[test]
    fn non_background_events_are_unsupported() {
        assert_eq!(
            Event::sanitize(&row(&["Video", "0", "clip.mp4", "0", "0"])),
            Event::Unsupported
        );
        assert_eq!(Event::sanitize(&row(&["2", "100", "200"])), Event::Unsupported);
        //Too short to mean anything, but must not panic
        assert_eq!(Event::sanitize(&row(&["0"])), Event::Unsupported);
    }

    #[test]
    fn uninherited_timing_point_takes_literal_beat_length() {
        let tp = TimingPoint::sanitize(&row(&["0", "500", "4", "1", "0", "100", "1", "0"])).unwrap();
        assert_eq!(tp.time, 0.);
        assert_eq!(tp.kind, TimingKind::Uninherited { beat_len: 500. });
        assert_eq!(tp.meter, 4);
        assert!(tp.is_uninherited());
    }

    #[test]
    fn inherited_timing_point_decodes_negative_percentage() {
        let tp =
            TimingPoint::sanitize(&row(&["1000", "-50", "4", "1", "0", "100", "0", "0"])).unwrap();
        assert_eq!(tp.kind, TimingKind::Inherited { velocity: 2. });
        let tp =
            TimingPoint::sanitize(&row(&["1000", "-100", "4", "1", "0", "100", "0", "0"])).unwrap();
        assert_eq!(tp.kind, TimingKind::Inherited { velocity: 1. });
    }

    #[test]
    fn short_timing_point_defaults_to_uninherited() {
        let tp = TimingPoint::sanitize(&row(&["0", "500"])).unwrap();
        assert_eq!(tp.kind, TimingKind::Uninherited { beat_len: 500. });
        assert_eq!(tp.meter, 4);
        assert_eq!(tp.volume, 100);
    }

    #[test]
    fn lane_maps_playfield_x_to_key_index() {
        let obj = HitObject::sanitize(&row(&["0", "192", "100", "1", "0", "0:0:0:0:"]), 7.).unwrap();
        assert_eq!(obj.lane, 0);
        let obj =
            HitObject::sanitize(&row(&["511", "192", "100", "1", "0", "0:0:0:0:"]), 7.).unwrap();
        assert_eq!(obj.lane, 6);
        assert!(HitObject::sanitize(&row(&["512", "192", "100", "1", "0", "0:0:0:0:"]), 7.).is_err());
    }

    #[test]
    fn hold_note_reads_end_time_from_sample_tail() {
        let obj =
            HitObject::sanitize(&row(&["36", "192", "1000", "128", "0", "1250:0:0:0:0:"]), 7.)
                .unwrap();
        assert_eq!(obj.time, 1000.);
        assert_eq!(obj.end_time, Some(1250.));
        let obj = HitObject::sanitize(&row(&["36", "192", "1000", "1", "0", "0:0:0:0:"]), 7.).unwrap();
        assert_eq!(obj.end_time, None);
    }

    #[test]
    fn hold_note_must_not_end_before_it_starts() {
        assert!(
            HitObject::sanitize(&row(&["36", "192", "1000", "128", "0", "900:0:0:0:0:"]), 7.)
                .is_err()
        );
    }

    #[test]
    fn sample_is_second_to_last_tail_field() {
        let obj = HitObject::sanitize(
            &row(&["36", "192", "1000", "1", "0", "0:0:0:70:clap.wav:"]),
            7.,
        )
        .unwrap();
        assert_eq!(obj.sample, SampleId::Named("clap.wav".to_string()));
        let obj = HitObject::sanitize(&row(&["36", "192", "1000", "1", "0", "0:0:0:0:"]), 7.).unwrap();
        assert_eq!(obj.sample, SampleId::Default);
    }

    #[test]
    fn from_raw_filters_and_sorts() {
        let raw = osufile::RawBeatmap {
            header: vec![("CircleSize".to_string(), "7".to_string())],
            events: vec![
                row(&["Video", "0", "clip.mp4"]),
                row(&["0", "0", "bg.jpg", "0", "0"]),
            ],
            timing_points: vec![
                row(&["1000", "-50", "4", "1", "0", "100", "0", "0"]),
                row(&["0", "500", "4", "1", "0", "100", "1", "0"]),
                row(&["bogus"]),
            ],
            hit_objects: vec![
                row(&["256", "192", "2000", "1", "0", "0:0:0:0:"]),
                row(&["0", "192", "1000", "1", "0", "0:0:0:0:"]),
                row(&["not", "a", "note"]),
            ],
        };
        let chart = Chart::from_raw(raw);
        assert_eq!(chart.background(), Some("bg.jpg"));
        assert_eq!(chart.events.len(), 1);
        assert_eq!(chart.timing_points.len(), 2);
        assert!(chart.timing_points[0].is_uninherited());
        assert_eq!(chart.hit_objects.len(), 2);
        assert_eq!(chart.hit_objects[0].time, 1000.);
        assert_eq!(chart.hit_objects[1].time, 2000.);
    }
}
