//! The bmson output document and its assembly from converted chart data.

use crate::channel::GroupedChart;
use crate::prelude::*;
use crate::pulse::{ms_to_pulses, RESOLUTION};
use crate::timing::TimingResolution;
use serde::{Deserialize, Serialize};

/// Top-level bmson document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bmson {
    pub version: String,
    pub info: BmsonInfo,
    pub bga: Bga,
    pub bpm_events: Vec<BpmEvent>,
    /// Bar line positions. `None` lets the player assume a plain 4/4 grid.
    pub lines: Option<Vec<BarLine>>,
    pub stop_events: Vec<StopEvent>,
    pub sound_channels: Vec<SoundChannel>,
}

/// Chart header metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BmsonInfo {
    pub title: String,
    pub subtitle: String,
    pub artist: String,
    pub subartists: Vec<String>,
    pub genre: String,
    /// Lane layout hint; always 7-key beatmania layout here.
    pub mode_hint: String,
    pub level: u32,
    pub preview_music: String,
    /// Pulses per measure. Affects every `y` and `l` in the document.
    pub resolution: u32,
    pub init_bpm: f64,
    pub eyecatch_image: Option<String>,
    pub back_image: Option<String>,
}

/// Static background art; no animation support.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bga {
    pub bga_header: Vec<BgaHeader>,
    pub bga_events: Vec<BgaEvent>,
    pub layer_events: Vec<BgaEvent>,
    pub poor_events: Vec<BgaEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgaHeader {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgaEvent {
    pub y: u32,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmEvent {
    pub y: u32,
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub y: u32,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarLine {
    pub y: u32,
}

/// One sound file and every note that triggers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundChannel {
    pub name: String,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// 1-based lane, or 0 for an unplayable background note.
    pub x: u32,
    pub y: u32,
    pub l: u32,
    /// Continuation flag, only meaningful on background audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<bool>,
}

/// Build the final document around the grouper's output.
pub fn assemble(
    conf: &Config,
    chart: &Chart,
    timing: &TimingResolution,
    grouped: GroupedChart,
) -> Bmson {
    let meta = &chart.metadata;
    let pick = |unicode_key: &str, plain_key: &str| -> String {
        if conf.unicode {
            meta.string(unicode_key).or_else(|| meta.string(plain_key))
        } else {
            meta.string(plain_key).or_else(|| meta.string(unicode_key))
        }
        .unwrap_or_default()
    };
    let audio = meta.string("AudioFilename").unwrap_or_else(|| {
        warn!("chart has no AudioFilename");
        String::new()
    });
    let background = chart.background().map(str::to_string);
    let info = BmsonInfo {
        title: pick("TitleUnicode", "Title"),
        subtitle: meta.string("Version").unwrap_or_default(),
        artist: pick("ArtistUnicode", "Artist"),
        subartists: vec![format!(
            "obj:{}",
            meta.string("Creator").unwrap_or_default()
        )],
        genre: "O!M Converted".to_string(),
        mode_hint: "beat-7k".to_string(),
        level: 0,
        preview_music: audio.clone(),
        resolution: RESOLUTION,
        init_bpm: timing.display_bpm,
        eyecatch_image: background.clone(),
        back_image: background.clone(),
    };
    let bga = match &background {
        Some(file) => Bga {
            bga_header: vec![BgaHeader {
                id: 0,
                name: file.clone(),
            }],
            bga_events: vec![BgaEvent { y: 0, id: 0 }],
            ..Bga::default()
        },
        None => Bga::default(),
    };
    let lines = bar_lines(grouped.last_pulse, RESOLUTION);
    let mut sound_channels: Vec<SoundChannel> = grouped
        .channels
        .into_iter()
        .map(|ch| SoundChannel {
            name: match ch.sample {
                SampleId::Named(name) => name,
                SampleId::Default => String::new(),
            },
            notes: ch
                .notes
                .into_iter()
                .map(|pulse_note| Note {
                    x: pulse_note.lane + 1,
                    y: pulse_note.y,
                    l: pulse_note.l,
                    c: None,
                })
                .collect(),
        })
        .collect();
    //The main audio track rides a channel of its own, after the note channels
    let lead_in = meta.number("AudioLeadIn").unwrap_or(0.);
    let audio_pulse = ms_to_pulses(timing.shift + lead_in, timing.beat_len, RESOLUTION);
    sound_channels.push(SoundChannel {
        name: audio,
        notes: vec![Note {
            x: 0,
            y: audio_pulse.max(0) as u32,
            l: 0,
            c: Some(true),
        }],
    });
    Bmson {
        version: "1.0.0".to_string(),
        info,
        bga,
        bpm_events: grouped.bpm_events,
        lines: Some(lines),
        stop_events: Vec::new(),
        sound_channels,
    }
}

/// Bar lines every four beats from the chart origin up to the last note.
pub fn bar_lines(last_pulse: u32, resolution: u32) -> Vec<BarLine> {
    let mut lines = Vec::new();
    let mut y = 0;
    while y < last_pulse {
        lines.push(BarLine { y });
        y += 4 * resolution;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{NoteChannel, PulseNote};
    use crate::chart::Metadata;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        Metadata::from_raw(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
        )
    }

    fn timing() -> TimingResolution {
        TimingResolution {
            beat_len: 500.,
            display_bpm: 120.,
            display_shift: 500.,
            shift: 500.,
        }
    }

    fn grouped() -> GroupedChart {
        GroupedChart {
            channels: vec![NoteChannel {
                sample: SampleId::Default,
                notes: vec![PulseNote {
                    lane: 2,
                    y: 480,
                    l: 120,
                }],
            }],
            bpm_events: vec![BpmEvent { y: 480, bpm: 240. }],
            last_pulse: 480,
        }
    }

    fn chart() -> Chart {
        Chart {
            metadata: meta(&[
                ("TitleUnicode", "曲"),
                ("Title", "Song"),
                ("ArtistUnicode", "作者"),
                ("Artist", "Artist"),
                ("Creator", "mapper"),
                ("Version", "7K Another"),
                ("AudioFilename", "audio.mp3"),
                ("AudioLeadIn", "100"),
            ]),
            events: vec![Event::Background {
                start_time: 0.,
                file: "bg.jpg".to_string(),
                x: 0,
                y: 0,
            }],
            ..Chart::default()
        }
    }

    #[test]
    fn info_block_maps_metadata() {
        let conf = Config::default();
        let bmson = assemble(&conf, &chart(), &timing(), grouped());
        assert_eq!(bmson.version, "1.0.0");
        assert_eq!(bmson.info.title, "曲");
        assert_eq!(bmson.info.artist, "作者");
        assert_eq!(bmson.info.subtitle, "7K Another");
        assert_eq!(bmson.info.subartists, vec!["obj:mapper".to_string()]);
        assert_eq!(bmson.info.mode_hint, "beat-7k");
        assert_eq!(bmson.info.resolution, 240);
        assert_eq!(bmson.info.init_bpm, 120.);
        assert_eq!(bmson.info.preview_music, "audio.mp3");
        assert_eq!(bmson.info.back_image.as_deref(), Some("bg.jpg"));
        assert_eq!(bmson.info.eyecatch_image.as_deref(), Some("bg.jpg"));
    }

    #[test]
    fn unicode_toggle_falls_back_to_plain_names() {
        let conf = Config {
            unicode: false,
            ..Config::default()
        };
        let bmson = assemble(&conf, &chart(), &timing(), grouped());
        assert_eq!(bmson.info.title, "Song");
        assert_eq!(bmson.info.artist, "Artist");
    }

    #[test]
    fn audio_channel_is_appended_last_with_continuation() {
        let conf = Config::default();
        let bmson = assemble(&conf, &chart(), &timing(), grouped());
        assert_eq!(bmson.sound_channels.len(), 2);
        let audio = bmson.sound_channels.last().unwrap();
        assert_eq!(audio.name, "audio.mp3");
        assert_eq!(audio.notes.len(), 1);
        //shift 500 + lead-in 100 at 500ms/measure
        assert_eq!(audio.notes[0].y, 288);
        assert_eq!(audio.notes[0].x, 0);
        assert_eq!(audio.notes[0].c, Some(true));
        //Note lanes are 1-based in the output
        assert_eq!(bmson.sound_channels[0].notes[0].x, 3);
    }

    #[test]
    fn bga_block_is_empty_without_background() {
        let conf = Config::default();
        let mut bare = chart();
        bare.events.clear();
        let bmson = assemble(&conf, &bare, &timing(), grouped());
        assert_eq!(bmson.bga, Bga::default());
        assert_eq!(bmson.info.back_image, None);
        let bmson = assemble(&conf, &chart(), &timing(), grouped());
        assert_eq!(bmson.bga.bga_header.len(), 1);
        assert_eq!(bmson.bga.bga_header[0].name, "bg.jpg");
        assert_eq!(bmson.bga.bga_events, vec![BgaEvent { y: 0, id: 0 }]);
    }

    #[test]
    fn bar_lines_step_four_beats_below_the_last_note() {
        assert!(bar_lines(0, RESOLUTION).is_empty());
        assert_eq!(bar_lines(1, RESOLUTION), vec![BarLine { y: 0 }]);
        assert_eq!(
            bar_lines(961, RESOLUTION),
            vec![BarLine { y: 0 }, BarLine { y: 960 }]
        );
        assert_eq!(bar_lines(960, RESOLUTION).len(), 1);
    }

    #[test]
    fn serialized_document_matches_the_interchange_fields() {
        let conf = Config::default();
        let bmson = assemble(&conf, &chart(), &timing(), grouped());
        let json = serde_json::to_value(&bmson).unwrap();
        for key in [
            "version",
            "info",
            "bga",
            "bpm_events",
            "lines",
            "stop_events",
            "sound_channels",
        ]
        .iter()
        {
            assert!(json.get(key).is_some(), "missing top-level key {}", key);
        }
        assert_eq!(json["info"]["init_bpm"], 120.);
        assert_eq!(json["info"]["resolution"], 240);
        assert_eq!(json["bpm_events"][0]["y"], 480);
        //The continuation flag only appears where set
        let note = &json["sound_channels"][0]["notes"][0];
        assert!(note.get("c").is_none());
        let audio_note = &json["sound_channels"][1]["notes"][0];
        assert_eq!(audio_note["c"], true);
    }
}
