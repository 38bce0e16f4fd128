//! Read `.osu` beatmap files into raw header pairs and object rows.
//!
//! The format is almost-but-not-quite INI: the top sections hold `key: value`
//! pairs, while `[Events]`, `[TimingPoints]` and `[HitObjects]` hold
//! comma-separated object rows. Typing the records is `chart`'s job; this
//! module only splits text.

use crate::prelude::*;

#[derive(Debug, Default, Clone)]
pub struct RawBeatmap {
    /// Header `key: value` pairs from every non-object section, in file order.
    /// The file format version is recorded under the `format` key.
    pub header: Vec<(String, String)>,
    pub events: Vec<Vec<String>>,
    pub timing_points: Vec<Vec<String>>,
    pub hit_objects: Vec<Vec<String>>,
}

pub fn parse(path: &Path) -> Result<RawBeatmap> {
    let file = BufReader::new(File::open(path).context("open file")?);
    parse_reader(file)
}

pub fn parse_reader(input: impl BufRead) -> Result<RawBeatmap> {
    use Category::*;
    #[derive(Copy, Clone, Debug)]
    enum Category {
        KeyValue,
        Skip,
        Events,
        TimingPoints,
        HitObjects,
    }
    let mut category = KeyValue;
    let mut raw = RawBeatmap::default();
    let mut lines = input.lines();
    let format = lines
        .next()
        .map(|res| res.unwrap_or_default())
        .unwrap_or_default();
    //Remove stupid UTF-8 BOM
    let format = format.trim_start_matches('\u{feff}').trim();
    ensure!(
        format.starts_with("osu file format "),
        "not an osu! beatmap file"
    );
    raw.header.push((
        "format".to_string(),
        format.trim_start_matches("osu file format ").to_string(),
    ));
    let mut errors = Vec::new();
    let mut line_num = 1;
    for line in lines {
        let line = line?;
        let line = line.trim();
        line_num += 1;
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            category = match &line[1..line.len() - 1] {
                //Editor bookmarks are irrelevant to conversion
                "Editor" => Skip,
                "Events" => Events,
                "TimingPoints" => TimingPoints,
                "HitObjects" => HitObjects,
                _ => KeyValue,
            };
            continue;
        }
        match category {
            Skip => {}
            KeyValue => match line.find(':') {
                Some(idx) => {
                    let (key, val) = line.split_at(idx);
                    raw.header
                        .push((key.trim().to_string(), val[1..].trim().to_string()));
                }
                None => errors.push((line_num, line.to_string())),
            },
            Events => raw.events.push(split_row(line)),
            TimingPoints => raw.timing_points.push(split_row(line)),
            HitObjects => raw.hit_objects.push(split_row(line)),
        }
    }
    if !errors.is_empty() {
        warn!("{} malformed beatmap lines:", errors.len());
        for (line_num, line) in errors.iter() {
            warn!("  line {}: \"{}\"", line_num, line);
        }
    }
    Ok(raw)
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',').map(|comp| comp.trim().to_string()).collect()
}
