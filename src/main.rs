use crate::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar as FastRng;
use serde::{Deserialize, Serialize};

mod prelude {
    pub(crate) use crate::{
        bmson, channel, chart,
        chart::{Chart, Event, HitObject, Metadata, SampleId, TimingKind, TimingPoint},
        conv, osufile, pulse, timing, Config,
    };
    pub use anyhow::{anyhow, bail, ensure, Context, Error, Result};
    pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
    pub use log::{debug, error, info, trace, warn};
    pub use std::{
        fs::{self, File},
        io::{self, BufRead, BufReader, BufWriter, Write},
        path::{Path, PathBuf},
    };
    pub use walkdir::WalkDir;
    pub fn default<T: Default>() -> T {
        T::default()
    }
}

mod bmson;
mod channel;
mod chart;
mod conv;
mod osufile;
mod pulse;
mod timing;

/// Config file searched in the working directory when no path is given.
const CONFIG_NAME: &str = "osu2bmson.ron";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The folder holding extracted beatmap packages.
    pub input: String,
    /// The output folder for bmson files. Empty derives `<input>Out`.
    pub output: String,
    /// Manual offset in milliseconds, taking precedence over `preset`.
    pub offset: Option<f64>,
    /// Offset preset for the target engine, used when `offset` is unset.
    pub preset: OffsetPreset,
    /// Whether to group notes into one sound channel per hit-sound sample.
    pub group_hitsounds: bool,
    /// Whether to use the osu! unicode names or not.
    pub unicode: bool,
    /// What is the chance to load a beatmapset.
    /// Defaults to `1` (of course).
    /// Intended for debug purposes.
    pub debug_allow_chance: f64,
    /// The random seed for `debug_allow_chance`, for reproducible results.
    pub debug_allow_seed: u64,
    /// Entries must be lowercase.
    pub blacklist: Vec<String>,
    /// Entries must be lowercase.
    pub whitelist: Vec<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            input: "".into(),
            output: "".into(),
            offset: None,
            preset: OffsetPreset::Beatoraja,
            group_hitsounds: true,
            unicode: true,
            debug_allow_chance: 1.,
            debug_allow_seed: 0,
            blacklist: vec![],
            whitelist: vec![],
        }
    }
}
impl Config {
    /// The manual offset to add on top of the computed measure shift.
    pub fn extra_offset(&self) -> f64 {
        self.offset.unwrap_or_else(|| self.preset.offset_ms())
    }
}

/// Audio-latency presets of the common bmson players.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub enum OffsetPreset {
    Beatoraja,
    Bemuse,
}
impl OffsetPreset {
    fn offset_ms(self) -> f64 {
        match self {
            OffsetPreset::Beatoraja => 95.,
            OffsetPreset::Bemuse => 5.,
        }
    }
}

#[derive(Default)]
struct Stats {
    converted: usize,
    skipped: usize,
    failed: usize,
}

pub fn read_path_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("read path from stdin")?;
    Ok(line.trim().trim_matches('"').to_string())
}

fn load_config() -> Result<Config> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => {
            let path = Path::new(&arg);
            if path.is_dir() {
                //A bare input folder runs with the default config
                let mut conf = Config::default();
                conf.input = path
                    .to_str()
                    .ok_or(anyhow!("non-utf8 input path"))?
                    .to_string();
                return Ok(conf);
            }
            path.to_path_buf()
        }
        None => PathBuf::from(CONFIG_NAME),
    };
    if path.exists() {
        let text = fs::read_to_string(&path)
            .with_context(|| anyhow!("read config at \"{}\"", path.display()))?;
        let conf = ron::de::from_str(&text)
            .with_context(|| anyhow!("parse config at \"{}\"", path.display()))?;
        info!("loaded config from \"{}\"", path.display());
        Ok(conf)
    } else {
        let conf = Config::default();
        let text =
            ron::ser::to_string_pretty(&conf, default()).context("serialize default config")?;
        match fs::write(&path, text) {
            Ok(()) => info!("wrote default config template to \"{}\"", path.display()),
            Err(err) => warn!(
                "failed to write default config to \"{}\": {:#}",
                path.display(),
                err
            ),
        }
        Ok(conf)
    }
}

fn allowed_by_lists(conf: &Config, path: &Path) -> bool {
    if conf.blacklist.is_empty() && conf.whitelist.is_empty() {
        return true;
    }
    let path = path
        .strip_prefix(&conf.input)
        .ok()
        .and_then(Path::to_str)
        .unwrap_or_default()
        .to_lowercase();
    if conf.blacklist.iter().any(|black| path.contains(black)) {
        //Path contains blacklisted keywords
        return false;
    }
    conf.whitelist.is_empty() || conf.whitelist.iter().any(|white| path.contains(white))
}

fn scan_beatmapsets(conf: &Config, mut on_bmset: impl FnMut(&Path, &[PathBuf])) -> Result<()> {
    let mut by_depth: Vec<Vec<PathBuf>> = Vec::new();
    let mut randtrim = if conf.debug_allow_chance < 1. {
        Some(FastRng::seed_from_u64(conf.debug_allow_seed))
    } else {
        None
    };
    for entry in WalkDir::new(&conf.input).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // `walkdir::Error::display` already displays the errored path, so no need to
                // include that info.
                warn!("failed to scan input directory: {:#}", err);
                continue;
            }
        };
        let depth = entry.depth();
        if depth < by_depth.len() {
            //Close directories
            for mut dir in by_depth.drain(depth..) {
                if let Some(rng) = &mut randtrim {
                    if !rng.gen_bool(conf.debug_allow_chance) {
                        continue;
                    }
                }
                if !allowed_by_lists(conf, entry.path()) {
                    continue;
                }
                if !dir.is_empty() {
                    dir.sort_by(|a, b| {
                        natord::compare(
                            &a.file_name().unwrap_or_default().to_string_lossy(),
                            &b.file_name().unwrap_or_default().to_string_lossy(),
                        )
                    });
                    on_bmset(entry.path(), &dir[..]);
                }
            }
        } else {
            //Add new by_depth entries
            while depth > by_depth.len() {
                by_depth.push(Vec::new());
            }
        }
        if entry.file_type().is_file() && entry.path().extension() == Some("osu".as_ref()) {
            let bm_path = entry.into_path();
            if depth > 0 {
                by_depth[depth - 1].push(bm_path);
            } else {
                warn!("do not run on a .osu file, run on the beatmap folder instead");
            }
        }
    }
    Ok(())
}

fn process_beatmap(
    conf: &Config,
    out_dir: &Path,
    bm_path: &Path,
    made_out_dir: &mut bool,
) -> Result<Option<PathBuf>> {
    let raw = osufile::parse(bm_path).context("read/parse beatmap file")?;
    let bmson = match conv::convert(conf, raw)? {
        Some(bmson) => bmson,
        None => return Ok(None),
    };
    if !*made_out_dir {
        fs::create_dir_all(out_dir)
            .with_context(|| anyhow!("create output dir at \"{}\"", out_dir.display()))?;
        *made_out_dir = true;
    }
    let mut file_name = bm_path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".bmson");
    let out_path = out_dir.join(file_name);
    let mut file = BufWriter::new(
        File::create(&out_path).with_context(|| anyhow!("create \"{}\"", out_path.display()))?,
    );
    serde_json::to_writer_pretty(&mut file, &bmson).context("write bmson")?;
    file.flush().context("flush bmson")?;
    Ok(Some(out_path))
}

fn process_beatmapset(
    conf: &Config,
    out_base: &Path,
    bmset_path: &Path,
    bm_paths: &[PathBuf],
    stats: &mut Stats,
) -> Result<()> {
    info!("processing \"{}\":", bmset_path.display());
    let rel = bmset_path
        .strip_prefix(&conf.input)
        .context("find path relative to input")?;
    let out_dir = out_base.join(rel);
    //Only create the output dir once a chart actually converts
    let mut made_out_dir = false;
    for bm_path in bm_paths {
        let bm_name = bm_path.file_name().unwrap_or_default().to_string_lossy();
        match process_beatmap(conf, &out_dir, bm_path, &mut made_out_dir) {
            Ok(Some(out_path)) => {
                stats.converted += 1;
                info!("  wrote \"{}\"", out_path.display());
            }
            Ok(None) => {
                stats.skipped += 1;
                debug!("  skipped \"{}\"", bm_name);
            }
            Err(err) => {
                stats.failed += 1;
                error!("  error processing beatmap \"{}\": {:#}", bm_name, err);
            }
        }
    }
    Ok(())
}

fn run() -> Result<()> {
    let mut conf = load_config()?;
    if conf.input.is_empty() {
        eprintln!();
        eprintln!("drag and drop the folder with your extracted beatmaps into this window, then press enter");
        conf.input = read_path_from_stdin()?;
    }
    let out_base = if conf.output.is_empty() {
        let mut name = Path::new(&conf.input)
            .file_name()
            .unwrap_or_default()
            .to_os_string();
        name.push("Out");
        Path::new(&conf.input).with_file_name(name)
    } else {
        PathBuf::from(&conf.output)
    };
    info!("scanning for beatmaps in \"{}\"", conf.input);
    info!("writing bmson files in \"{}\"", out_base.display());
    let mut stats = Stats::default();
    scan_beatmapsets(&conf, |bmset_path, bm_paths| {
        if let Err(err) = process_beatmapset(&conf, &out_base, bmset_path, bm_paths, &mut stats) {
            error!(
                "error processing beatmapset at \"{}\": {:#}",
                bmset_path.display(),
                err
            );
        }
    })?;
    info!(
        "done: {} charts converted, {} skipped, {} failed",
        stats.converted, stats.skipped, stats.failed
    );
    Ok(())
}

fn main() {
    if let Err(err) = flexi_logger::Logger::with_env_or_str("info").start() {
        eprintln!("failed to initialize logging: {:#}", err);
    }
    match run() {
        Ok(()) => {}
        Err(err) => {
            error!("fatal error: {:#}", err);
        }
    }
}
