//! Per-chart conversion pipeline: typed document, timing resolution, channel
//! grouping, document assembly.

use crate::prelude::*;

/// Lane count of the only supported mania layout.
pub const KEY_COUNT: f64 = 7.;

/// Convert one parsed chart into a bmson document.
///
/// Returns `Ok(None)` for charts that are not 7-key mania; skipping those is
/// expected in mixed beatmap packages and is not an error.
pub fn convert(conf: &Config, raw: osufile::RawBeatmap) -> Result<Option<bmson::Bmson>> {
    let mut chart = Chart::from_raw(raw);
    match chart.metadata.key_count() {
        Some(keys) if keys == KEY_COUNT => {}
        keys => {
            debug!("  skipping chart with key count {:?}", keys);
            return Ok(None);
        }
    }
    let resolution = timing::resolve(&chart.timing_points).context("resolve chart timing")?;
    timing::apply_offset(&mut chart, resolution.shift + conf.extra_offset());
    let grouped =
        channel::group_channels(&chart.timing_points, &chart.hit_objects, conf.group_hitsounds)
            .context("group sound channels")?;
    Ok(Some(bmson::assemble(conf, &chart, &resolution, grouped)))
}
