// Metrics aggregation: per-frame quality values to one value per second.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct SeriesRow {
    second: usize,
    value: f64,
}

/// Buckets `per_frame` into one-second windows of `frame_rate` frames and
/// returns the mean of each window.
///
/// Each value is divided by the window size as it is folded in, so a trailing
/// partial window is still divided by the full window size.
pub fn summarize(per_frame: &[f64], frame_rate: f64) -> Vec<f64> {
    let window = (frame_rate.round() as usize).max(1);
    let mut buckets = Vec::with_capacity(per_frame.len().div_ceil(window));

    for (i, value) in per_frame.iter().enumerate() {
        if i % window == 0 {
            buckets.push(0.0);
        }
        if let Some(bucket) = buckets.last_mut() {
            *bucket += value / window as f64;
        }
    }

    buckets
}

/// Writes a bucketed series as `second,value` rows.
pub fn write_series(path: &Path, series: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create series file {:?}", path))?;
    for (second, value) in series.iter().enumerate() {
        writer.serialize(SeriesRow {
            second,
            value: *value,
        })?;
    }
    writer.flush()?;
    Ok(())
}
