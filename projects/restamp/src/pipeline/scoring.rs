// Quality scoring of a degraded stream against its reference.
//
// The scorer is ffmpeg's libvmaf filter run as a subprocess. The degraded
// stream is the first (distorted) input, the reference the second. Both are
// brought to the reference geometry and frame rate, and whichever stream
// started earlier on the recovered clock is trimmed so both begin together.

use crate::error::RestampError;
use crate::ivf::FrameRate;
use crate::pipeline::types::RepairedStream;
use crate::run_artifacts::PooledMetric;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const DEFAULT_METRIC: &str = "vmaf";

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub ffmpeg: PathBuf,
    /// libvmaf model version, e.g. `vmaf_v0.6.1`. The filter default when unset.
    pub vmaf_model: Option<String>,
    /// Metric key read from the log.
    pub metric: String,
    pub preview: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            vmaf_model: None,
            metric: DEFAULT_METRIC.to_string(),
            preview: false,
        }
    }
}

/// Everything one scoring subprocess needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    pub reference: PathBuf,
    pub degraded: PathBuf,
    pub width: u16,
    pub height: u16,
    pub frame_rate: FrameRate,
    /// Positive when the degraded stream starts later than the reference.
    pub offset_seconds: f64,
    pub log_path: PathBuf,
    pub preview_path: Option<PathBuf>,
}

impl ScoreRequest {
    pub fn for_pair(
        reference: &RepairedStream,
        degraded: &RepairedStream,
        output_dir: &Path,
        config: &ScorerConfig,
    ) -> Self {
        let stem = degraded.base_name();
        let offset_seconds = pts_offset_seconds(
            reference.start_timestamp,
            degraded.start_timestamp,
            reference.frame_rate.as_f64(),
        );

        Self {
            reference: reference.output_path.clone(),
            degraded: degraded.output_path.clone(),
            width: reference.width,
            height: reference.height,
            frame_rate: reference.frame_rate,
            offset_seconds,
            log_path: output_dir.join(format!("{}_{}.json", stem, config.metric)),
            preview_path: config
                .preview
                .then(|| output_dir.join(format!("{}_preview.mp4", stem))),
        }
    }
}

/// Seconds between the two recovered start timestamps.
pub fn pts_offset_seconds(reference_start: u64, degraded_start: u64, frame_rate: f64) -> f64 {
    (degraded_start as f64 - reference_start as f64) / frame_rate
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameMetrics {
    #[serde(rename = "frameNum", alias = "frameNumber")]
    pub frame_num: u64,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// The JSON log written by the scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityLog {
    #[serde(default)]
    pub frames: Vec<FrameMetrics>,
    #[serde(default)]
    pub pooled_metrics: HashMap<String, PooledMetric>,
}

impl QualityLog {
    pub fn pooled(&self, metric: &str) -> Option<PooledMetric> {
        self.pooled_metrics.get(metric).copied()
    }

    /// Per-frame values of `metric` in frame order. Frames without it are skipped.
    pub fn series(&self, metric: &str) -> Vec<f64> {
        let mut frames: Vec<(u64, f64)> = self
            .frames
            .iter()
            .filter_map(|f| f.metrics.get(metric).map(|v| (f.frame_num, *v)))
            .collect();
        frames.sort_by_key(|(frame_num, _)| *frame_num);
        frames.into_iter().map(|(_, v)| v).collect()
    }
}

pub fn parse_log(content: &str) -> Result<QualityLog> {
    serde_json::from_str(content).context("Malformed quality log")
}

pub trait QualityScorer: Send + Sync {
    fn score(&self, request: &ScoreRequest) -> impl Future<Output = Result<QualityLog>> + Send;
}

pub struct FfmpegScorer {
    config: ScorerConfig,
}

impl FfmpegScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }
}

impl QualityScorer for FfmpegScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<QualityLog> {
        let args = build_args(request, &self.config);
        tracing::debug!("Running {:?} {}", self.config.ffmpeg, args.join(" "));

        let output = Command::new(&self.config.ffmpeg)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {:?}", self.config.ffmpeg))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no diagnostic output")
                .to_string();
            return Err(RestampError::ScoringFailed {
                reference: request.reference.clone(),
                degraded: request.degraded.clone(),
                reason: format!("{} ({})", reason, output.status),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(&request.log_path)
            .await
            .with_context(|| format!("Failed to read quality log {:?}", request.log_path))?;
        parse_log(&content).with_context(|| format!("In {:?}", request.log_path))
    }
}

/// Escapes a value for use inside a filtergraph option.
fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn input_chain(request: &ScoreRequest, trim_seconds: f64) -> String {
    let mut chain = String::new();
    if trim_seconds > 0.0 {
        chain.push_str(&format!("trim=start={:.6},", trim_seconds));
    }
    chain.push_str(&format!(
        "setpts=PTS-STARTPTS,fps=fps={}/{},scale={}:{}:flags=bicubic",
        request.frame_rate.num, request.frame_rate.den, request.width, request.height
    ));
    chain
}

pub fn build_filter(request: &ScoreRequest, config: &ScorerConfig) -> String {
    // The stream that started earlier carries extra leading footage.
    let degraded_trim = (-request.offset_seconds).max(0.0);
    let reference_trim = request.offset_seconds.max(0.0);

    let preview = request.preview_path.is_some();
    let (dist_split, ref_split) = if preview {
        (",split=2[dist][distp]", ",split=2[ref][refp]")
    } else {
        ("[dist]", "[ref]")
    };

    let mut vmaf = format!(
        "libvmaf=log_fmt=json:log_path={}",
        escape_filter_value(&request.log_path.to_string_lossy())
    );
    if let Some(model) = &config.vmaf_model {
        vmaf.push_str(&format!(":model=version={}", escape_filter_value(model)));
    }
    vmaf.push_str(&format!(":n_threads={}", num_cpus::get()));

    let mut filter = format!(
        "[0:v]{}{};[1:v]{}{};[dist][ref]{}[vmaf]",
        input_chain(request, degraded_trim),
        dist_split,
        input_chain(request, reference_trim),
        ref_split,
        vmaf
    );
    if preview {
        filter.push_str(";[distp][refp]hstack=inputs=2[preview]");
    }
    filter
}

pub fn build_args(request: &ScoreRequest, config: &ScorerConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        request.degraded.to_string_lossy().into_owned(),
        "-i".into(),
        request.reference.to_string_lossy().into_owned(),
        "-filter_complex".into(),
        build_filter(request, config),
    ];

    if let Some(preview_path) = &request.preview_path {
        args.extend(
            [
                "-map",
                "[preview]",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
            ]
            .map(String::from),
        );
        args.push(preview_path.to_string_lossy().into_owned());
    }

    args.extend(["-map", "[vmaf]", "-f", "null", "-"].map(String::from));
    args
}
