use crate::pipeline::orchestrator::{RunOptions, DEFAULT_OUTPUT_SUBDIR};
use crate::pipeline::recovery::{RecoveryConfig, DEFAULT_MIN_CONFIDENCE};
use crate::pipeline::scoring::{ScorerConfig, DEFAULT_METRIC};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory scanned recursively for captured containers
    #[arg(long, env = "RESTAMP_ROOT")]
    pub root: PathBuf,

    /// Subdirectory of the root receiving repaired containers and reports
    #[arg(long, env = "RESTAMP_OUTPUT_SUBDIR", default_value = DEFAULT_OUTPUT_SUBDIR)]
    pub output_subdir: String,

    /// Keep repaired containers after scoring
    #[arg(long, env = "RESTAMP_KEEP_INTERMEDIATES")]
    pub keep_intermediates: bool,

    /// Concurrent recognition tasks (defaults to the CPU core count)
    #[arg(long, env = "RESTAMP_WORKERS")]
    pub workers: Option<usize>,

    /// Minimum recognition confidence (0-100) for a clock or label reading
    #[arg(long, env = "RESTAMP_MIN_CONFIDENCE", default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: f32,

    /// ffmpeg executable used for decoding and scoring
    #[arg(long, env = "RESTAMP_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// tesseract executable used for recognition
    #[arg(long, env = "RESTAMP_TESSERACT", default_value = "tesseract")]
    pub tesseract: PathBuf,

    /// libvmaf model version, e.g. vmaf_v0.6.1
    #[arg(long, env = "RESTAMP_VMAF_MODEL")]
    pub vmaf_model: Option<String>,

    /// Metric read from the scoring log
    #[arg(long, env = "RESTAMP_METRIC", default_value = DEFAULT_METRIC)]
    pub metric: String,

    /// Also render a side-by-side preview of every scored pair
    #[arg(long, env = "RESTAMP_PREVIEW")]
    pub preview: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn run_options(&self) -> RunOptions {
        let mut recovery = RecoveryConfig {
            min_confidence: self.min_confidence,
            ..RecoveryConfig::default()
        };
        if let Some(workers) = self.workers {
            recovery.pool_size = workers.max(1);
        }

        RunOptions {
            output_subdir: self.output_subdir.clone(),
            keep_intermediates: self.keep_intermediates,
            recovery,
            scorer: ScorerConfig {
                ffmpeg: self.ffmpeg.clone(),
                vmaf_model: self.vmaf_model.clone(),
                metric: self.metric.clone(),
                preview: self.preview,
            },
        }
    }
}
