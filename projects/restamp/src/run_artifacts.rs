// Run artifact struct definitions
//
// Everything persisted as JSON in a run's output directory: the per-stream
// quality report and the run summary.

use crate::pipeline::types::RepairedStream;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";
pub const RUN_SUMMARY_FILE: &str = "run.json";

/// Pooled summary of a per-frame quality metric.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PooledMetric {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub harmonic_mean: f64,
}

/// Degraded-stream base name to its pooled metric.
pub type Report = BTreeMap<String, PooledMetric>;

/// A container that could not be repaired.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FailedInput {
    pub path: PathBuf,
    pub error: String,
}

/// A reference/degraded pair that went through the scorer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScoredPair {
    pub participant: String,
    pub reference: String,
    pub degraded: String,
    pub offset_seconds: f64,
    /// `None` when scoring failed for this pair.
    pub pooled: Option<PooledMetric>,
    #[serde(default)]
    pub series_path: Option<PathBuf>,
}

#[derive(Serialize, Debug, Clone)]
pub struct RunSummary {
    pub created_at: DateTime<Utc>,
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub repaired: Vec<RepairedStream>,
    pub failures: Vec<FailedInput>,
    pub scored: Vec<ScoredPair>,
}

impl RunSummary {
    pub fn new(root: &Path, output_dir: &Path) -> Self {
        Self {
            created_at: Utc::now(),
            root: root.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            repaired: Vec::new(),
            failures: Vec::new(),
            scored: Vec::new(),
        }
    }
}

pub fn write_report(output_dir: &Path, report: &Report) -> Result<PathBuf> {
    let path = output_dir.join(REPORT_FILE);
    let content = serde_json::to_string_pretty(report)?;
    fs::write(&path, content).with_context(|| format!("Failed to write report {:?}", path))?;
    Ok(path)
}

pub fn write_run_summary(output_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let path = output_dir.join(RUN_SUMMARY_FILE);
    let content = serde_json::to_string_pretty(summary)?;
    fs::write(&path, content)
        .with_context(|| format!("Failed to write run summary {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::new();
        report.insert(
            "Alice_recv-by_bob".to_string(),
            PooledMetric {
                min: 40.5,
                max: 98.0,
                mean: 87.25,
                harmonic_mean: 85.0,
            },
        );

        let path = write_report(dir.path(), &report).unwrap();
        assert_eq!(path, dir.path().join("report.json"));
        let content = fs::read_to_string(&path).unwrap();
        let loaded: Report = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded, report);

        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(raw["Alice_recv-by_bob"]["harmonic_mean"], 85.0);
    }

    #[test]
    fn test_run_summary_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = RunSummary::new(Path::new("/captures"), dir.path());
        summary.failures.push(FailedInput {
            path: PathBuf::from("/captures/broken.ivf"),
            error: "malformed container".to_string(),
        });

        let path = write_run_summary(dir.path(), &summary).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["root"], "/captures");
        assert_eq!(raw["failures"][0]["path"], "/captures/broken.ivf");
        assert!(raw["created_at"].is_string());
        assert!(raw["scored"].as_array().unwrap().is_empty());
    }
}
