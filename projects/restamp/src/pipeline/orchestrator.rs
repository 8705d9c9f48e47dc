// Pipeline orchestrator: repairs every capture under a root directory, pairs
// each participant's reference stream with the streams captured by its
// receivers, and scores every pair.
//
// Failures are contained per file and per pair: they are logged, recorded in
// the run summary and left out of the report.

use crate::pipeline::metrics::{summarize, write_series};
use crate::pipeline::recovery::RecoveryConfig;
use crate::pipeline::repair::repair;
use crate::pipeline::roles::is_degraded_output;
use crate::pipeline::scoring::{QualityScorer, ScoreRequest, ScorerConfig};
use crate::pipeline::types::RepairedStream;
use crate::recognition::Recognizer;
use crate::run_artifacts::{
    write_report, write_run_summary, FailedInput, PooledMetric, Report, RunSummary, ScoredPair,
};
use crate::run_context::{list_containers, remove_intermediate};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_OUTPUT_SUBDIR: &str = "restamped";

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Subdirectory of the root receiving repaired containers and reports.
    pub output_subdir: String,
    pub keep_intermediates: bool,
    pub recovery: RecoveryConfig,
    pub scorer: ScorerConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_subdir: DEFAULT_OUTPUT_SUBDIR.to_string(),
            keep_intermediates: false,
            recovery: RecoveryConfig::default(),
            scorer: ScorerConfig::default(),
        }
    }
}

/// Repaired streams grouped by participant.
#[derive(Debug, Default)]
struct Pairing {
    references: BTreeMap<String, RepairedStream>,
    degraded: BTreeMap<String, Vec<RepairedStream>>,
}

impl Pairing {
    fn register(&mut self, stream: RepairedStream) {
        if is_degraded_output(&stream.output_path) {
            self.degraded
                .entry(stream.participant.clone())
                .or_default()
                .push(stream);
            return;
        }

        let participant = stream.participant.clone();
        if let Some(previous) = self.references.insert(participant.clone(), stream) {
            tracing::warn!(
                "Replacing reference stream for {}: {:?} is superseded",
                participant,
                previous.output_path
            );
        }
    }
}

/// Runs the whole batch under `root` and returns the report that was written.
pub async fn run<R: Recognizer, S: QualityScorer>(
    root: &Path,
    options: &RunOptions,
    recognizer: Arc<R>,
    scorer: &S,
) -> Result<Report> {
    let output_dir = root.join(&options.output_subdir);
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;

    let containers = list_containers(root, &output_dir);
    tracing::info!("Found {} containers under {:?}", containers.len(), root);

    let mut summary = RunSummary::new(root, &output_dir);
    let mut pairing = Pairing::default();

    for path in &containers {
        match repair(path, &output_dir, recognizer.clone(), &options.recovery).await {
            Ok(stream) => {
                summary.repaired.push(stream.clone());
                pairing.register(stream);
            }
            Err(e) => {
                tracing::error!("Failed to repair {:?}: {}", path, e);
                summary.failures.push(FailedInput {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let mut report = Report::new();
    let Pairing {
        references,
        mut degraded,
    } = pairing;

    for (participant, reference) in &references {
        let Some(partners) = degraded.remove(participant) else {
            tracing::info!("No degraded streams for {}, nothing to score", participant);
            continue;
        };

        for partner in &partners {
            let request =
                ScoreRequest::for_pair(reference, partner, &output_dir, &options.scorer);
            let outcome = score_pair(scorer, &request, &options.scorer.metric, &output_dir).await;

            let (pooled, series_path) = match outcome {
                Ok((pooled, series_path)) => {
                    tracing::info!(
                        "{}: {} mean {:.3} (min {:.3}, harmonic mean {:.3})",
                        partner.base_name(),
                        options.scorer.metric,
                        pooled.mean,
                        pooled.min,
                        pooled.harmonic_mean
                    );
                    report.insert(partner.base_name(), pooled);
                    (Some(pooled), series_path)
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to score {:?} against {:?}: {:#}",
                        partner.output_path,
                        reference.output_path,
                        e
                    );
                    (None, None)
                }
            };

            summary.scored.push(ScoredPair {
                participant: participant.clone(),
                reference: reference.base_name(),
                degraded: partner.base_name(),
                offset_seconds: request.offset_seconds,
                pooled,
                series_path,
            });

            if !options.keep_intermediates {
                remove_intermediate(&partner.output_path).await;
            }
        }

        if !options.keep_intermediates {
            remove_intermediate(&reference.output_path).await;
        }
    }

    for (participant, partners) in &degraded {
        tracing::warn!(
            "No reference stream for {}; {} degraded stream(s) left unscored",
            participant,
            partners.len()
        );
    }

    let report_path = write_report(&output_dir, &report)?;
    write_run_summary(&output_dir, &summary)?;
    tracing::info!(
        "Scored {} of {} pairs, report written to {:?}",
        report.len(),
        summary.scored.len(),
        report_path
    );

    Ok(report)
}

/// Scores one pair and writes its per-second series next to the log.
///
/// Only a scorer or log failure fails the pair; a series that cannot be
/// written is logged and reported as missing.
async fn score_pair<S: QualityScorer>(
    scorer: &S,
    request: &ScoreRequest,
    metric: &str,
    output_dir: &Path,
) -> Result<(PooledMetric, Option<PathBuf>)> {
    let log = scorer.score(request).await?;
    let pooled = log
        .pooled(metric)
        .with_context(|| format!("No pooled {} in {:?}", metric, request.log_path))?;

    let per_frame = log.series(metric);
    let series = summarize(&per_frame, request.frame_rate.as_f64());
    let stem = request
        .degraded
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    let series_path = output_dir.join(format!("{}_{}_series.csv", stem, metric));
    if let Err(e) = write_series(&series_path, &series) {
        tracing::error!("Failed to write series {:?}: {:#}", series_path, e);
        return Ok((pooled, None));
    }

    Ok((pooled, Some(series_path)))
}
